//! Shared test support: a scriptable in-process transport.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use audit_http::{HttpClient, Request, RequestInfo, Response, Transport};
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use url::Url;

/// What the mock should answer for one request.
pub struct MockReply {
    status: u16,
    body: String,
    headers: Vec<(String, String)>,
    timed_out: bool,
    failure: Option<String>,
}

impl MockReply {
    pub fn ok(body: impl Into<String>) -> Self {
        Self::status(200, body)
    }

    pub fn status(status: u16, body: impl Into<String>) -> Self {
        MockReply {
            status,
            body: body.into(),
            headers: Vec::new(),
            timed_out: false,
            failure: None,
        }
    }

    pub fn timeout() -> Self {
        MockReply {
            status: 0,
            body: String::new(),
            headers: Vec::new(),
            timed_out: true,
            failure: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        MockReply {
            status: 0,
            body: String::new(),
            headers: Vec::new(),
            timed_out: false,
            failure: Some(message.into()),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Everything a test may want to assert about one dispatched request.
#[derive(Debug, Clone)]
pub struct DispatchRecord {
    pub id: u64,
    pub url: Url,
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub cookies: Vec<(String, String)>,
    pub high_priority: bool,
}

type Responder = Arc<dyn Fn(&Request) -> MockReply + Send + Sync>;

/// Sequential in-process transport: pops the queue front-to-back, answers
/// each request via the scripted responder and runs its callbacks, exactly
/// like the real transport would (minus the parallelism).
pub struct MockTransport {
    queue: Mutex<VecDeque<Request>>,
    responder: Responder,
    log: Mutex<Vec<DispatchRecord>>,
    max_concurrency: AtomicUsize,
    aborted: AtomicBool,
}

impl MockTransport {
    pub fn new(responder: impl Fn(&Request) -> MockReply + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(MockTransport {
            queue: Mutex::new(VecDeque::new()),
            responder: Arc::new(responder),
            log: Mutex::new(Vec::new()),
            max_concurrency: AtomicUsize::new(20),
            aborted: AtomicBool::new(false),
        })
    }

    pub fn dispatched(&self) -> Vec<DispatchRecord> {
        self.log.lock().clone()
    }

    pub fn dispatch_count(&self) -> usize {
        self.log.lock().len()
    }

    fn record(&self, request: &Request) {
        self.log.lock().push(DispatchRecord {
            id: request.id(),
            url: request.url().clone(),
            method: request.method.clone(),
            headers: request
                .headers
                .iter()
                .map(|(name, value)| {
                    (
                        name.as_str().to_string(),
                        value.to_str().unwrap_or_default().to_string(),
                    )
                })
                .collect(),
            cookies: request.cookies.clone(),
            high_priority: request.high_priority,
        });
    }

    fn respond(reply: MockReply, info: RequestInfo) -> Response {
        if reply.timed_out {
            return Response::transport_failure(info, "timed out", true, Duration::from_millis(5));
        }
        if let Some(message) = reply.failure {
            return Response::transport_failure(info, message, false, Duration::from_millis(5));
        }

        let mut headers = HeaderMap::new();
        for (name, value) in &reply.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.append(name, value);
            }
        }
        Response {
            url: info.url.clone(),
            effective_url: info.url.clone(),
            status: reply.status,
            transport_message: None,
            headers,
            body: reply.body,
            time: Duration::from_millis(5),
            timed_out: false,
            request: info,
        }
    }
}

#[audit_http::async_trait]
impl Transport for MockTransport {
    fn queue_back(&self, request: Request) {
        self.queue.lock().push_back(request);
    }

    fn queue_front(&self, request: Request) {
        self.queue.lock().push_front(request);
    }

    async fn run(&self) {
        self.aborted.store(false, Ordering::SeqCst);
        loop {
            let Some(mut request) = self.queue.lock().pop_front() else {
                break;
            };
            self.record(&request);
            let reply = (self.responder)(&request);
            let response = Self::respond(reply, request.info());
            for callback in request.take_callbacks() {
                callback(&response);
            }
            if self.aborted.load(Ordering::SeqCst) {
                self.queue.lock().clear();
                break;
            }
        }
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        self.queue.lock().clear();
    }

    fn set_max_concurrency(&self, limit: usize) {
        self.max_concurrency.store(limit.max(1), Ordering::SeqCst);
    }

    fn max_concurrency(&self) -> usize {
        self.max_concurrency.load(Ordering::SeqCst)
    }
}

/// Client wired to the given mock for both queued and blocking requests.
pub fn client_with(transport: &Arc<MockTransport>) -> HttpClient {
    HttpClient::builder()
        .transport(transport.clone())
        .blocking_transport(transport.clone())
        .build()
        .expect("mock-backed client")
}

/// Hand-built response, as an audit check would receive one.
pub fn fake_response(url: &str, status: u16, body: &str) -> Response {
    let url = Url::parse(url).expect("test URL");
    let info = RequestInfo {
        id: 0,
        method: Method::GET,
        url: url.clone(),
        performer: None,
        high_priority: false,
        update_cookies: false,
    };
    Response {
        url: url.clone(),
        effective_url: url,
        status,
        transport_message: None,
        headers: HeaderMap::new(),
        body: body.to_string(),
        time: Duration::from_millis(5),
        timed_out: false,
        request: info,
    }
}
