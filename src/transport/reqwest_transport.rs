//! Default transport backed by pooled `reqwest` clients.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::COOKIE;
use reqwest::redirect::Policy;
use reqwest::Method;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{error, trace};

use crate::config::DEFAULT_MAX_CONCURRENCY;
use crate::error::HttpClientError;
use crate::request::{Request, RequestBody};
use crate::response::Response;
use crate::transport::Transport;

const MAX_REDIRECTS: usize = 10;

/// Concurrent transport with a priority deque and per-request timeouts.
///
/// Connection pooling is delegated to `reqwest`; two pooled clients are
/// kept because redirect policy is a client-level knob there, while
/// requests opt into following redirects individually.
pub struct ReqwestTransport {
    queue: Mutex<VecDeque<Request>>,
    max_concurrency: AtomicUsize,
    aborted: AtomicBool,
    default_timeout: Duration,
    plain: reqwest::Client,
    redirecting: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(default_timeout: Duration) -> Result<Self, HttpClientError> {
        let plain = reqwest::Client::builder()
            .redirect(Policy::none())
            .build()
            .map_err(|e| HttpClientError::Configuration(e.to_string()))?;
        let redirecting = reqwest::Client::builder()
            .redirect(Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| HttpClientError::Configuration(e.to_string()))?;

        Ok(ReqwestTransport {
            queue: Mutex::new(VecDeque::new()),
            max_concurrency: AtomicUsize::new(DEFAULT_MAX_CONCURRENCY),
            aborted: AtomicBool::new(false),
            default_timeout,
            plain,
            redirecting,
        })
    }

    fn pop(&self) -> Option<Request> {
        self.queue.lock().pop_front()
    }

    async fn perform(client: reqwest::Client, mut request: Request, default_timeout: Duration) {
        let started = Instant::now();
        let timeout = request.timeout.unwrap_or(default_timeout);
        let info = request.info();

        let mut builder = client
            .request(request.method.clone(), request.url().clone())
            .headers(request.headers.clone())
            .timeout(timeout);

        if let Some(header) = request.cookie_header() {
            builder = builder.header(COOKIE, header);
        }

        if !request.parameters.is_empty() {
            if request.method == Method::POST || request.method == Method::PUT {
                if request.body.is_none() {
                    builder = builder.form(&request.parameters);
                }
            } else {
                builder = builder.query(&request.parameters);
            }
        }

        match &request.body {
            Some(RequestBody::Bytes(bytes)) => builder = builder.body(bytes.clone()),
            Some(RequestBody::Form(fields)) => builder = builder.form(fields),
            None => {}
        }

        let response = match builder.send().await {
            Ok(upstream) => {
                let effective_url = upstream.url().clone();
                let status = upstream.status().as_u16();
                let headers = upstream.headers().clone();
                match upstream.text().await {
                    Ok(body) => Response {
                        url: info.url.clone(),
                        effective_url,
                        status,
                        transport_message: None,
                        headers,
                        body,
                        time: started.elapsed(),
                        timed_out: false,
                        request: info,
                    },
                    Err(e) => Response::transport_failure(
                        info,
                        e.to_string(),
                        e.is_timeout(),
                        started.elapsed(),
                    ),
                }
            }
            Err(e) => {
                Response::transport_failure(info, e.to_string(), e.is_timeout(), started.elapsed())
            }
        };

        trace!(
            "request #{} finished with status {} in {:?}",
            response.request.id,
            response.status,
            response.time
        );

        for callback in request.take_callbacks() {
            callback(&response);
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    fn queue_back(&self, request: Request) {
        trace!("queueing #{} at tail: {}", request.id(), request.url());
        self.queue.lock().push_back(request);
    }

    fn queue_front(&self, request: Request) {
        trace!("queueing #{} at head: {}", request.id(), request.url());
        self.queue.lock().push_front(request);
    }

    async fn run(&self) {
        self.aborted.store(false, Ordering::SeqCst);
        let mut tasks = JoinSet::new();

        loop {
            while tasks.len() < self.max_concurrency.load(Ordering::SeqCst) {
                if self.aborted.load(Ordering::SeqCst) {
                    self.queue.lock().clear();
                    break;
                }
                let Some(request) = self.pop() else { break };
                let client = if request.follow_location {
                    self.redirecting.clone()
                } else {
                    self.plain.clone()
                };
                tasks.spawn(Self::perform(client, request, self.default_timeout));
            }

            match tasks.join_next().await {
                Some(Err(e)) => error!("a dispatch task failed: {e}"),
                Some(Ok(())) => {}
                None => {
                    if self.queue.lock().is_empty() || self.aborted.load(Ordering::SeqCst) {
                        break;
                    }
                }
            }
        }
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        let dropped = {
            let mut queue = self.queue.lock();
            let dropped = queue.len();
            queue.clear();
            dropped
        };
        if dropped > 0 {
            trace!("abort dropped {dropped} queued requests");
        }
    }

    fn set_max_concurrency(&self, limit: usize) {
        self.max_concurrency.store(limit.max(1), Ordering::SeqCst);
    }

    fn max_concurrency(&self) -> usize {
        self.max_concurrency.load(Ordering::SeqCst)
    }
}
