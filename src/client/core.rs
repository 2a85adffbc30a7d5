//! The central HTTP orchestrator.
//!
//! The client owns configuration, statistics, observers, the cookie jar
//! and the custom-404 detector, and drives the transport in bursts. It
//! ties the subsystems together the same way for every request: cookies
//! and default headers are merged in, completion instrumentation is
//! installed, and the request is forwarded to the transport's priority
//! queue. A top-level [`HttpClient::run`] drains the queue, firing
//! deferred `after_run` hooks between drains until no work remains.
//!
//! Completion processing (statistics, cookie harvesting, `on_complete`
//! observers, custom-404 bookkeeping) is serialized by a single
//! client-scoped mutex; the only suspending operation permitted inside a
//! completion callback is enqueuing more requests.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, FROM, USER_AGENT};
use reqwest::Method;
use tracing::{debug, trace, warn};
use url::Url;

use crate::builder::{seeded_jar, HttpClientBuilder};
use crate::client::custom_404::Detector404;
use crate::config::ClientConfig;
use crate::cookies::{Cookie, CookieJar};
use crate::error::HttpClientError;
use crate::observable::{EventArgs, EventHandler, Observable};
use crate::request::{Request, RequestOptions, ResponseCallback};
use crate::response::Response;
use crate::stats::{StatCollector, Statistics};
use crate::transport::Transport;

/// Event names dispatched by the client.
pub mod events {
    pub const AFTER_RUN: &str = "after_run";
    pub const AFTER_EACH_RUN: &str = "after_each_run";
    pub const ON_QUEUE: &str = "on_queue";
    pub const ON_NEW_COOKIES: &str = "on_new_cookies";
    pub const ON_COMPLETE: &str = "on_complete";

    pub(crate) const ALL: &[&str] =
        &[AFTER_RUN, AFTER_EACH_RUN, ON_QUEUE, ON_NEW_COOKIES, ON_COMPLETE];
}

/// External platform fingerprinter invoked on each completed response.
pub type FingerprintHook = Arc<dyn Fn(&Response) + Send + Sync>;

/// Outcome of [`HttpClient::request`].
#[derive(Debug)]
pub enum Dispatched {
    /// The request was queued; carries its assigned id.
    Queued(u64),
    /// The request was blocking and already completed.
    Completed(Box<Response>),
}

impl Dispatched {
    pub fn id(&self) -> Option<u64> {
        match self {
            Dispatched::Queued(id) => Some(*id),
            Dispatched::Completed(_) => None,
        }
    }

    pub fn into_response(self) -> Option<Response> {
        match self {
            Dispatched::Queued(_) => None,
            Dispatched::Completed(response) => Some(*response),
        }
    }
}

struct MutableState {
    observers: Observable,
    jar: CookieJar,
    headers: HeaderMap,
}

pub(crate) struct ClientInner {
    pub(crate) config: ClientConfig,
    transport: Arc<dyn Transport>,
    blocking_transport: Arc<dyn Transport>,
    fingerprinter: Option<FingerprintHook>,
    pub(crate) stats: StatCollector,
    state: Mutex<MutableState>,
    // Serializes all completion processing across transport tasks.
    completion: Mutex<()>,
    pub(crate) detector: Mutex<Detector404>,
    next_request_id: AtomicU64,
    queue_size: AtomicUsize,
    running: AtomicBool,
}

/// Cheaply clonable handle to the engine. Construct one per scan and pass
/// handles around instead of reaching for global state.
#[derive(Clone)]
pub struct HttpClient {
    pub(crate) inner: Arc<ClientInner>,
}

impl HttpClient {
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::new()
    }

    pub fn new(config: ClientConfig) -> Result<Self, HttpClientError> {
        HttpClientBuilder::with_config(config).build()
    }

    pub(crate) fn from_parts(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        blocking_transport: Arc<dyn Transport>,
        fingerprinter: Option<FingerprintHook>,
        jar: CookieJar,
    ) -> Self {
        let headers = default_headers(&config);
        let detector = Detector404::new(
            config.custom_404_precision,
            config.custom_404_signature_threshold,
            config.custom_404_cache_size,
        );
        HttpClient {
            inner: Arc::new(ClientInner {
                config,
                transport,
                blocking_transport,
                fingerprinter,
                stats: StatCollector::new(),
                state: Mutex::new(MutableState {
                    observers: Observable::new(events::ALL),
                    jar,
                    headers,
                }),
                completion: Mutex::new(()),
                detector: Mutex::new(detector),
                next_request_id: AtomicU64::new(0),
                queue_size: AtomicUsize::new(0),
                running: AtomicBool::new(false),
            }),
        }
    }

    /// Builds and dispatches a request.
    ///
    /// Unless `no_cookie_jar` is set, jar cookies for the URL are merged
    /// *under* the option cookies; default headers merge under the option
    /// headers the same way. Blocking requests execute on a dedicated
    /// transport and return their [`Response`]; everything else is queued
    /// and an emergency run drains the backlog when it crosses the
    /// configured threshold while no run is active.
    pub async fn request(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<Dispatched, HttpClientError> {
        let request = self.build_request(url, options)?;
        self.inner
            .notify(events::ON_QUEUE, &EventArgs::Request(&request));

        if request.blocking {
            let response = self.execute_blocking(request).await?;
            return Ok(Dispatched::Completed(Box::new(response)));
        }

        let id = self.forward_request(request, true);
        self.maybe_emergency_run().await;
        Ok(Dispatched::Queued(id))
    }

    pub async fn get(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<Dispatched, HttpClientError> {
        self.request(url, options.method(Method::GET)).await
    }

    pub async fn post(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<Dispatched, HttpClientError> {
        self.request(url, options.method(Method::POST)).await
    }

    pub async fn trace(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<Dispatched, HttpClientError> {
        self.request(url, options.method(Method::TRACE)).await
    }

    pub async fn head(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<Dispatched, HttpClientError> {
        self.request(url, options.method(Method::HEAD)).await
    }

    pub async fn put(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<Dispatched, HttpClientError> {
        self.request(url, options.method(Method::PUT)).await
    }

    pub async fn delete(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<Dispatched, HttpClientError> {
        self.request(url, options.method(Method::DELETE)).await
    }

    /// GET shim sending `params` as cookies.
    pub async fn cookie<I, K, V>(&self, url: &str, params: I) -> Result<Dispatched, HttpClientError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.get(url, RequestOptions::new().cookies(params)).await
    }

    /// GET shim sending `params` as headers.
    pub async fn header<I, K, V>(&self, url: &str, params: I) -> Result<Dispatched, HttpClientError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.get(url, RequestOptions::new().headers(params)).await
    }

    /// Forwards a prebuilt request. Safe to call from completion callbacks
    /// and `after_run` hooks; an active run picks the request up on its
    /// next drain iteration.
    pub fn queue(&self, request: Request) -> u64 {
        self.inner
            .notify(events::ON_QUEUE, &EventArgs::Request(&request));
        self.forward_request(request, true)
    }

    /// Drains the queue in one burst.
    ///
    /// Each drain iteration empties the transport, then takes and fires
    /// the pending `after_run` hooks (which may enqueue more work or more
    /// hooks); the burst ends when both the queue and the hook list are
    /// empty. `after_each_run` observers fire once per burst and are
    /// retained. Misbehaving callbacks are isolated; they never halt the
    /// engine.
    pub async fn run(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            trace!("run already in progress; ignoring nested call");
            return;
        }

        debug!(
            "burst starting with {} queued requests",
            self.inner.queue_size.load(Ordering::SeqCst)
        );
        self.inner.stats.begin_burst();

        loop {
            self.inner.transport.run().await;

            let mut pending = self
                .inner
                .state
                .lock()
                .observers
                .take(events::AFTER_RUN)
                .unwrap_or_default();

            if self.inner.queue_size.load(Ordering::SeqCst) == 0 && pending.is_empty() {
                break;
            }

            // One-shot hooks: dispatched, never restored. Hooks they
            // register land in the observer list for the next iteration.
            Observable::dispatch(events::AFTER_RUN, &mut pending, &EventArgs::Empty);
        }

        self.inner.notify(events::AFTER_EACH_RUN, &EventArgs::Empty);
        self.prune_custom_404_cache();
        self.inner.stats.end_burst();
        self.inner.running.store(false, Ordering::SeqCst);
        debug!("burst finished");
    }

    /// Best-effort cancellation of queued and in-flight work.
    ///
    /// Queued requests are dropped without a response, so the pending
    /// count is folded to zero here; completions still in flight
    /// decrement saturatingly.
    pub fn abort(&self) {
        self.inner.transport.abort();
        self.inner.queue_size.store(0, Ordering::SeqCst);
    }

    /// Runs `scope` against a snapshot of the client's mutable state.
    ///
    /// Observers registered, cookies learned and headers changed inside
    /// the scope do not persist; statistics counters are value-copied and
    /// restored. Not safe against concurrent producers.
    pub async fn sandbox<F, Fut, R>(&self, scope: F) -> R
    where
        F: FnOnce(HttpClient) -> Fut,
        Fut: std::future::Future<Output = R>,
    {
        let (observers, jar, headers) = {
            let mut state = self.inner.state.lock();
            (
                std::mem::replace(&mut state.observers, Observable::new(events::ALL)),
                state.jar.clone(),
                state.headers.clone(),
            )
        };
        let counters = self.inner.stats.raw();

        let result = scope(self.clone()).await;

        {
            let mut state = self.inner.state.lock();
            state.observers = observers;
            state.jar = jar;
            state.headers = headers;
        }
        self.inner.stats.restore(&counters);
        result
    }

    /// Installs cookies into the jar.
    pub fn update_cookies<I>(&self, cookies: I)
    where
        I: IntoIterator<Item = Cookie>,
    {
        self.inner.state.lock().jar.update(cookies);
    }

    /// Harvests `Set-Cookie` headers from a response into the jar and
    /// fires `on_new_cookies`. Unparsable cookies are logged and skipped.
    pub fn parse_and_set_cookies(&self, response: &Response) {
        self.inner.parse_and_set_cookies(response);
    }

    /// Snapshot of the jar contents.
    pub fn cookies(&self) -> Vec<Cookie> {
        self.inner.state.lock().jar.cookies().to_vec()
    }

    /// Writes the jar to the configured file path.
    pub fn save_cookie_jar(&self) -> Result<(), HttpClientError> {
        let path = self.inner.config.cookie_jar_filepath.clone().ok_or_else(|| {
            HttpClientError::Configuration("no cookie jar file path configured".into())
        })?;
        self.inner.state.lock().jar.save(&path)
    }

    pub fn statistics(&self) -> Statistics {
        self.inner.stats.snapshot()
    }

    /// Number of forwarded requests not yet completed.
    pub fn pending_requests(&self) -> usize {
        self.inner.queue_size.load(Ordering::SeqCst)
    }

    /// Returns the client to its constructed state: aborts the transport,
    /// clears queue accounting, reseeds the cookie jar and default
    /// headers, drops custom-404 state and statistics, and, when
    /// `hooks_too` is set, every observer.
    pub fn reset(&self, hooks_too: bool) {
        self.inner.transport.abort();
        self.inner.blocking_transport.abort();
        self.inner.queue_size.store(0, Ordering::SeqCst);
        {
            let mut state = self.inner.state.lock();
            state.jar = seeded_jar(&self.inner.config);
            state.headers = default_headers(&self.inner.config);
            if hooks_too {
                state.observers.clear();
            }
        }
        self.inner.detector.lock().clear();
        self.inner.stats.reset();
        debug!("client reset (hooks_too: {hooks_too})");
    }

    /// Subscribes a raw handler to a declared event.
    pub fn observe(
        &self,
        event: &str,
        handler: EventHandler,
    ) -> Result<&Self, HttpClientError> {
        self.inner.state.lock().observers.subscribe(event, handler)?;
        Ok(self)
    }

    /// Defers `hook` until the current (or next) burst's queue drains.
    /// Fires once, then is discarded.
    pub fn after_run(&self, hook: impl FnOnce() + Send + 'static) -> &Self {
        let mut hook = Some(hook);
        self.inner.subscribe_declared(
            events::AFTER_RUN,
            Box::new(move |_| {
                if let Some(hook) = hook.take() {
                    hook();
                }
            }),
        );
        self
    }

    /// Fires at the end of every burst; retained across bursts.
    pub fn after_each_run(&self, mut hook: impl FnMut() + Send + 'static) -> &Self {
        self.inner
            .subscribe_declared(events::AFTER_EACH_RUN, Box::new(move |_| hook()));
        self
    }

    pub fn on_queue(&self, mut observer: impl FnMut(&Request) + Send + 'static) -> &Self {
        self.inner.subscribe_declared(
            events::ON_QUEUE,
            Box::new(move |args| {
                if let EventArgs::Request(request) = args {
                    observer(request);
                }
            }),
        );
        self
    }

    pub fn on_complete(&self, mut observer: impl FnMut(&Response) + Send + 'static) -> &Self {
        self.inner.subscribe_declared(
            events::ON_COMPLETE,
            Box::new(move |args| {
                if let EventArgs::Response(response) = args {
                    observer(response);
                }
            }),
        );
        self
    }

    pub fn on_new_cookies(
        &self,
        mut observer: impl FnMut(&[Cookie], &Response) + Send + 'static,
    ) -> &Self {
        self.inner.subscribe_declared(
            events::ON_NEW_COOKIES,
            Box::new(move |args| {
                if let EventArgs::NewCookies(cookies, response) = args {
                    observer(cookies, response);
                }
            }),
        );
        self
    }

    /// Drops every subscribed observer.
    pub fn clear_observers(&self) {
        self.inner.state.lock().observers.clear();
    }

    fn build_request(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<Request, HttpClientError> {
        if url.trim().is_empty() {
            return Err(HttpClientError::InvalidArgument("empty URL".into()));
        }
        let parsed = Url::parse(url)
            .map_err(|e| HttpClientError::InvalidArgument(format!("{url:?}: {e}")))?;

        let RequestOptions {
            method,
            headers: option_headers,
            body,
            parameters,
            cookies: option_cookies,
            no_cookie_jar,
            follow_location,
            high_priority,
            blocking,
            update_cookies,
            timeout,
            performer,
            callback,
        } = options;

        let mut request = Request::new(parsed);
        request.method = method.unwrap_or(Method::GET);
        request.body = body;
        request.parameters = parameters;
        request.follow_location = follow_location;
        request.high_priority = high_priority;
        request.blocking = blocking;
        request.update_cookies = update_cookies;
        request.timeout = timeout;
        request.performer = performer;

        // Jar cookies first so caller cookies override on name collision.
        let mut effective: Vec<(String, String)> = Vec::new();
        if !no_cookie_jar {
            let mut from_jar: Vec<(String, String)> = {
                let state = self.inner.state.lock();
                state.jar.for_url(request.url()).into_iter().collect()
            };
            from_jar.sort();
            effective.extend(from_jar);
        }
        effective.extend(option_cookies);
        request.set_cookies(effective);

        let mut headers = self.inner.state.lock().headers.clone();
        for (name, value) in option_headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!("skipping invalid header {name:?}"),
            }
        }
        request.headers = headers;

        if let Some(callback) = callback {
            request.on_complete(callback);
        }
        Ok(request)
    }

    /// Assigns the request id, installs completion instrumentation and
    /// hands the request to the transport, head-first when high-priority.
    pub(crate) fn forward_request(&self, request: Request, counted: bool) -> u64 {
        let request = self.instrument(request, counted);
        let id = request.id();

        trace!(
            "forwarding #{id} {} {} (priority: {})",
            request.method,
            request.url(),
            request.high_priority
        );
        if counted {
            self.inner.queue_size.fetch_add(1, Ordering::SeqCst);
        }
        if request.high_priority {
            self.inner.transport.queue_front(request);
        } else {
            self.inner.transport.queue_back(request);
        }
        id
    }

    fn instrument(&self, mut request: Request, counted: bool) -> Request {
        let id = self.inner.next_request_id.fetch_add(1, Ordering::SeqCst) + 1;
        request.set_id(id);
        self.inner.stats.increment_request_count();

        let caller_callbacks = request.take_callbacks();
        let weak = Arc::downgrade(&self.inner);
        request.on_complete(Box::new(move |response| {
            complete(&weak, caller_callbacks, counted, response);
        }));
        request
    }

    async fn maybe_emergency_run(&self) {
        if self.inner.queue_size.load(Ordering::SeqCst) >= self.inner.config.request_queue_size
            && !self.inner.running.load(Ordering::SeqCst)
        {
            debug!(
                "queue crossed {} pending requests; draining now",
                self.inner.config.request_queue_size
            );
            self.run().await;
        }
    }

    async fn execute_blocking(&self, mut request: Request) -> Result<Response, HttpClientError> {
        let (tx, rx) = kanal::bounded::<Response>(1);
        request.on_complete(Box::new(move |response| {
            let _ = tx.try_send(response.clone());
        }));

        let request = self.instrument(request, false);
        if request.high_priority {
            self.inner.blocking_transport.queue_front(request);
        } else {
            self.inner.blocking_transport.queue_back(request);
        }
        self.inner.blocking_transport.run().await;

        rx.to_async().recv().await.map_err(|_| {
            HttpClientError::Configuration("blocking transport dropped the request".into())
        })
    }
}

impl ClientInner {
    /// Dispatches an event on a taken handler list so handlers can
    /// re-enter the client (even to subscribe) without deadlocking.
    pub(crate) fn notify(&self, event: &'static str, args: &EventArgs<'_>) {
        let taken = self.state.lock().observers.take(event);
        if let Ok(mut handlers) = taken {
            if !handlers.is_empty() {
                Observable::dispatch(event, &mut handlers, args);
            }
            self.state.lock().observers.restore(event, handlers);
        }
    }

    fn subscribe_declared(&self, event: &'static str, handler: EventHandler) {
        if let Err(e) = self.state.lock().observers.subscribe(event, handler) {
            warn!("subscription to declared event failed: {e}");
        }
    }

    fn handle_completion(&self, counted: bool, response: &Response) {
        if counted {
            // Saturating: abort may already have folded the count to zero.
            let _ = self
                .queue_size
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        }
        self.stats.record_response(response);

        if let Some(fingerprint) = &self.fingerprinter {
            if catch_unwind(AssertUnwindSafe(|| fingerprint(response))).is_err() {
                warn!("platform fingerprinter panicked on #{}", response.request.id);
            }
        }

        self.notify(events::ON_COMPLETE, &EventArgs::Response(response));

        if response.request.update_cookies {
            self.parse_and_set_cookies(response);
        }

        trace!(
            "completed #{} with status {} ({} pending)",
            response.request.id,
            response.status,
            self.queue_size.load(Ordering::SeqCst)
        );
    }

    fn parse_and_set_cookies(&self, response: &Response) {
        let raw = response.set_cookie_headers();
        if raw.is_empty() {
            return;
        }

        let mut parsed = Vec::with_capacity(raw.len());
        for line in raw {
            match Cookie::parse_set_cookie(line, Some(&response.effective_url)) {
                Ok(cookie) => parsed.push(cookie),
                Err(e) => warn!("ignoring response cookie: {e}"),
            }
        }
        if parsed.is_empty() {
            return;
        }

        debug!(
            "harvested {} cookies from {}",
            parsed.len(),
            response.effective_url
        );
        self.state.lock().jar.update(parsed.iter().cloned());
        self.notify(
            events::ON_NEW_COOKIES,
            &EventArgs::NewCookies(&parsed, response),
        );
    }
}

// Runs the per-request callbacks and the client instrumentation for one
// delivered response, serialized by the completion mutex. Each caller
// callback is individually isolated.
fn complete(
    weak: &Weak<ClientInner>,
    callbacks: Vec<ResponseCallback>,
    counted: bool,
    response: &Response,
) {
    let Some(inner) = weak.upgrade() else {
        for callback in callbacks {
            let _ = catch_unwind(AssertUnwindSafe(|| callback(response)));
        }
        return;
    };

    let _serialized = inner.completion.lock();
    for callback in callbacks {
        if catch_unwind(AssertUnwindSafe(|| callback(response))).is_err() {
            warn!(
                "completion callback for #{} panicked; continuing",
                response.request.id
            );
        }
    }
    inner.handle_completion(counted, response);
}

pub(crate) fn default_headers(config: &ClientConfig) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&config.user_agent) {
        headers.insert(USER_AGENT, value);
    }
    if let Some(contact) = &config.authorized_by {
        if let Ok(value) = HeaderValue::from_str(contact) {
            headers.insert(FROM, value);
        }
    }
    for (name, value) in &config.request_headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!("skipping invalid configured header {name:?}"),
        }
    }
    headers
}
