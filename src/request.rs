//! Request value type and the option vocabulary accepted by the client.

use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::Method;
use url::Url;

use crate::response::{RequestInfo, Response};

/// Per-request completion callback. Each dispatched request receives
/// exactly one response, so callbacks are consumed on delivery.
pub type ResponseCallback = Box<dyn FnOnce(&Response) + Send + 'static>;

/// Payload of a request that carries one.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Bytes(Vec<u8>),
    Form(Vec<(String, String)>),
}

/// A single outbound request.
///
/// Ownership moves into the transport at dispatch, which freezes the
/// effective configuration; the `id` is assigned by the client when the
/// request is forwarded and is monotonic within one client.
pub struct Request {
    pub(crate) id: u64,
    url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<RequestBody>,
    /// Query parameters for bodyless verbs, form fields for POST/PUT.
    pub parameters: Vec<(String, String)>,
    /// Effective cookies, already merged by the client.
    pub cookies: Vec<(String, String)>,
    pub follow_location: bool,
    pub high_priority: bool,
    pub blocking: bool,
    pub update_cookies: bool,
    pub timeout: Option<Duration>,
    /// Opaque owner tag carried into the response.
    pub performer: Option<String>,
    callbacks: Vec<ResponseCallback>,
}

impl Request {
    pub fn new(url: Url) -> Self {
        Request {
            id: 0,
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
            parameters: Vec::new(),
            cookies: Vec::new(),
            follow_location: false,
            high_priority: false,
            blocking: false,
            update_cookies: false,
            timeout: None,
            performer: None,
            callbacks: Vec::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Appends a completion callback; callbacks run in registration order.
    pub fn on_complete(&mut self, callback: ResponseCallback) {
        self.callbacks.push(callback);
    }

    /// Removes the callback chain for delivery. Transports call this once
    /// per request, right before invoking the callbacks with the response.
    pub fn take_callbacks(&mut self) -> Vec<ResponseCallback> {
        std::mem::take(&mut self.callbacks)
    }

    pub(crate) fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    /// Replaces the effective cookie set, last write per name winning.
    pub fn set_cookies<I, K, V>(&mut self, pairs: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.cookies.clear();
        for (name, value) in pairs {
            let name = name.into();
            let value = value.into();
            match self.cookies.iter_mut().find(|(n, _)| *n == name) {
                Some(slot) => slot.1 = value,
                None => self.cookies.push((name, value)),
            }
        }
    }

    /// `Cookie` header value for the effective cookie set.
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// Metadata snapshot carried into the response.
    pub fn info(&self) -> RequestInfo {
        RequestInfo {
            id: self.id,
            method: self.method.clone(),
            url: self.url.clone(),
            performer: self.performer.clone(),
            high_priority: self.high_priority,
            update_cookies: self.update_cookies,
        }
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("high_priority", &self.high_priority)
            .field("blocking", &self.blocking)
            .field("callbacks", &self.callbacks.len())
            .finish_non_exhaustive()
    }
}

/// Options recognized by [`crate::HttpClient::request`] and the verb shims.
#[derive(Default)]
pub struct RequestOptions {
    pub method: Option<Method>,
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestBody>,
    pub parameters: Vec<(String, String)>,
    pub cookies: Vec<(String, String)>,
    pub no_cookie_jar: bool,
    pub follow_location: bool,
    pub high_priority: bool,
    pub blocking: bool,
    pub update_cookies: bool,
    pub timeout: Option<Duration>,
    pub performer: Option<String>,
    pub(crate) callback: Option<ResponseCallback>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn headers<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(pairs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.push((name.into(), value.into()));
        self
    }

    pub fn cookies<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.cookies
            .extend(pairs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.push((name.into(), value.into()));
        self
    }

    pub fn parameters<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.parameters
            .extend(pairs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn body_bytes(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.body = Some(RequestBody::Bytes(bytes.into()));
        self
    }

    pub fn form<I, K, V>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.body = Some(RequestBody::Form(
            fields.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        ));
        self
    }

    pub fn no_cookie_jar(mut self) -> Self {
        self.no_cookie_jar = true;
        self
    }

    pub fn follow_location(mut self, follow: bool) -> Self {
        self.follow_location = follow;
        self
    }

    pub fn high_priority(mut self) -> Self {
        self.high_priority = true;
        self
    }

    pub fn blocking(mut self) -> Self {
        self.blocking = true;
        self
    }

    pub fn update_cookies(mut self, update: bool) -> Self {
        self.update_cookies = update;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn timeout_ms(self, ms: u64) -> Self {
        self.timeout(Duration::from_millis(ms))
    }

    pub fn performer(mut self, tag: impl Into<String>) -> Self {
        self.performer = Some(tag.into());
        self
    }

    /// Attaches the caller's completion callback.
    pub fn on_complete(mut self, callback: impl FnOnce(&Response) + Send + 'static) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_header_joins_pairs() {
        let mut request = Request::new(Url::parse("http://h/p").unwrap());
        assert_eq!(request.cookie_header(), None);

        request.set_cookies([("a", "1"), ("b", "2")]);
        assert_eq!(request.cookie_header().as_deref(), Some("a=1; b=2"));
    }

    #[test]
    fn set_cookies_deduplicates_by_name() {
        let mut request = Request::new(Url::parse("http://h/p").unwrap());
        request.set_cookies([("a", "1"), ("b", "2"), ("a", "3")]);
        assert_eq!(request.cookies, vec![("a".into(), "3".into()), ("b".into(), "2".into())]);
    }

    #[test]
    fn options_default_to_plain_get() {
        let options = RequestOptions::new();
        assert!(options.method.is_none());
        assert!(!options.high_priority);
        assert!(!options.blocking);
        assert!(!options.no_cookie_jar);
        assert!(options.timeout.is_none());
    }
}
