//! Response value type delivered once per dispatched request.

use std::time::Duration;

use reqwest::header::{HeaderMap, SET_COOKIE};
use reqwest::Method;
use url::Url;

/// Non-owning snapshot of the request a response answers.
///
/// Responses must not keep their originating [`crate::Request`] alive (a
/// request owns its callbacks, which own client handles), so they carry a
/// plain metadata copy instead.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub id: u64,
    pub method: Method,
    pub url: Url,
    pub performer: Option<String>,
    pub high_priority: bool,
    pub update_cookies: bool,
}

/// Result of one dispatched request.
///
/// `status == 0` signals a transport-level failure; `timed_out`
/// distinguishes expiry from other failures. Exactly one response is
/// delivered per dispatched request.
#[derive(Debug, Clone)]
pub struct Response {
    /// URL the request was issued for.
    pub url: Url,
    /// Final URL after any followed redirects.
    pub effective_url: Url,
    /// HTTP status code, or 0 on transport failure/timeout.
    pub status: u16,
    /// Transport-level diagnostic for `status == 0` responses.
    pub transport_message: Option<String>,
    pub headers: HeaderMap,
    pub body: String,
    /// Round-trip time.
    pub time: Duration,
    pub timed_out: bool,
    pub request: RequestInfo,
}

impl Response {
    /// Builds the response for a request the transport could not complete.
    pub fn transport_failure(
        request: RequestInfo,
        message: impl Into<String>,
        timed_out: bool,
        time: Duration,
    ) -> Self {
        let url = request.url.clone();
        Response {
            effective_url: url.clone(),
            url,
            status: 0,
            transport_message: Some(message.into()),
            headers: HeaderMap::new(),
            body: String::new(),
            time,
            timed_out,
            request,
        }
    }

    pub fn is_transport_failure(&self) -> bool {
        self.status == 0
    }

    pub fn is_timed_out(&self) -> bool {
        self.timed_out
    }

    /// Raw `Set-Cookie` header values, in response order.
    pub fn set_cookie_headers(&self) -> Vec<&str> {
        self.headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect()
    }
}
