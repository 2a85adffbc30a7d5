//! Client configuration and engine-wide defaults.

use std::path::PathBuf;
use std::time::Duration;

/// Default number of requests the transport keeps in flight.
pub const DEFAULT_MAX_CONCURRENCY: usize = 20;
/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(60_000);
/// Queue length past which an emergency run drains the backlog.
pub const DEFAULT_REQUEST_QUEUE_SIZE: usize = 500;
/// Maximum number of retained custom-404 directory records.
pub const CUSTOM_404_CACHE_SIZE: usize = 50;
/// Similarity threshold for custom-404 signatures.
pub const CUSTOM_404_SIGNATURE_THRESHOLD: f64 = 0.1;
/// Probe repetitions per custom-404 generator.
pub const CUSTOM_404_PRECISION: usize = 2;

/// Configuration of an [`crate::HttpClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub user_agent: String,
    /// Headers applied to every request; caller options override per name.
    pub request_headers: Vec<(String, String)>,
    /// Contact of whoever authorized the scan; sent as the `From` header.
    pub authorized_by: Option<String>,
    /// When set, the cookie jar is loaded from and saved to this file.
    pub cookie_jar_filepath: Option<PathBuf>,
    /// Ambient cookies seeded into the jar at construction.
    pub cookies: Vec<(String, String)>,
    /// Ambient cookies in `k1=v1; k2=v2` form, merged after `cookies`.
    pub cookie_string: Option<String>,
    pub max_concurrency: usize,
    pub request_timeout: Duration,
    /// Emergency-run threshold for the pending-request queue.
    pub request_queue_size: usize,
    pub custom_404_signature_threshold: f64,
    pub custom_404_cache_size: usize,
    pub custom_404_precision: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            user_agent: concat!("audit-http/", env!("CARGO_PKG_VERSION")).to_string(),
            request_headers: Vec::new(),
            authorized_by: None,
            cookie_jar_filepath: None,
            cookies: Vec::new(),
            cookie_string: None,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            request_timeout: DEFAULT_TIMEOUT,
            request_queue_size: DEFAULT_REQUEST_QUEUE_SIZE,
            custom_404_signature_threshold: CUSTOM_404_SIGNATURE_THRESHOLD,
            custom_404_cache_size: CUSTOM_404_CACHE_SIZE,
            custom_404_precision: CUSTOM_404_PRECISION,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_engine_constants() {
        let config = ClientConfig::default();
        assert_eq!(config.max_concurrency, 20);
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.custom_404_cache_size, 50);
        assert_eq!(config.custom_404_precision, 2);
        assert!(config.user_agent.starts_with("audit-http/"));
    }
}
