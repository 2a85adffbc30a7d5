//! Fluent construction of [`HttpClient`] instances.
//!
//! The builder validates the configuration, wires up the default
//! reqwest-backed transports (a concurrent one for the queue and a
//! dedicated one for blocking requests), seeds the cookie jar from the
//! configured defaults and, when a jar file path is set, from disk.
//! Custom [`Transport`] implementations can be injected for testing or
//! alternative backends.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::client::{FingerprintHook, HttpClient};
use crate::config::ClientConfig;
use crate::cookies::{parse_cookie_string, CookieJar};
use crate::error::HttpClientError;
use crate::response::Response;
use crate::transport::{ReqwestTransport, Transport};

pub struct HttpClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    blocking_transport: Option<Arc<dyn Transport>>,
    fingerprinter: Option<FingerprintHook>,
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        HttpClientBuilder {
            config: ClientConfig::default(),
            transport: None,
            blocking_transport: None,
            fingerprinter: None,
        }
    }
}

impl HttpClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ClientConfig) -> Self {
        HttpClientBuilder {
            config,
            ..Self::default()
        }
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Adds a default header applied to every request.
    pub fn request_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.request_headers.push((name.into(), value.into()));
        self
    }

    /// Contact of whoever authorized the scan; sent as the `From` header.
    pub fn authorized_by(mut self, contact: impl Into<String>) -> Self {
        self.config.authorized_by = Some(contact.into());
        self
    }

    pub fn cookie_jar_filepath(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.cookie_jar_filepath = Some(path.into());
        self
    }

    /// Seeds an ambient cookie.
    pub fn cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.cookies.push((name.into(), value.into()));
        self
    }

    /// Seeds ambient cookies from a `k1=v1; k2=v2` string.
    pub fn cookie_string(mut self, raw: impl Into<String>) -> Self {
        self.config.cookie_string = Some(raw.into());
        self
    }

    pub fn max_concurrency(mut self, limit: usize) -> Self {
        self.config.max_concurrency = limit;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Queue length past which an emergency run drains the backlog.
    pub fn request_queue_size(mut self, size: usize) -> Self {
        self.config.request_queue_size = size;
        self
    }

    pub fn custom_404_signature_threshold(mut self, threshold: f64) -> Self {
        self.config.custom_404_signature_threshold = threshold;
        self
    }

    pub fn custom_404_cache_size(mut self, size: usize) -> Self {
        self.config.custom_404_cache_size = size;
        self
    }

    pub fn custom_404_precision(mut self, precision: usize) -> Self {
        self.config.custom_404_precision = precision;
        self
    }

    /// Replaces the queueing transport.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replaces the transport used for blocking requests.
    pub fn blocking_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.blocking_transport = Some(transport);
        self
    }

    /// Installs an external platform fingerprinter invoked on every
    /// completed response.
    pub fn platform_fingerprinter(
        mut self,
        hook: impl Fn(&Response) + Send + Sync + 'static,
    ) -> Self {
        self.fingerprinter = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> Result<HttpClient, HttpClientError> {
        self.validate()?;
        let config = self.config;

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(config.request_timeout)?),
        };
        transport.set_max_concurrency(config.max_concurrency);

        let blocking_transport: Arc<dyn Transport> = match self.blocking_transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(config.request_timeout)?),
        };

        let mut jar = seeded_jar(&config);
        if let Some(path) = &config.cookie_jar_filepath {
            if path.exists() {
                match CookieJar::load(path) {
                    Ok(loaded) => jar.update(loaded.cookies().iter().cloned()),
                    Err(e) => warn!("failed to load cookie jar from {}: {e}", path.display()),
                }
            }
        }

        Ok(HttpClient::from_parts(
            config,
            transport,
            blocking_transport,
            self.fingerprinter,
            jar,
        ))
    }

    fn validate(&self) -> Result<(), HttpClientError> {
        if self.config.max_concurrency == 0 {
            return Err(HttpClientError::Configuration(
                "max_concurrency must be greater than 0".into(),
            ));
        }
        if self.config.request_queue_size == 0 {
            return Err(HttpClientError::Configuration(
                "request_queue_size must be greater than 0".into(),
            ));
        }
        let threshold = self.config.custom_404_signature_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(HttpClientError::Configuration(
                "custom_404_signature_threshold must be within [0, 1]".into(),
            ));
        }
        if self.config.custom_404_precision == 0 {
            return Err(HttpClientError::Configuration(
                "custom_404_precision must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Jar pre-populated with the configured ambient cookies.
pub(crate) fn seeded_jar(config: &ClientConfig) -> CookieJar {
    let mut jar = CookieJar::new();
    jar.update_pairs(
        config
            .cookies
            .iter()
            .map(|(name, value)| (name.clone(), value.clone())),
    );
    if let Some(raw) = &config.cookie_string {
        jar.update(parse_cookie_string(raw));
    }
    jar
}
