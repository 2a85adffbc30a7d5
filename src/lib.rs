//! # audit-http
//!
//! Concurrent HTTP orchestration core for web-security audits.
//!
//! Provides the main components: the [`HttpClient`] orchestrator, the
//! [`Transport`] seam, a scoped [`CookieJar`], similarity-refined
//! [`Signature`]s and the custom-404 detector built on them.
//!
//! ## Example
//!
//! ```rust,ignore
//! use audit_http::{HttpClient, RequestOptions};
//!
//! async fn audit() -> Result<(), audit_http::HttpClientError> {
//!     let client = HttpClient::builder()
//!         .user_agent("audit/1.0")
//!         .authorized_by("security@example.com")
//!         .build()?;
//!
//!     client.on_complete(|response| {
//!         println!("{} -> {}", response.url, response.status);
//!     });
//!
//!     for path in ["/admin", "/backup", "/.git/config"] {
//!         let url = format!("http://target.example{path}");
//!         client.get(&url, RequestOptions::new()).await?;
//!     }
//!     client.run().await;
//!     println!("{}", client.statistics());
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod client;
pub mod config;
pub mod cookies;
pub mod error;
pub mod observable;
pub mod prelude;
pub mod request;
pub mod response;
pub mod signature;
pub mod stats;
pub mod transport;

pub use builder::HttpClientBuilder;
pub use client::{events, ClassificationCallback, Dispatched, FingerprintHook, HttpClient};
pub use config::ClientConfig;
pub use cookies::{Cookie, CookieJar};
pub use error::HttpClientError;
pub use observable::{EventArgs, EventHandler, Observable};
pub use request::{Request, RequestBody, RequestOptions, ResponseCallback};
pub use response::{RequestInfo, Response};
pub use signature::Signature;
pub use stats::Statistics;
pub use transport::{ReqwestTransport, Transport};

pub use async_trait::async_trait;
pub use url::Url;
