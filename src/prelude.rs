//! A "prelude" for users of the `audit-http` crate.
//!
//! This prelude re-exports the most commonly used types and traits so
//! that they can be easily imported.
//!
//! # Example
//!
//! ```
//! use audit_http::prelude::*;
//! ```

pub use crate::{
    // Core structs
    HttpClient,
    HttpClientBuilder,
    Request,
    RequestOptions,
    Response,
    // Core traits
    Transport,
    // Essential re-exports for trait implementation
    async_trait,
    Url,
};

pub use crate::error::HttpClientError;
