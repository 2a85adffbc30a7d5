use thiserror::Error;

/// Error taxonomy of the HTTP engine.
///
/// Only programmer errors surface through this type. Transport failures and
/// timeouts are reported as [`crate::Response`] values with `status == 0`,
/// and cookie or observer faults are isolated and logged where they occur.
#[derive(Error, Debug)]
pub enum HttpClientError {
    /// A caller supplied an unusable argument (empty or malformed URL).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Subscription or dispatch targeted an event name that was never declared.
    #[error("unknown event: {0}")]
    UnknownEvent(String),

    /// The client was configured with values it cannot operate on.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Reading or writing persisted state (cookie jar file) failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A cookie could not be parsed. Raised only from explicit parse entry
    /// points; response harvesting logs and skips instead.
    #[error("cookie parse error: {0}")]
    CookieParse(String),
}
