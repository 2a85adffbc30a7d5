//! # Client Module
//!
//! The orchestrator that owns configuration, statistics, observers, the
//! cookie jar and the custom-404 detector, and drives the transport.
//!
//! ## Internal layout
//!
//! - `core`: the [`HttpClient`] itself: request building, completion
//!   instrumentation, the burst drain loop, sandboxing and the public API
//! - `custom_404`: directory fingerprinting and soft-404 classification

mod core;
mod custom_404;

pub use self::core::{events, Dispatched, FingerprintHook, HttpClient};
pub use self::custom_404::ClassificationCallback;
