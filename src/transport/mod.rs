//! Transport seam between the client and whatever moves bytes.
//!
//! The client only requires the small contract below: a two-ended queue,
//! a drain operation that runs queued requests with bounded parallelism
//! and invokes each request's completion callbacks as responses arrive,
//! best-effort abort, and an adjustable concurrency cap. Transport
//! failures are never errors; they surface as responses with
//! `status == 0`.

mod reqwest_transport;

pub use reqwest_transport::ReqwestTransport;

use async_trait::async_trait;

use crate::request::Request;

/// A multi-request transport.
///
/// Every dispatched request yields exactly one [`crate::Response`],
/// delivered through the request's own completion callbacks.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Enqueues at the tail.
    fn queue_back(&self, request: Request);

    /// Enqueues at the head (high-priority path).
    fn queue_front(&self, request: Request);

    /// Drains the queue, keeping up to `max_concurrency` requests in
    /// flight; returns once the queue is empty and all in-flight requests
    /// have completed.
    async fn run(&self);

    /// Best-effort cancellation: drops queued requests and stops
    /// dispatching. In-flight completion callbacks may still execute.
    fn abort(&self);

    fn set_max_concurrency(&self, limit: usize);

    fn max_concurrency(&self) -> usize;
}
