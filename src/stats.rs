//! Client statistics: monotonic counters plus burst/total sliding views.
//!
//! Counters are updated with atomic operations from inside the serialized
//! completion section and read through [`StatCollector::snapshot`], so a
//! `statistics()` call never observes torn values. Burst counters reset at
//! the start of each `run`; totals never reset (except on a full client
//! reset).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;

use crate::response::Response;

/// Collects and stores the engine's operational counters.
#[derive(Debug, Default)]
pub struct StatCollector {
    request_count: AtomicUsize,
    response_count: AtomicUsize,
    time_out_count: AtomicUsize,

    burst_response_count: AtomicUsize,
    burst_response_time_us: AtomicU64,
    total_response_time_us: AtomicU64,

    total_runtime_us: AtomicU64,
    last_burst_runtime_us: AtomicU64,
    burst_started: Mutex<Option<Instant>>,

    response_status_counts: DashMap<u16, usize>,
}

/// Point-in-time view of every named counter and derived rate.
///
/// Rates are 0 whenever their denominator is 0.
#[derive(Debug, Clone, Serialize)]
pub struct Statistics {
    pub request_count: usize,
    pub response_count: usize,
    pub time_out_count: usize,
    pub total_runtime: f64,
    pub burst_runtime: f64,
    pub total_average_response_time: f64,
    pub burst_average_response_time: f64,
    pub total_responses_per_second: f64,
    pub burst_responses_per_second: f64,
    pub response_status_counts: HashMap<u16, usize>,
}

// Raw counter values, used by the sandbox to value-copy and restore.
#[derive(Debug, Clone, Default)]
pub(crate) struct RawStats {
    request_count: usize,
    response_count: usize,
    time_out_count: usize,
    burst_response_count: usize,
    burst_response_time_us: u64,
    total_response_time_us: u64,
    total_runtime_us: u64,
    last_burst_runtime_us: u64,
    response_status_counts: HashMap<u16, usize>,
}

impl StatCollector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn increment_request_count(&self) {
        self.request_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Accounts one delivered response against burst and total views.
    pub(crate) fn record_response(&self, response: &Response) {
        self.response_count.fetch_add(1, Ordering::SeqCst);
        self.burst_response_count.fetch_add(1, Ordering::SeqCst);

        let micros = response.time.as_micros() as u64;
        self.burst_response_time_us.fetch_add(micros, Ordering::SeqCst);
        self.total_response_time_us.fetch_add(micros, Ordering::SeqCst);

        *self
            .response_status_counts
            .entry(response.status)
            .or_insert(0) += 1;

        if response.timed_out {
            self.time_out_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Opens a burst window: resets the burst view and starts its clock.
    pub(crate) fn begin_burst(&self) {
        self.burst_response_count.store(0, Ordering::SeqCst);
        self.burst_response_time_us.store(0, Ordering::SeqCst);
        *self.burst_started.lock() = Some(Instant::now());
    }

    /// Closes the burst window, folding its runtime into the total.
    pub(crate) fn end_burst(&self) {
        if let Some(started) = self.burst_started.lock().take() {
            let elapsed = started.elapsed().as_micros() as u64;
            self.last_burst_runtime_us.store(elapsed, Ordering::SeqCst);
            self.total_runtime_us.fetch_add(elapsed, Ordering::SeqCst);
        }
    }

    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }

    pub fn response_count(&self) -> usize {
        self.response_count.load(Ordering::SeqCst)
    }

    pub fn time_out_count(&self) -> usize {
        self.time_out_count.load(Ordering::SeqCst)
    }

    /// Snapshot of every counter and derived rate.
    pub fn snapshot(&self) -> Statistics {
        let in_flight_burst_us = self
            .burst_started
            .lock()
            .as_ref()
            .map(|started| started.elapsed().as_micros() as u64);
        let burst_runtime_us =
            in_flight_burst_us.unwrap_or_else(|| self.last_burst_runtime_us.load(Ordering::SeqCst));
        let total_runtime_us =
            self.total_runtime_us.load(Ordering::SeqCst) + in_flight_burst_us.unwrap_or(0);

        let response_count = self.response_count.load(Ordering::SeqCst);
        let burst_responses = self.burst_response_count.load(Ordering::SeqCst);
        let total_time_us = self.total_response_time_us.load(Ordering::SeqCst);
        let burst_time_us = self.burst_response_time_us.load(Ordering::SeqCst);

        let total_runtime = Duration::from_micros(total_runtime_us).as_secs_f64();
        let burst_runtime = Duration::from_micros(burst_runtime_us).as_secs_f64();

        Statistics {
            request_count: self.request_count.load(Ordering::SeqCst),
            response_count,
            time_out_count: self.time_out_count.load(Ordering::SeqCst),
            total_runtime,
            burst_runtime,
            total_average_response_time: ratio(
                Duration::from_micros(total_time_us).as_secs_f64(),
                response_count as f64,
            ),
            burst_average_response_time: ratio(
                Duration::from_micros(burst_time_us).as_secs_f64(),
                burst_responses as f64,
            ),
            total_responses_per_second: ratio(response_count as f64, total_runtime),
            burst_responses_per_second: ratio(burst_responses as f64, burst_runtime),
            response_status_counts: self
                .response_status_counts
                .iter()
                .map(|entry| (*entry.key(), *entry.value()))
                .collect(),
        }
    }

    pub(crate) fn raw(&self) -> RawStats {
        RawStats {
            request_count: self.request_count.load(Ordering::SeqCst),
            response_count: self.response_count.load(Ordering::SeqCst),
            time_out_count: self.time_out_count.load(Ordering::SeqCst),
            burst_response_count: self.burst_response_count.load(Ordering::SeqCst),
            burst_response_time_us: self.burst_response_time_us.load(Ordering::SeqCst),
            total_response_time_us: self.total_response_time_us.load(Ordering::SeqCst),
            total_runtime_us: self.total_runtime_us.load(Ordering::SeqCst),
            last_burst_runtime_us: self.last_burst_runtime_us.load(Ordering::SeqCst),
            response_status_counts: self
                .response_status_counts
                .iter()
                .map(|entry| (*entry.key(), *entry.value()))
                .collect(),
        }
    }

    pub(crate) fn restore(&self, raw: &RawStats) {
        self.request_count.store(raw.request_count, Ordering::SeqCst);
        self.response_count.store(raw.response_count, Ordering::SeqCst);
        self.time_out_count.store(raw.time_out_count, Ordering::SeqCst);
        self.burst_response_count
            .store(raw.burst_response_count, Ordering::SeqCst);
        self.burst_response_time_us
            .store(raw.burst_response_time_us, Ordering::SeqCst);
        self.total_response_time_us
            .store(raw.total_response_time_us, Ordering::SeqCst);
        self.total_runtime_us.store(raw.total_runtime_us, Ordering::SeqCst);
        self.last_burst_runtime_us
            .store(raw.last_burst_runtime_us, Ordering::SeqCst);
        self.response_status_counts.clear();
        for (status, count) in &raw.response_status_counts {
            self.response_status_counts.insert(*status, *count);
        }
    }

    pub(crate) fn reset(&self) {
        self.restore(&RawStats::default());
        *self.burst_started.lock() = None;
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

impl std::fmt::Display for Statistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "requests  : {}", self.request_count)?;
        writeln!(
            f,
            "responses : {} ({} timed out)",
            self.response_count, self.time_out_count
        )?;
        writeln!(
            f,
            "runtime   : total {:.2}s, burst {:.2}s",
            self.total_runtime, self.burst_runtime
        )?;
        writeln!(
            f,
            "rates     : {:.2} resp/s total, {:.2} resp/s burst",
            self.total_responses_per_second, self.burst_responses_per_second
        )
    }
}
