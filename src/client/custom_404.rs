//! Custom-404 detection.
//!
//! Many applications answer missing paths with a styled page and a
//! successful status. To classify such soft 404s, the detector
//! fingerprints each directory once: it fires a batch of requests for
//! paths that cannot exist, builds a refined [`Signature`] per probe
//! shape, and afterwards answers "does this body look like that
//! directory's not-found page" for arbitrary responses. Concurrent
//! classification requests for a directory whose fingerprinting is under
//! way are parked and settled in one go when the last probe lands.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use moka::sync::Cache;
use rand::Rng;
use tracing::{debug, trace, warn};
use url::Url;

use crate::client::core::{ClientInner, HttpClient};
use crate::request::Request;
use crate::response::Response;
use crate::signature::Signature;

/// Receives the boolean classification verdict exactly once.
pub type ClassificationCallback = Box<dyn FnOnce(bool) + Send + 'static>;

// One probe shape per entry: random file with extension, random
// extensionless path, both again in the parent directory, and a random
// sub-directory.
const GENERATOR_COUNT: usize = 5;

pub(crate) struct Detector404 {
    records: HashMap<String, DirectoryRecord>,
    // Directories whose probes all came back as real 404s.
    regular_handlers: Cache<String, ()>,
    touch: u64,
    precision: usize,
    signature_threshold: f64,
}

struct DirectoryRecord {
    analyzed: bool,
    in_progress: bool,
    waiting: Vec<Waiter>,
    signatures: Vec<ProbeSignature>,
    probes_expected: usize,
    probes_done: usize,
    real_404s: usize,
    last_touch: u64,
}

#[derive(Default)]
struct ProbeSignature {
    /// First sample for this probe shape.
    body: Option<Signature>,
    /// Accumulated refinement across the remaining samples.
    rdiff: Option<Signature>,
}

struct Waiter {
    body: String,
    callback: ClassificationCallback,
}

impl DirectoryRecord {
    fn new(touch: u64) -> Self {
        DirectoryRecord {
            analyzed: false,
            in_progress: false,
            waiting: Vec::new(),
            signatures: (0..GENERATOR_COUNT).map(|_| ProbeSignature::default()).collect(),
            probes_expected: 0,
            probes_done: 0,
            real_404s: 0,
            last_touch: touch,
        }
    }

    fn matches_404(&self, body: &str) -> bool {
        self.signatures.iter().any(|sig| match (&sig.body, &sig.rdiff) {
            (Some(reference), Some(rdiff)) => rdiff.similar(&reference.refine(body)),
            _ => false,
        })
    }
}

impl Detector404 {
    pub(crate) fn new(precision: usize, signature_threshold: f64, cache_size: usize) -> Self {
        Detector404 {
            records: HashMap::new(),
            regular_handlers: Cache::new((cache_size.max(1) * 2) as u64),
            touch: 0,
            precision: precision.max(1),
            signature_threshold,
        }
    }

    /// Whether `body` matches the not-found fingerprint of `key`'s
    /// directory, or failing that, of any other analyzed directory.
    fn classify(&self, key: &str, body: &str) -> bool {
        if let Some(record) = self.records.get(key) {
            if record.matches_404(body) {
                return true;
            }
        }
        self.records
            .iter()
            .any(|(other, record)| other != key && record.analyzed && record.matches_404(body))
    }

    /// Evicts analyzed records, least-recently-touched first, until the
    /// cache fits. In-progress records are never evicted.
    fn prune(&mut self, cap: usize) {
        while self.records.len() > cap {
            let victim = self
                .records
                .iter()
                .filter(|(_, record)| record.analyzed && !record.in_progress)
                .min_by_key(|(_, record)| record.last_touch)
                .map(|(key, _)| key.clone());
            match victim {
                Some(key) => {
                    self.records.remove(&key);
                    trace!("evicted custom-404 record for {key}");
                }
                None => break,
            }
        }
    }

    pub(crate) fn clear(&mut self) {
        self.records.clear();
        self.regular_handlers.invalidate_all();
        self.touch = 0;
    }
}

impl HttpClient {
    /// Classifies `response` as a custom 404 or not, invoking `callback`
    /// with the verdict exactly once.
    ///
    /// The first call for a directory launches the probe batch
    /// (high-priority, redirect-following GETs through this client's own
    /// queue); further calls for the same directory are parked until the
    /// batch completes, so concurrent classification never multiplies
    /// probe traffic.
    pub fn custom_404(&self, response: &Response, callback: ClassificationCallback) {
        let key = url_for_custom_404(&response.url);
        let body = response.body.clone();

        let precision = {
            let mut detector = self.inner.detector.lock();
            detector.touch += 1;
            let touch = detector.touch;
            let precision = detector.precision;

            let record = detector
                .records
                .entry(key.clone())
                .or_insert_with(|| DirectoryRecord::new(touch));
            record.last_touch = touch;

            if record.in_progress {
                trace!("custom-404 analysis of {key} in progress; parking waiter");
                record.waiting.push(Waiter { body, callback });
                return;
            }
            if record.analyzed {
                let verdict = detector.classify(&key, &body);
                drop(detector);
                settle(callback, verdict);
                return;
            }

            record.in_progress = true;
            record.probes_expected = GENERATOR_COUNT * precision;
            record.waiting.push(Waiter { body, callback });
            precision
        };

        debug!(
            "fingerprinting {key} with {} probes",
            GENERATOR_COUNT * precision
        );
        for (generator, probe_url) in probe_urls(&response.url, precision) {
            let weak = Arc::downgrade(&self.inner);
            let key = key.clone();
            let mut probe = Request::new(probe_url);
            probe.high_priority = true;
            probe.follow_location = true;
            probe.performer = Some("custom-404".into());
            probe.on_complete(Box::new(move |probe_response| {
                if let Some(inner) = weak.upgrade() {
                    record_probe(&inner, &key, generator, probe_response);
                }
            }));
            self.queue(probe);
        }
    }

    /// Whether the directory of `url` has completed fingerprinting.
    pub fn checked_for_custom_404(&self, url: &Url) -> bool {
        let key = url_for_custom_404(url);
        self.inner
            .detector
            .lock()
            .records
            .get(&key)
            .is_some_and(|record| record.analyzed)
    }

    /// Whether responses under `url`'s directory still require
    /// body classification: true until the directory is analyzed, and
    /// afterwards only when it turned out to serve a custom handler.
    pub fn needs_custom_404_check(&self, url: &Url) -> bool {
        let key = url_for_custom_404(url);
        let detector = self.inner.detector.lock();
        match detector.records.get(&key) {
            Some(record) if record.analyzed => !detector.regular_handlers.contains_key(&key),
            _ => true,
        }
    }

    pub(crate) fn prune_custom_404_cache(&self) {
        let cap = self.inner.config.custom_404_cache_size;
        self.inner.detector.lock().prune(cap);
    }
}

fn record_probe(inner: &Arc<ClientInner>, key: &str, generator: usize, response: &Response) {
    let settled = {
        let mut detector = inner.detector.lock();
        let threshold = detector.signature_threshold;
        let Some(record) = detector.records.get_mut(key) else {
            return;
        };

        let slot = &mut record.signatures[generator];
        match &slot.body {
            None => slot.body = Some(Signature::with_threshold(&response.body, threshold)),
            Some(reference) => slot.rdiff = Some(reference.refine(&response.body)),
        }

        if response.status == 404 {
            record.real_404s += 1;
        }
        record.probes_done += 1;
        trace!(
            "custom-404 probe {}/{} for {key} returned {}",
            record.probes_done,
            record.probes_expected,
            response.status
        );
        if record.probes_done < record.probes_expected {
            return;
        }

        record.analyzed = true;
        record.in_progress = false;
        let all_real = record.real_404s == record.probes_expected;
        let waiters = std::mem::take(&mut record.waiting);

        if all_real {
            debug!("{key} serves standard 404s; skipping body checks there");
            detector.regular_handlers.insert(key.to_string(), ());
        }

        waiters
            .into_iter()
            .map(|waiter| {
                let verdict = detector.classify(key, &waiter.body);
                (waiter.callback, verdict)
            })
            .collect::<Vec<_>>()
    };

    for (callback, verdict) in settled {
        settle(callback, verdict);
    }
}

fn settle(callback: ClassificationCallback, verdict: bool) {
    if catch_unwind(AssertUnwindSafe(|| callback(verdict))).is_err() {
        warn!("custom-404 classification callback panicked");
    }
}

/// Canonical directory key for custom-404 state.
///
/// URLs whose last path segment carries an extension key on their own
/// directory; extensionless URLs key one level up, since the segment
/// itself may be a directory the server routes dynamically.
pub(crate) fn url_for_custom_404(url: &Url) -> String {
    let path = url.path();
    let dir = up_to_path(path);
    let last_segment = &path[dir.len()..];
    let key_path = if has_extension(last_segment) {
        dir.to_string()
    } else {
        parent_of(dir)
    };

    let mut key = format!("{}://{}", url.scheme(), url.host_str().unwrap_or_default());
    if let Some(port) = url.port() {
        key.push_str(&format!(":{port}"));
    }
    key.push_str(&key_path);
    key
}

fn probe_urls(url: &Url, precision: usize) -> Vec<(usize, Url)> {
    let dir = up_to_path(url.path()).to_string();
    let parent = parent_of(&dir);

    let mut probes = Vec::with_capacity(GENERATOR_COUNT * precision);
    for _ in 0..precision {
        let paths = [
            format!("{dir}{}.{}", token(), extension(precision)),
            format!("{dir}{}", token()),
            format!("{parent}{}", token()),
            format!("{parent}{}.{}", token(), extension(precision)),
            format!("{dir}{}/", token()),
        ];
        for (generator, path) in paths.into_iter().enumerate() {
            let mut probe = url.clone();
            probe.set_path(&path);
            probe.set_query(None);
            probe.set_fragment(None);
            probes.push((generator, probe));
        }
    }
    probes
}

fn up_to_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(index) => &path[..=index],
        None => "/",
    }
}

fn parent_of(dir: &str) -> String {
    let trimmed = dir.strip_suffix('/').unwrap_or(dir);
    match trimmed.rfind('/') {
        Some(index) => trimmed[..=index].to_string(),
        None => "/".to_string(),
    }
}

fn has_extension(segment: &str) -> bool {
    match segment.rsplit_once('.') {
        Some((stem, extension)) => !stem.is_empty() && !extension.is_empty(),
        None => false,
    }
}

fn token() -> String {
    format!("{:032x}", rand::thread_rng().gen::<u128>())
}

fn extension(precision: usize) -> String {
    let raw = token();
    raw[..precision.min(raw.len())].to_string()
}
