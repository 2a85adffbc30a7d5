//! Similarity-refined response-body fingerprints.
//!
//! A [`Signature`] reduces a body to the set of word tokens it contains,
//! hashed to compact keys. Repeatedly calling [`Signature::refine`] with
//! fresh samples of the same page intersects the token sets, leaving only
//! the stable part of the page; volatile fragments (timestamps, echoed
//! request paths, CSRF tokens) fall out. Two signatures are then compared
//! by the ratio of tokens they do not share.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};

/// Maximum relative token difference for two signatures to count as similar.
pub const DEFAULT_SIGNATURE_THRESHOLD: f64 = 0.1;

/// Token-set fingerprint of a response body.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    tokens: HashSet<u64>,
    threshold: f64,
}

impl Signature {
    /// Fingerprints `data` with the default similarity threshold.
    pub fn new(data: &str) -> Self {
        Self::with_threshold(data, DEFAULT_SIGNATURE_THRESHOLD)
    }

    /// Fingerprints `data` with a caller-chosen similarity threshold.
    pub fn with_threshold(data: &str, threshold: f64) -> Self {
        Signature {
            tokens: tokenize(data),
            threshold,
        }
    }

    /// Intersects this signature with the tokens of another sample.
    ///
    /// Refinement is idempotent and commutative over samples of the same
    /// page: once a volatile token is gone it can never come back.
    pub fn refine(&self, data: &str) -> Signature {
        let sample = tokenize(data);
        Signature {
            tokens: self.tokens.intersection(&sample).copied().collect(),
            threshold: self.threshold,
        }
    }

    /// Relative token distance in `[0, 1]`: the share of tokens found in
    /// exactly one of the two signatures. Empty signatures are identical.
    pub fn distance(&self, other: &Signature) -> f64 {
        let total = self.tokens.len() + other.tokens.len();
        if total == 0 {
            return 0.0;
        }
        let diff = self.tokens.symmetric_difference(&other.tokens).count();
        diff as f64 / total as f64
    }

    /// Whether the two signatures are within this signature's threshold.
    pub fn similar(&self, other: &Signature) -> bool {
        self.distance(other) <= self.threshold
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }
}

fn tokenize(data: &str) -> HashSet<u64> {
    data.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            hasher.finish()
        })
        .collect()
}
