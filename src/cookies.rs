//! In-memory cookie jar with domain/path scoping.
//!
//! The jar holds normalized [`Cookie`] entries and answers the one question
//! the engine needs: which `name=value` pairs apply to a given URL right
//! now. It accepts cookies from three shapes (parsed entries, bare
//! `name → value` pairs, raw `Set-Cookie` strings) and persists to a JSON
//! file that round-trips through `update`/`cookies`.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::error::HttpClientError;

/// A single normalized cookie.
///
/// `domain == None` marks an ambient cookie (seeded from configuration
/// rather than harvested from a response); it applies to every host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: Option<String>,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    /// Unix timestamp past which the cookie no longer applies.
    pub expires_at: Option<i64>,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Cookie {
            name: name.into(),
            value: value.into(),
            domain: None,
            path: "/".into(),
            secure: false,
            http_only: false,
            expires_at: None,
        }
    }

    /// Parses a raw `Set-Cookie` header value. When `origin` is given,
    /// a missing `Domain` attribute falls back to the origin host and a
    /// missing `Path` falls back to the origin directory.
    pub fn parse_set_cookie(raw: &str, origin: Option<&Url>) -> Result<Self, HttpClientError> {
        let parsed = cookie::Cookie::parse(raw.trim())
            .map_err(|e| HttpClientError::CookieParse(format!("{raw:?}: {e}")))?;

        let domain = parsed
            .domain()
            .map(|d| d.trim_start_matches('.').to_ascii_lowercase())
            .or_else(|| origin.and_then(|u| u.host_str()).map(str::to_ascii_lowercase));

        let path = parsed
            .path()
            .map(str::to_string)
            .or_else(|| origin.map(default_path))
            .unwrap_or_else(|| "/".into());

        // Max-Age wins over Expires, per RFC 6265.
        let expires_at = parsed
            .max_age()
            .map(|age| now_unix() + age.whole_seconds())
            .or_else(|| match parsed.expires() {
                Some(cookie::Expiration::DateTime(at)) => Some(at.unix_timestamp()),
                _ => None,
            });

        Ok(Cookie {
            name: parsed.name().to_string(),
            value: parsed.value().to_string(),
            domain,
            path,
            secure: parsed.secure().unwrap_or(false),
            http_only: parsed.http_only().unwrap_or(false),
            expires_at,
        })
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Whether this cookie is in scope for `url` (ignores expiry).
    pub fn matches(&self, url: &Url) -> bool {
        if self.secure && url.scheme() != "https" {
            return false;
        }
        if let Some(domain) = &self.domain {
            let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
            if host != *domain && !host.ends_with(&format!(".{domain}")) {
                return false;
            }
        }
        url.path().starts_with(&self.path)
    }

    fn scope_key(&self) -> (String, String, String) {
        (
            self.name.clone(),
            self.domain.clone().unwrap_or_default(),
            self.path.clone(),
        )
    }
}

/// Scoped cookie store. Cloning produces a fully independent jar.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CookieJar {
    entries: Vec<Cookie>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs cookies, replacing earlier entries with the same
    /// `(name, domain, path)` scope. Insertion order is preserved so later
    /// writes win on `for_url` name collisions.
    pub fn update<I>(&mut self, cookies: I)
    where
        I: IntoIterator<Item = Cookie>,
    {
        for cookie in cookies {
            let key = cookie.scope_key();
            if let Some(existing) = self.entries.iter_mut().find(|c| c.scope_key() == key) {
                *existing = cookie;
            } else {
                self.entries.push(cookie);
            }
        }
    }

    /// Installs ambient `name → value` cookies.
    pub fn update_pairs<I, K, V>(&mut self, pairs: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.update(pairs.into_iter().map(|(k, v)| Cookie::new(k, v)));
    }

    /// Parses and installs raw `Set-Cookie` strings. Unparsable entries are
    /// logged and skipped; the rest still go in.
    pub fn update_set_cookie_strings<'a, I>(&mut self, raw: I, origin: Option<&Url>) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut installed = 0;
        for line in raw {
            match Cookie::parse_set_cookie(line, origin) {
                Ok(cookie) => {
                    self.update([cookie]);
                    installed += 1;
                }
                Err(e) => warn!("skipping unparsable cookie: {e}"),
            }
        }
        installed
    }

    /// The `name → value` map of cookies in scope for `url` and not yet
    /// expired. At most one entry per name; the latest write wins.
    pub fn for_url(&self, url: &Url) -> HashMap<String, String> {
        let now = now_unix();
        let mut applicable = HashMap::new();
        for cookie in &self.entries {
            if cookie.matches(url) && !cookie.is_expired(now) {
                applicable.insert(cookie.name.clone(), cookie.value.clone());
            }
        }
        applicable
    }

    pub fn cookies(&self) -> &[Cookie] {
        &self.entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn load(path: &Path) -> Result<Self, HttpClientError> {
        let bytes = std::fs::read(path)?;
        let entries: Vec<Cookie> = serde_json::from_slice(&bytes)
            .map_err(|e| HttpClientError::CookieParse(format!("{}: {e}", path.display())))?;
        debug!("loaded {} cookies from {}", entries.len(), path.display());
        let mut jar = CookieJar::new();
        jar.update(entries);
        Ok(jar)
    }

    pub fn save(&self, path: &Path) -> Result<(), HttpClientError> {
        let json = serde_json::to_vec_pretty(&self.entries)
            .map_err(|e| HttpClientError::Configuration(e.to_string()))?;
        std::fs::write(path, json)?;
        debug!("saved {} cookies to {}", self.entries.len(), path.display());
        Ok(())
    }
}

/// Parses a `k1=v1; k2=v2` cookie string into ambient cookies.
pub fn parse_cookie_string(raw: &str) -> Vec<Cookie> {
    raw.split(';')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some(Cookie::new(name, value.trim()))
        })
        .collect()
}

fn default_path(url: &Url) -> String {
    match url.path().rsplit_once('/') {
        Some(("", _)) | None => "/".into(),
        Some((dir, _)) => dir.into(),
    }
}

fn now_unix() -> i64 {
    cookie::time::OffsetDateTime::now_utc().unix_timestamp()
}
