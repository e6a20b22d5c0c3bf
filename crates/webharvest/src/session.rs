// Copyright 2026 WebHarvest Contributors
// SPDX-License-Identifier: Apache-2.0

//! The live session: the last fetched page and the answers cached for it.
//!
//! Lifecycle:
//! 1. Created empty with the harvester.
//! 2. Replaced wholesale by every successful fetch.
//! 3. Its query cache is filled by the extraction pipeline and cleared when
//!    the content fingerprint changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::extract::cache::{fingerprint, QueryCache};
use crate::route::Egress;

#[derive(Debug, Clone, Default)]
pub struct Session {
    current_url: Option<String>,
    raw_content: Option<String>,
    normalized_content: Option<String>,
    content_fingerprint: Option<String>,
    fetched_at: Option<DateTime<Utc>>,
    egress: Option<Egress>,
    cache: QueryCache,
}

/// Serializable form of a session, without its cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub current_url: Option<String>,
    pub raw_content: Option<String>,
    pub normalized_content: Option<String>,
    pub content_fingerprint: Option<String>,
    #[serde(default)]
    pub fetched_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub egress: Option<Egress>,
}

impl Session {
    pub fn new(cache_capacity: usize) -> Self {
        Self {
            cache: QueryCache::new(cache_capacity),
            ..Self::default()
        }
    }

    /// Install freshly fetched content, replacing everything but the cache.
    pub fn replace(&mut self, url: &str, raw: &str, normalized: &str) {
        self.install(url, raw, normalized, None);
    }

    /// As [`Session::replace`], recording the route the content came over.
    pub fn replace_via(&mut self, url: &str, raw: &str, normalized: &str, egress: Egress) {
        self.install(url, raw, normalized, Some(egress));
    }

    fn install(&mut self, url: &str, raw: &str, normalized: &str, egress: Option<Egress>) {
        let fp = fingerprint(normalized);
        tracing::debug!(
            "session now holds {url} ({} normalized bytes, fingerprint {})",
            normalized.len(),
            &fp[..12]
        );
        self.current_url = Some(url.to_string());
        self.raw_content = Some(raw.to_string());
        self.normalized_content = Some(normalized.to_string());
        self.content_fingerprint = Some(fp);
        self.fetched_at = Some(Utc::now());
        self.egress = egress;
    }

    pub fn has_content(&self) -> bool {
        self.normalized_content
            .as_deref()
            .is_some_and(|c| !c.trim().is_empty())
    }

    pub fn current_url(&self) -> Option<&str> {
        self.current_url.as_deref()
    }

    pub fn raw_content(&self) -> Option<&str> {
        self.raw_content.as_deref()
    }

    pub fn normalized_content(&self) -> Option<&str> {
        self.normalized_content.as_deref()
    }

    pub fn content_fingerprint(&self) -> Option<&str> {
        self.content_fingerprint.as_deref()
    }

    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.fetched_at
    }

    pub fn egress(&self) -> Option<&Egress> {
        self.egress.as_ref()
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// Content and cache borrowed together for the extraction pipeline.
    pub(crate) fn content_and_cache(&mut self) -> (Option<&str>, &mut QueryCache) {
        (self.normalized_content.as_deref(), &mut self.cache)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            current_url: self.current_url.clone(),
            raw_content: self.raw_content.clone(),
            normalized_content: self.normalized_content.clone(),
            content_fingerprint: self.content_fingerprint.clone(),
            fetched_at: self.fetched_at,
            egress: self.egress.clone(),
        }
    }

    /// Rebuild a session from a snapshot with an empty cache. A stored
    /// fingerprint that does not match the content is recomputed.
    pub fn restore(snapshot: SessionSnapshot, cache_capacity: usize) -> Self {
        let computed = snapshot.normalized_content.as_deref().map(fingerprint);
        if snapshot.content_fingerprint.is_some() && snapshot.content_fingerprint != computed {
            tracing::warn!("snapshot fingerprint does not match its content, recomputing");
        }
        Self {
            current_url: snapshot.current_url,
            raw_content: snapshot.raw_content,
            normalized_content: snapshot.normalized_content,
            content_fingerprint: computed,
            fetched_at: snapshot.fetched_at,
            egress: snapshot.egress,
            cache: QueryCache::new(cache_capacity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_empty() {
        let session = Session::new(10);
        assert!(!session.has_content());
        assert!(session.current_url().is_none());
        assert!(session.content_fingerprint().is_none());
    }

    #[test]
    fn test_replace_is_wholesale() {
        let mut session = Session::new(10);
        session.replace_via("https://a.example", "<p>a</p>", "a", Egress::Direct);
        let first_fp = session.content_fingerprint().unwrap().to_string();

        session.replace("https://b.example", "<p>b</p>", "b");
        assert_eq!(session.current_url(), Some("https://b.example"));
        assert_eq!(session.raw_content(), Some("<p>b</p>"));
        assert_eq!(session.normalized_content(), Some("b"));
        assert_ne!(session.content_fingerprint().unwrap(), first_fp);
        assert!(session.egress().is_none());
        assert!(session.fetched_at().is_some());
    }

    #[test]
    fn test_snapshot_round_trip_through_json() {
        let mut session = Session::new(10);
        session.replace_via(
            "http://hidden.onion",
            "<p>x</p>",
            "x",
            Egress::AnonymityOverlay,
        );
        let json = serde_json::to_string(&session.snapshot()).unwrap();
        let restored = Session::restore(serde_json::from_str(&json).unwrap(), 10);
        assert_eq!(restored.snapshot(), session.snapshot());
        assert!(restored.cache().is_empty());
    }

    #[test]
    fn test_restore_recomputes_bad_fingerprint() {
        let snapshot = SessionSnapshot {
            current_url: Some("https://example.com".into()),
            raw_content: Some("raw".into()),
            normalized_content: Some("norm".into()),
            content_fingerprint: Some("bogus".into()),
            fetched_at: None,
            egress: None,
        };
        let session = Session::restore(snapshot, 5);
        assert_eq!(session.content_fingerprint(), Some(fingerprint("norm").as_str()));
    }
}
