//! Query cache: formatted results keyed by content fingerprint and query.
//!
//! ## Invalidation
//!
//! The cache remembers the fingerprint of the content it was filled from.
//! When asked about different content the whole cache is cleared; entries
//! are never evicted one by one. Once `capacity` entries exist, new results
//! are still returned to the caller but not stored.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::format::FormattedResult;

/// Default maximum number of cached answers per session.
pub const DEFAULT_CAPACITY: usize = 100;

/// Hex SHA-256 of normalized content.
pub fn fingerprint(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Cached answers for the current content.
#[derive(Debug, Clone)]
pub struct QueryCache {
    /// Fingerprint the entries were computed against.
    fingerprint: Option<String>,
    entries: HashMap<String, FormattedResult>,
    capacity: usize,
}

impl QueryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            fingerprint: None,
            entries: HashMap::new(),
            capacity,
        }
    }

    /// Bind the cache to `fingerprint`, clearing it if it held answers for
    /// other content. Returns `true` when entries were dropped.
    pub fn sync_fingerprint(&mut self, fingerprint: &str) -> bool {
        if self.fingerprint.as_deref() == Some(fingerprint) {
            return false;
        }
        let dropped = !self.entries.is_empty();
        if dropped {
            tracing::debug!(
                "content changed, clearing {} cached answer(s)",
                self.entries.len()
            );
        }
        self.entries.clear();
        self.fingerprint = Some(fingerprint.to_string());
        dropped
    }

    pub fn get(&self, fingerprint: &str, query: &str) -> Option<&FormattedResult> {
        if self.fingerprint.as_deref() != Some(fingerprint) {
            return None;
        }
        self.entries.get(query)
    }

    /// Store an answer. Returns `false` when it was not stored (full cache,
    /// or an answer for content the cache is not bound to).
    pub fn insert(&mut self, fingerprint: &str, query: &str, result: FormattedResult) -> bool {
        if self.fingerprint.as_deref() != Some(fingerprint) {
            return false;
        }
        if self.entries.len() >= self.capacity && !self.entries.contains_key(query) {
            tracing::debug!("query cache full ({} entries), not storing", self.capacity);
            return false;
        }
        self.entries.insert(query.to_string(), result);
        true
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.fingerprint = None;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> FormattedResult {
        FormattedResult::PlainText(s.to_string())
    }

    #[test]
    fn test_fingerprint_is_sha256_hex() {
        assert_eq!(
            fingerprint(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_ne!(fingerprint("a"), fingerprint("b"));
    }

    #[test]
    fn test_queries_are_independent() {
        let mut cache = QueryCache::new(10);
        let fp = fingerprint("page");
        cache.sync_fingerprint(&fp);
        assert!(cache.insert(&fp, "q1", text("one")));
        assert!(cache.insert(&fp, "q2", text("two")));
        assert_eq!(cache.get(&fp, "q1"), Some(&text("one")));
        assert_eq!(cache.get(&fp, "q2"), Some(&text("two")));
    }

    #[test]
    fn test_content_change_clears_everything() {
        let mut cache = QueryCache::new(10);
        let old = fingerprint("old page");
        cache.sync_fingerprint(&old);
        cache.insert(&old, "q1", text("one"));
        cache.insert(&old, "q2", text("two"));

        let new = fingerprint("new page");
        assert!(cache.sync_fingerprint(&new));
        assert!(cache.is_empty());
        assert_eq!(cache.get(&old, "q1"), None);
        assert!(!cache.sync_fingerprint(&new));
    }

    #[test]
    fn test_full_cache_stops_storing() {
        let mut cache = QueryCache::new(2);
        let fp = fingerprint("page");
        cache.sync_fingerprint(&fp);
        assert!(cache.insert(&fp, "a", text("1")));
        assert!(cache.insert(&fp, "b", text("2")));
        assert!(!cache.insert(&fp, "c", text("3")));
        assert_eq!(cache.len(), 2);
        // Existing entries are neither evicted nor blocked from refresh.
        assert!(cache.insert(&fp, "a", text("1b")));
        assert_eq!(cache.get(&fp, "c"), None);
    }

    #[test]
    fn test_unbound_fingerprint_is_rejected() {
        let mut cache = QueryCache::default();
        assert!(!cache.insert("nope", "q", text("x")));
        assert!(cache.get("nope", "q").is_none());
    }
}
