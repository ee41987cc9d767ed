//! In-process access-token cache
//!
//! The cache is best-effort and never authoritative: it may be empty after a
//! cold start and is not shared across instances. The store is the source of
//! truth; the cache only saves a database read and a decryption on the hot
//! path. Two overlapping refreshes for the same integration are tolerated -
//! the later write wins.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

/// A cached access token with its absolute expiry
#[derive(Debug, Clone, PartialEq)]
pub struct CachedToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Cache of access tokens keyed by integration id
pub trait TokenCache: Send + Sync {
    /// Get the cached token for an integration, if any
    fn get(&self, integration_id: i64) -> Option<CachedToken>;

    /// Store a token for an integration, replacing any previous entry
    fn set(&self, integration_id: i64, token: CachedToken);

    /// Drop the cached token for an integration
    fn invalidate(&self, integration_id: i64);
}

/// Process-wide token cache backed by a map
#[derive(Debug, Default)]
pub struct InMemoryTokenCache {
    entries: RwLock<HashMap<i64, CachedToken>>,
}

impl InMemoryTokenCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenCache for InMemoryTokenCache {
    fn get(&self, integration_id: i64) -> Option<CachedToken> {
        self.entries
            .read()
            .expect("token cache lock poisoned")
            .get(&integration_id)
            .cloned()
    }

    fn set(&self, integration_id: i64, token: CachedToken) {
        self.entries
            .write()
            .expect("token cache lock poisoned")
            .insert(integration_id, token);
    }

    fn invalidate(&self, integration_id: i64) {
        self.entries
            .write()
            .expect("token cache lock poisoned")
            .remove(&integration_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn token(value: &str) -> CachedToken {
        CachedToken {
            access_token: value.to_string(),
            expires_at: Utc::now() + Duration::hours(1),
        }
    }

    // Test 1: Set then get returns the entry
    #[test]
    fn test_set_and_get() {
        let cache = InMemoryTokenCache::new();
        assert!(cache.get(1).is_none());

        cache.set(1, token("at-1"));
        assert_eq!(cache.get(1).unwrap().access_token, "at-1");
    }

    // Test 2: Entries are keyed per integration
    #[test]
    fn test_per_integration_keys() {
        let cache = InMemoryTokenCache::new();
        cache.set(1, token("at-1"));
        cache.set(2, token("at-2"));

        assert_eq!(cache.get(1).unwrap().access_token, "at-1");
        assert_eq!(cache.get(2).unwrap().access_token, "at-2");
    }

    // Test 3: Later write wins
    #[test]
    fn test_later_write_wins() {
        let cache = InMemoryTokenCache::new();
        cache.set(1, token("old"));
        cache.set(1, token("new"));

        assert_eq!(cache.get(1).unwrap().access_token, "new");
    }

    // Test 4: Invalidate removes only the targeted entry
    #[test]
    fn test_invalidate() {
        let cache = InMemoryTokenCache::new();
        cache.set(1, token("at-1"));
        cache.set(2, token("at-2"));

        cache.invalidate(1);
        assert!(cache.get(1).is_none());
        assert!(cache.get(2).is_some());

        // Invalidate on a missing key is a no-op
        cache.invalidate(99);
    }
}
