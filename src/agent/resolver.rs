//! Agent-id → address cache.
//!
//! Entries are valid for 60 seconds; expired or missing entries force a
//! hub lookup. Discover and find results refresh the cache as a side
//! effect.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Cache entry lifetime
pub const ADDRESS_TTL: Duration = Duration::from_secs(60);

struct CacheEntry {
    address: String,
    inserted_at: Instant,
}

/// TTL cache of peer dial addresses
pub struct AddressCache {
    inner: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl Default for AddressCache {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressCache {
    /// Cache with the standard 60 s TTL
    pub fn new() -> Self {
        Self::with_ttl(ADDRESS_TTL)
    }

    /// Cache with a custom TTL
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert or refresh an entry
    pub fn insert(&self, id: &str, address: &str) {
        self.lock().insert(
            id.to_string(),
            CacheEntry {
                address: address.to_string(),
                inserted_at: Instant::now(),
            },
        );
    }

    /// Return the cached address if it is still fresh; expired entries
    /// are pruned on access
    pub fn fresh(&self, id: &str) -> Option<String> {
        let mut inner = self.lock();
        match inner.get(id) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                Some(entry.address.clone())
            },
            Some(_) => {
                inner.remove(id);
                None
            },
            None => None,
        }
    }

    /// Drop one entry
    pub fn remove(&self, id: &str) {
        self.lock().remove(id);
    }

    /// Drop everything (e.g. after re-registration under a new id)
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Cached entry count, including not-yet-pruned expired ones
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when the cache holds nothing
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_hit() {
        let cache = AddressCache::new();
        cache.insert("agent-1", "10.0.0.5:4000");

        assert_eq!(cache.fresh("agent-1").as_deref(), Some("10.0.0.5:4000"));
        assert_eq!(cache.fresh("agent-2"), None);
    }

    #[test]
    fn test_expired_entry_pruned() {
        let cache = AddressCache::with_ttl(Duration::from_millis(10));
        cache.insert("agent-1", "10.0.0.5:4000");

        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(cache.fresh("agent-1"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_insert_refreshes_age() {
        let cache = AddressCache::with_ttl(Duration::from_millis(40));
        cache.insert("agent-1", "10.0.0.5:4000");

        std::thread::sleep(Duration::from_millis(25));
        cache.insert("agent-1", "10.0.0.6:4001");
        std::thread::sleep(Duration::from_millis(25));

        // Refreshed 25 ms ago, still inside the 40 ms TTL
        assert_eq!(cache.fresh("agent-1").as_deref(), Some("10.0.0.6:4001"));
    }

    #[test]
    fn test_clear() {
        let cache = AddressCache::new();
        cache.insert("a", "1.1.1.1:1");
        cache.insert("b", "2.2.2.2:2");

        cache.clear();
        assert!(cache.is_empty());
    }
}
