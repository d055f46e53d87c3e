//! In-memory hot tier on top of the persistent index.
//!
//! A bounded LRU mapping `resource id → materialized payload`. Small payloads
//! keep their bytes resident; larger ones keep only the path. A side lookup
//! by mirror location exists for UI consumers; the core download path never
//! uses it.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Configuration for the memory cache.
#[derive(Clone, Copy, Debug)]
pub struct MemoryCacheConfig {
    /// Total resident-byte budget.
    pub max_total_bytes: u64,
    /// Payloads above this stay path-only.
    pub max_entry_bytes: u64,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_total_bytes: 64 * 1024 * 1024,
            max_entry_bytes: 4 * 1024 * 1024,
        }
    }
}

impl MemoryCacheConfig {
    /// Set the total resident-byte budget.
    #[must_use]
    pub const fn with_max_total_bytes(mut self, bytes: u64) -> Self {
        self.max_total_bytes = bytes;
        self
    }

    /// Set the per-entry resident cap.
    #[must_use]
    pub const fn with_max_entry_bytes(mut self, bytes: u64) -> Self {
        self.max_entry_bytes = bytes;
        self
    }
}

/// A hot-tier hit.
#[derive(Clone, Debug)]
pub struct CachedPayload {
    /// Path of the materialized file.
    pub path: PathBuf,
    /// Resident bytes, when the payload was small enough to keep.
    pub bytes: Option<Arc<Vec<u8>>>,
}

struct Entry {
    payload: CachedPayload,
    location: Option<String>,
    charged: u64,
}

#[derive(Default)]
struct State {
    entries: HashMap<String, Entry>,
    // Front = least recently used
    order: VecDeque<String>,
    by_location: HashMap<String, String>,
    total_bytes: u64,
}

impl State {
    fn promote(&mut self, resource_id: &str) {
        if let Some(pos) = self.order.iter().position(|id| id == resource_id) {
            self.order.remove(pos);
            self.order.push_back(resource_id.to_string());
        }
    }

    fn remove(&mut self, resource_id: &str) -> bool {
        let Some(entry) = self.entries.remove(resource_id) else {
            return false;
        };
        self.total_bytes = self.total_bytes.saturating_sub(entry.charged);
        if let Some(location) = entry.location {
            self.by_location.remove(&location);
        }
        if let Some(pos) = self.order.iter().position(|id| id == resource_id) {
            self.order.remove(pos);
        }
        true
    }
}

/// Bounded LRU hot tier.
///
/// All operations are synchronous; the lock is never held across I/O.
pub struct MemoryCache {
    config: MemoryCacheConfig,
    state: Mutex<State>,
}

impl MemoryCache {
    /// Create a cache with the given budgets.
    #[must_use]
    pub fn new(config: MemoryCacheConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State::default()),
        }
    }

    /// Insert or refresh the payload for a resource.
    ///
    /// `bytes` above the per-entry cap are dropped and the entry stays
    /// path-only. The oldest entries are evicted until the resident total
    /// fits the budget again.
    pub fn store(
        &self,
        resource_id: &str,
        path: PathBuf,
        location: Option<&str>,
        bytes: Option<Vec<u8>>,
    ) {
        let bytes = bytes.filter(|b| b.len() as u64 <= self.config.max_entry_bytes);
        let charged = bytes.as_ref().map_or(0, |b| b.len() as u64);

        let mut state = self.state.lock().unwrap();
        state.remove(resource_id);

        state.entries.insert(
            resource_id.to_string(),
            Entry {
                payload: CachedPayload {
                    path,
                    bytes: bytes.map(Arc::new),
                },
                location: location.map(ToString::to_string),
                charged,
            },
        );
        state.order.push_back(resource_id.to_string());
        if let Some(location) = location {
            state
                .by_location
                .insert(location.to_string(), resource_id.to_string());
        }
        state.total_bytes += charged;

        while state.total_bytes > self.config.max_total_bytes {
            let Some(oldest) = state.order.front().cloned() else {
                break;
            };
            tracing::debug!(
                target: "fetchkit.cache",
                resource_id = %oldest,
                "Evicting hot-tier entry over byte budget"
            );
            state.remove(&oldest);
        }
    }

    /// Look up a payload, promoting the entry to most-recently used.
    #[must_use]
    pub fn get(&self, resource_id: &str) -> Option<CachedPayload> {
        let mut state = self.state.lock().unwrap();
        let payload = state.entries.get(resource_id)?.payload.clone();
        state.promote(resource_id);
        Some(payload)
    }

    /// Side lookup by mirror location (UI consumers only).
    #[must_use]
    pub fn get_by_location(&self, location: &str) -> Option<CachedPayload> {
        let resource_id = {
            let state = self.state.lock().unwrap();
            state.by_location.get(location)?.clone()
        };
        self.get(&resource_id)
    }

    /// Drop the entry for a resource. Returns `true` if one existed.
    pub fn remove(&self, resource_id: &str) -> bool {
        self.state.lock().unwrap().remove(resource_id)
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        *state = State::default();
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resident bytes currently charged against the budget.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.state.lock().unwrap().total_bytes
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(MemoryCacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(total: u64, entry: u64) -> MemoryCache {
        MemoryCache::new(
            MemoryCacheConfig::default()
                .with_max_total_bytes(total)
                .with_max_entry_bytes(entry),
        )
    }

    #[test]
    fn store_and_get_keeps_small_bytes_resident() {
        let cache = cache(1024, 512);
        cache.store("a", PathBuf::from("/cache/a"), None, Some(vec![1, 2, 3]));

        let hit = cache.get("a").unwrap();
        assert_eq!(hit.path, PathBuf::from("/cache/a"));
        assert_eq!(hit.bytes.unwrap().as_slice(), &[1, 2, 3]);
        assert_eq!(cache.total_bytes(), 3);
    }

    #[test]
    fn oversized_payloads_stay_path_only() {
        let cache = cache(1024, 4);
        cache.store("a", PathBuf::from("/cache/a"), None, Some(vec![0; 100]));

        let hit = cache.get("a").unwrap();
        assert!(hit.bytes.is_none());
        assert_eq!(cache.total_bytes(), 0);
    }

    #[test]
    fn eviction_drops_least_recently_used_first() {
        let cache = cache(10, 10);
        cache.store("a", PathBuf::from("/a"), None, Some(vec![0; 4]));
        cache.store("b", PathBuf::from("/b"), None, Some(vec![0; 4]));

        // Touch "a" so "b" becomes the eviction candidate
        let _ = cache.get("a");

        cache.store("c", PathBuf::from("/c"), None, Some(vec![0; 4]));

        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
        assert!(cache.total_bytes() <= 10);
    }

    #[test]
    fn location_side_lookup_resolves_entries() {
        let cache = cache(1024, 512);
        cache.store(
            "a",
            PathBuf::from("/a"),
            Some("https://cdn.example.com/a"),
            Some(vec![9]),
        );

        let hit = cache.get_by_location("https://cdn.example.com/a").unwrap();
        assert_eq!(hit.bytes.unwrap().as_slice(), &[9]);
        assert!(cache.get_by_location("https://cdn.example.com/b").is_none());
    }

    #[test]
    fn restore_replaces_previous_entry_and_charge() {
        let cache = cache(1024, 512);
        cache.store("a", PathBuf::from("/a"), Some("loc-1"), Some(vec![0; 8]));
        cache.store("a", PathBuf::from("/a2"), Some("loc-2"), Some(vec![0; 2]));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_bytes(), 2);
        assert!(cache.get_by_location("loc-1").is_none());
        assert_eq!(cache.get_by_location("loc-2").unwrap().path, PathBuf::from("/a2"));
    }

    #[test]
    fn remove_and_clear() {
        let cache = cache(1024, 512);
        cache.store("a", PathBuf::from("/a"), None, Some(vec![1]));
        cache.store("b", PathBuf::from("/b"), None, Some(vec![2]));

        assert!(cache.remove("a"));
        assert!(!cache.remove("a"));
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.total_bytes(), 0);
    }
}
