//! Bounded response cache: capacity-limited, TTL-expiring, LRU-evicting.
//!
//! Retrieval responses and RAG answers are expensive to produce; both
//! caches are instances of [`BoundedCache`]. The bound matters: an
//! unbounded map would grow with every distinct query.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    last_access: u64,
}

struct Inner<K, V> {
    entries: HashMap<K, Entry<V>>,
    clock: u64,
}

pub struct BoundedCache<K, V> {
    inner: Mutex<Inner<K, V>>,
    capacity: usize,
    ttl: Duration,
}

impl<K: Eq + Hash + Clone, V: Clone> BoundedCache<K, V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                clock: 0,
            }),
            capacity: capacity.max(1),
            ttl,
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        inner.clock += 1;
        let clock = inner.clock;
        let ttl = self.ttl;

        match inner.entries.get_mut(key) {
            Some(entry) if entry.inserted_at.elapsed() <= ttl => {
                entry.last_access = clock;
                Some(entry.value.clone())
            }
            Some(_) => {
                inner.entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.lock();
        inner.clock += 1;
        let clock = inner.clock;

        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.capacity {
            evict_one(&mut inner);
        }

        inner.entries.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
                last_access: clock,
            },
        );
    }

    pub fn remove(&self, key: &K) {
        self.inner.lock().entries.remove(key);
    }

    /// Drop every entry the predicate selects.
    pub fn retain<F: FnMut(&K, &V) -> bool>(&self, mut keep: F) {
        self.inner
            .lock()
            .entries
            .retain(|key, entry| keep(key, &entry.value));
    }

    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn evict_one<K: Eq + Hash + Clone, V>(inner: &mut Inner<K, V>) {
    let victim = inner
        .entries
        .iter()
        .min_by_key(|(_, entry)| entry.last_access)
        .map(|(key, _)| key.clone());
    if let Some(key) = victim {
        inner.entries.remove(&key);
    }
}

/// Cache key for retrieval responses. Thresholds are stored as raw bits
/// so the key can be hashed and compared exactly. The effective
/// strategy, rerank mode, and expansion flag are part of the key: each
/// of them changes the result set for the same query text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RetrievalCacheKey {
    pub query: String,
    pub collection: String,
    pub top_k: usize,
    pub threshold_bits: Option<u64>,
    pub strategy: crate::models::RetrievalStrategy,
    pub rerank: Option<crate::models::RerankMode>,
    pub expanded: bool,
    pub filters: String,
}

/// Cache key for full RAG responses.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RagCacheKey {
    pub query: String,
    pub collection: String,
    pub top_k: usize,
    pub threshold_bits: Option<u64>,
    pub domain: Option<crate::models::RagDomain>,
    pub conversation_id: Option<String>,
}

/// The two response caches, shared between the ingestion pipeline (for
/// invalidation on writes) and the read paths that populate them.
pub struct EngineCaches {
    pub retrieval: BoundedCache<RetrievalCacheKey, crate::models::RetrievalResponse>,
    pub responses: BoundedCache<RagCacheKey, crate::models::RagResponse>,
    enabled: bool,
}

impl EngineCaches {
    pub fn new(config: &crate::config::CacheConfig) -> Self {
        let ttl = Duration::from_secs(config.ttl_secs);
        Self {
            retrieval: BoundedCache::new(config.capacity, ttl),
            responses: BoundedCache::new(config.capacity, ttl),
            enabled: config.enabled,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// A write to a collection makes every retrieval response for that
    /// collection suspect; drop them all.
    pub fn invalidate_collection(&self, collection: &str) {
        self.retrieval.retain(|key, _| key.collection != collection);
        self.responses
            .retain(|key, _| key.collection != collection);
    }

    /// Drop cached answers whose sources cite the updated document.
    pub fn invalidate_document(&self, collection: &str, document_id: &str) {
        self.retrieval.retain(|key, response| {
            key.collection != collection
                && !response
                    .results
                    .iter()
                    .any(|result| result.document_id == document_id)
        });
        self.responses.retain(|_, response| {
            !response
                .sources
                .iter()
                .any(|source| source.document_id == document_id)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_cached_values_until_ttl() {
        let cache = BoundedCache::new(4, Duration::from_secs(60));
        cache.insert("q1", "answer".to_string());
        assert_eq!(cache.get(&"q1"), Some("answer".to_string()));
        assert_eq!(cache.get(&"q2"), None);
    }

    #[test]
    fn expired_entries_are_dropped_on_read() {
        let cache = BoundedCache::new(4, Duration::ZERO);
        cache.insert("q1", 1u32);
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(cache.get(&"q1"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn least_recently_used_is_evicted_at_capacity() {
        let cache = BoundedCache::new(2, Duration::from_secs(60));
        cache.insert("a", 1u32);
        cache.insert("b", 2u32);
        // Touch "a" so "b" becomes the LRU entry.
        assert_eq!(cache.get(&"a"), Some(1));
        cache.insert("c", 3u32);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"c"), Some(3));
    }

    #[test]
    fn reinserting_existing_key_does_not_evict() {
        let cache = BoundedCache::new(2, Duration::from_secs(60));
        cache.insert("a", 1u32);
        cache.insert("b", 2u32);
        cache.insert("a", 10u32);

        assert_eq!(cache.get(&"a"), Some(10));
        assert_eq!(cache.get(&"b"), Some(2));
    }

    #[test]
    fn retain_drops_selected_entries() {
        let cache = BoundedCache::new(8, Duration::from_secs(60));
        cache.insert("keep", 1u32);
        cache.insert("drop", 2u32);
        cache.retain(|key, _| *key != "drop");

        assert_eq!(cache.get(&"keep"), Some(1));
        assert_eq!(cache.get(&"drop"), None);
    }
}
