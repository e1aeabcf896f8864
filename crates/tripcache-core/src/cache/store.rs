//! Bounded in-memory tier with per-entry expiry and LRU eviction.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use rand::seq::IteratorRandom;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::entry::CacheEntry;
use super::key::CacheKey;
use crate::clock::Clock;
use crate::models::SizeOf;

/// Default maximum number of entries.
const DEFAULT_MAX_ITEMS: usize = 100;

/// Default memory ceiling (10 MiB).
const DEFAULT_MAX_MEMORY_BYTES: usize = 10 * 1024 * 1024;

/// Default entry lifetime (1 hour).
const DEFAULT_EXPIRATION_SECS: u64 = 3600;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_items: usize,
    pub max_memory_bytes: usize,
    pub expiration_secs: u64,
    /// When false, eviction picks random victims and hits don't update access time.
    pub enable_lru: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_items: DEFAULT_MAX_ITEMS,
            max_memory_bytes: DEFAULT_MAX_MEMORY_BYTES,
            expiration_secs: DEFAULT_EXPIRATION_SECS,
            enable_lru: true,
        }
    }
}

impl CacheConfig {
    pub fn expiration(&self) -> Duration {
        Duration::seconds(self.expiration_secs as i64)
    }
}

/// Point-in-time counters for the in-memory tier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStatistics {
    pub total_items: usize,
    pub max_items: usize,
    pub memory_bytes: usize,
    pub max_memory_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
}

impl CacheStatistics {
    pub fn memory_utilization(&self) -> f64 {
        if self.max_memory_bytes == 0 {
            0.0
        } else {
            self.memory_bytes as f64 / self.max_memory_bytes as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyAccess {
    pub key: String,
    pub access_count: u64,
    pub last_access: DateTime<Utc>,
}

/// Statistics plus per-key and per-namespace detail.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheMetrics {
    pub statistics: CacheStatistics,
    pub top_keys: Vec<KeyAccess>,
    pub namespaces: BTreeMap<String, usize>,
}

struct StoreState<V> {
    entries: HashMap<CacheKey, CacheEntry<V>>,
    memory_bytes: usize,
}

impl<V> StoreState<V> {
    fn remove(&mut self, key: &CacheKey) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.memory_bytes = self.memory_bytes.saturating_sub(entry.size);
        Some(entry)
    }
}

/// Namespaced key-value store shared between threads.
///
/// Reads take the shared lock; writes, eviction and expired-entry removal
/// take the exclusive one.
pub struct CacheStore<V> {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    state: RwLock<StoreState<V>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<V: Clone + SizeOf> CacheStore<V> {
    pub fn new(mut config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        if config.max_items == 0 {
            warn!("Cache max_items of 0 raised to 1");
            config.max_items = 1;
        }
        Self {
            config,
            clock,
            state: RwLock::new(StoreState {
                entries: HashMap::new(),
                memory_bytes: 0,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Live value for `key`, or `None` on miss. Expired entries are dropped here.
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        let now = self.clock.now();
        let ttl = self.config.expiration();

        {
            let state = self.state.read();
            match state.entries.get(key) {
                Some(entry) if !entry.is_expired(now, ttl) => {
                    if self.config.enable_lru {
                        entry.touch(now);
                    }
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.value.clone());
                }
                Some(_) => {}
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        }

        // Expired: upgrade to the write lock and re-check, another writer may have replaced it
        let mut state = self.state.write();
        let still_expired = state
            .entries
            .get(key)
            .map(|entry| entry.is_expired(now, ttl))
            .unwrap_or(false);
        if still_expired {
            state.remove(key);
            debug!(key = %key, "Removed expired cache entry");
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        match state.entries.get(key) {
            Some(entry) => {
                if self.config.enable_lru {
                    entry.touch(now);
                }
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or replace, evicting first if the store is full.
    pub fn set(&self, key: CacheKey, value: V) {
        let now = self.clock.now();
        let size = value.size_of();
        let mut state = self.state.write();
        state.remove(&key);
        self.make_room(&mut state, size, now);
        self.insert(&mut state, key, value, size, now);
    }

    /// Bulk insert entries that are not already live. Returns how many were added.
    /// Does not touch hit/miss counters.
    pub fn warmup<I>(&self, entries: I) -> usize
    where
        I: IntoIterator<Item = (CacheKey, V)>,
    {
        let now = self.clock.now();
        let ttl = self.config.expiration();
        let mut state = self.state.write();
        let mut added = 0;

        for (key, value) in entries {
            let live = state
                .entries
                .get(&key)
                .map(|entry| !entry.is_expired(now, ttl))
                .unwrap_or(false);
            if live {
                continue;
            }
            state.remove(&key);
            let size = value.size_of();
            self.make_room(&mut state, size, now);
            self.insert(&mut state, key, value, size, now);
            added += 1;
        }

        debug!(added, "Cache warmup complete");
        added
    }

    /// Whether `key` holds a live entry. No statistics side effects.
    pub fn contains(&self, key: &CacheKey) -> bool {
        let now = self.clock.now();
        let ttl = self.config.expiration();
        self.state
            .read()
            .entries
            .get(key)
            .map(|entry| !entry.is_expired(now, ttl))
            .unwrap_or(false)
    }

    pub fn remove(&self, key: &CacheKey) -> bool {
        self.state.write().remove(key).is_some()
    }

    /// Drop everything and reset counters.
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.entries.clear();
        state.memory_bytes = 0;
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
    }

    /// Remove every key in `namespace`. Returns the number removed.
    pub fn clear_namespace(&self, namespace: &str) -> usize {
        let mut state = self.state.write();
        let doomed: Vec<CacheKey> = state
            .entries
            .keys()
            .filter(|key| key.namespace() == namespace)
            .cloned()
            .collect();
        for key in &doomed {
            state.remove(key);
        }
        debug!(namespace, removed = doomed.len(), "Cleared cache namespace");
        doomed.len()
    }

    pub fn keys_in_namespace(&self, namespace: &str) -> Vec<CacheKey> {
        let mut keys: Vec<CacheKey> = self
            .state
            .read()
            .entries
            .keys()
            .filter(|key| key.namespace() == namespace)
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn statistics(&self) -> CacheStatistics {
        let state = self.state.read();
        self.statistics_locked(&state)
    }

    /// Fraction of the memory ceiling in use.
    pub fn memory_usage_ratio(&self) -> f64 {
        self.statistics().memory_utilization()
    }

    /// Statistics plus the `top_n` most accessed keys and per-namespace counts.
    pub fn metrics(&self, top_n: usize) -> CacheMetrics {
        let state = self.state.read();
        let statistics = self.statistics_locked(&state);

        let mut namespaces = BTreeMap::new();
        for key in state.entries.keys() {
            *namespaces.entry(key.namespace().to_string()).or_insert(0) += 1;
        }

        let mut top_keys: Vec<KeyAccess> = state
            .entries
            .iter()
            .map(|(key, entry)| KeyAccess {
                key: key.to_string(),
                access_count: entry.access_count(),
                last_access: entry.last_access(),
            })
            .collect();
        top_keys.sort_by(|a, b| {
            b.access_count
                .cmp(&a.access_count)
                .then_with(|| a.key.cmp(&b.key))
        });
        top_keys.truncate(top_n);

        CacheMetrics {
            statistics,
            top_keys,
            namespaces,
        }
    }

    fn statistics_locked(&self, state: &StoreState<V>) -> CacheStatistics {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStatistics {
            total_items: state.entries.len(),
            max_items: self.config.max_items,
            memory_bytes: state.memory_bytes,
            max_memory_bytes: self.config.max_memory_bytes,
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }

    fn over_capacity(&self, state: &StoreState<V>, incoming: usize) -> bool {
        state.entries.len() >= self.config.max_items
            || state.memory_bytes + incoming > self.config.max_memory_bytes
    }

    /// Free space for an incoming value: expired entries first, then LRU
    /// (or random) victims until one slot fits.
    fn make_room(&self, state: &mut StoreState<V>, incoming: usize, now: DateTime<Utc>) {
        if !self.over_capacity(state, incoming) {
            return;
        }

        let ttl = self.config.expiration();
        let expired: Vec<CacheKey> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now, ttl))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            state.remove(key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "Evicted expired cache entries");
        }

        while self.over_capacity(state, incoming) && !state.entries.is_empty() {
            let victim = if self.config.enable_lru {
                state
                    .entries
                    .iter()
                    .min_by_key(|(_, entry)| (entry.last_access(), entry.created_at))
                    .map(|(key, _)| key.clone())
            } else {
                state.entries.keys().choose(&mut rand::thread_rng()).cloned()
            };
            let Some(victim) = victim else { break };
            state.remove(&victim);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(key = %victim, lru = self.config.enable_lru, "Evicted cache entry");
        }
    }

    fn insert(
        &self,
        state: &mut StoreState<V>,
        key: CacheKey,
        value: V,
        size: usize,
        now: DateTime<Utc>,
    ) {
        if size > self.config.max_memory_bytes {
            warn!(
                key = %key,
                size,
                limit = self.config.max_memory_bytes,
                "Cache entry larger than memory ceiling"
            );
        }
        state.memory_bytes += size;
        state.entries.insert(key, CacheEntry::new(value, size, now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn key(composed: &str) -> CacheKey {
        CacheKey::parse(composed).unwrap()
    }

    fn store(config: CacheConfig) -> (CacheStore<String>, ManualClock) {
        let clock = ManualClock::starting_now();
        (CacheStore::new(config, Arc::new(clock.clone())), clock)
    }

    fn small(max_items: usize) -> CacheConfig {
        CacheConfig {
            max_items,
            ..CacheConfig::default()
        }
    }

    #[test]
    fn test_set_then_get() {
        let (cache, _) = store(CacheConfig::default());
        cache.set(key("booking:a"), "alpha".to_string());
        assert_eq!(cache.get(&key("booking:a")), Some("alpha".to_string()));

        let stats = cache.statistics();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.total_items, 1);
        assert!(stats.memory_bytes > 0);
    }

    #[test]
    fn test_expired_entry_is_removed_on_read() {
        let (cache, clock) = store(CacheConfig::default());
        cache.set(key("booking:a"), "alpha".to_string());

        // A hit does not extend the lifetime
        clock.advance(Duration::seconds(3000));
        assert!(cache.get(&key("booking:a")).is_some());

        clock.advance(Duration::seconds(601));
        assert_eq!(cache.get(&key("booking:a")), None);
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.get(&key("booking:a")), None);

        let stats = cache.statistics();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.memory_bytes, 0);
    }

    #[test]
    fn test_capacity_never_exceeded() {
        let (cache, clock) = store(small(3));
        for i in 0..10 {
            clock.advance(Duration::seconds(1));
            cache.set(key(&format!("ns:{}", i)), format!("v{}", i));
            assert!(cache.len() <= 3);
        }
        assert_eq!(cache.statistics().evictions, 7);
    }

    #[test]
    fn test_lru_evicts_least_recently_accessed() {
        let (cache, clock) = store(small(2));
        cache.set(key("ns:a"), "a".to_string());
        clock.advance(Duration::seconds(1));
        cache.set(key("ns:b"), "b".to_string());
        clock.advance(Duration::seconds(1));

        // Touch "a" so "b" becomes the LRU victim
        assert!(cache.get(&key("ns:a")).is_some());
        clock.advance(Duration::seconds(1));
        cache.set(key("ns:c"), "c".to_string());

        assert!(cache.contains(&key("ns:a")));
        assert!(!cache.contains(&key("ns:b")));
        assert!(cache.contains(&key("ns:c")));
    }

    #[test]
    fn test_expired_entries_evicted_before_live_ones() {
        let config = CacheConfig {
            max_items: 2,
            expiration_secs: 10,
            ..CacheConfig::default()
        };
        let (cache, clock) = store(config);
        cache.set(key("ns:old"), "old".to_string());
        clock.advance(Duration::seconds(8));
        cache.set(key("ns:young"), "young".to_string());
        clock.advance(Duration::seconds(3));

        // "old" is expired; "young" must survive even though it is the LRU among live entries
        cache.set(key("ns:new"), "new".to_string());
        assert!(cache.contains(&key("ns:young")));
        assert!(cache.contains(&key("ns:new")));
        assert_eq!(cache.statistics().evictions, 1);
    }

    #[test]
    fn test_random_eviction_respects_capacity() {
        let config = CacheConfig {
            max_items: 4,
            enable_lru: false,
            ..CacheConfig::default()
        };
        let (cache, _) = store(config);
        for i in 0..20 {
            cache.set(key(&format!("ns:{}", i)), i.to_string());
        }
        assert_eq!(cache.len(), 4);
        assert!(cache.contains(&key("ns:19")));
    }

    #[test]
    fn test_memory_ceiling_triggers_eviction() {
        let entry = "x".repeat(100);
        let per_entry = entry.size_of();
        let config = CacheConfig {
            max_memory_bytes: per_entry * 2,
            ..CacheConfig::default()
        };
        let (cache, clock) = store(config);
        for i in 0..5 {
            clock.advance(Duration::seconds(1));
            cache.set(key(&format!("ns:{}", i)), entry.clone());
        }
        let stats = cache.statistics();
        assert_eq!(stats.total_items, 2);
        assert!(stats.memory_bytes <= per_entry * 2);
    }

    #[test]
    fn test_replacing_key_does_not_evict() {
        let (cache, _) = store(small(1));
        cache.set(key("ns:a"), "one".to_string());
        cache.set(key("ns:a"), "two".to_string());
        assert_eq!(cache.get(&key("ns:a")), Some("two".to_string()));
        assert_eq!(cache.statistics().evictions, 0);
    }

    #[test]
    fn test_clear_resets_counters() {
        let (cache, _) = store(CacheConfig::default());
        cache.set(key("ns:a"), "a".to_string());
        cache.get(&key("ns:a"));
        cache.get(&key("ns:missing"));
        cache.clear();

        let stats = cache.statistics();
        assert_eq!(stats.total_items, 0);
        assert_eq!(stats.hits + stats.misses + stats.evictions, 0);
        assert_eq!(stats.hit_rate, 0.0);
    }

    #[test]
    fn test_hit_rate() {
        let (cache, _) = store(CacheConfig::default());
        assert_eq!(cache.statistics().hit_rate, 0.0);

        cache.set(key("ns:a"), "a".to_string());
        cache.get(&key("ns:a"));
        cache.get(&key("ns:a"));
        cache.get(&key("ns:a"));
        cache.get(&key("ns:b"));

        let stats = cache.statistics();
        assert_eq!(stats.hit_rate, 0.75);
        assert!((0.0..=1.0).contains(&stats.hit_rate));
    }

    #[test]
    fn test_warmup_does_not_overwrite_or_count() {
        let (cache, _) = store(CacheConfig::default());
        cache.set(key("booking:a"), "original".to_string());

        let added = cache.warmup(vec![
            (key("booking:a"), "replacement".to_string()),
            (key("booking:b"), "b".to_string()),
        ]);
        assert_eq!(added, 1);

        let before = cache.statistics();
        assert_eq!(before.hits + before.misses, 0);
        assert_eq!(cache.get(&key("booking:a")), Some("original".to_string()));
        assert_eq!(cache.get(&key("booking:b")), Some("b".to_string()));
    }

    #[test]
    fn test_clear_namespace() {
        let (cache, _) = store(CacheConfig::default());
        cache.set(key("booking:a"), "a".to_string());
        cache.set(key("booking:b"), "b".to_string());
        cache.set(key("user:c"), "c".to_string());

        assert_eq!(cache.clear_namespace("booking"), 2);
        assert!(!cache.contains(&key("booking:a")));
        assert!(!cache.contains(&key("booking:b")));
        assert!(cache.contains(&key("user:c")));
        assert!(cache.keys_in_namespace("booking").is_empty());
    }

    #[test]
    fn test_metrics_top_keys_and_namespaces() {
        let (cache, _) = store(CacheConfig::default());
        cache.set(key("booking:a"), "a".to_string());
        cache.set(key("booking:b"), "b".to_string());
        cache.set(key("user:c"), "c".to_string());
        for _ in 0..3 {
            cache.get(&key("user:c"));
        }
        cache.get(&key("booking:b"));

        let metrics = cache.metrics(2);
        assert_eq!(metrics.top_keys.len(), 2);
        assert_eq!(metrics.top_keys[0].key, "user:c");
        assert_eq!(metrics.top_keys[0].access_count, 4);
        assert_eq!(metrics.top_keys[1].key, "booking:b");
        assert_eq!(metrics.namespaces.get("booking"), Some(&2));
        assert_eq!(metrics.namespaces.get("user"), Some(&1));
    }

    #[test]
    fn test_concurrent_readers_and_writers() {
        let (cache, _) = store(small(16));
        let cache = Arc::new(cache);
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..200 {
                        let k = key(&format!("ns:{}", (t * 7 + i) % 32));
                        if i % 3 == 0 {
                            cache.set(k, i.to_string());
                        } else {
                            cache.get(&k);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stats = cache.statistics();
        assert!(stats.total_items <= 16);
        assert!((0.0..=1.0).contains(&stats.hit_rate));
    }
}
