use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, Duration, TimeZone, Utc};

/// A stored value plus the bookkeeping the in-memory tier needs for
/// expiry and LRU ordering.
///
/// Access metadata is atomic so a cache hit only needs a shared lock
/// on the map.
#[derive(Debug)]
pub struct CacheEntry<V> {
    pub value: V,
    pub created_at: DateTime<Utc>,
    /// Estimated footprint, computed once on insert.
    pub size: usize,
    last_access_ms: AtomicI64,
    access_count: AtomicU64,
}

impl<V> CacheEntry<V> {
    pub fn new(value: V, size: usize, now: DateTime<Utc>) -> Self {
        Self {
            value,
            created_at: now,
            size,
            last_access_ms: AtomicI64::new(now.timestamp_millis()),
            access_count: AtomicU64::new(1),
        }
    }

    /// Stored at millisecond precision, so it is clamped to `created_at`
    /// for hits within the creation millisecond.
    pub fn last_access(&self) -> DateTime<Utc> {
        let ms = self.last_access_ms.load(Ordering::Relaxed);
        Utc.timestamp_millis_opt(ms)
            .single()
            .map_or(self.created_at, |at| at.max(self.created_at))
    }

    pub fn access_count(&self) -> u64 {
        self.access_count.load(Ordering::Relaxed)
    }

    /// Record a hit. `last_access` never moves backwards.
    pub fn touch(&self, now: DateTime<Utc>) {
        self.last_access_ms
            .fetch_max(now.timestamp_millis(), Ordering::Relaxed);
        self.access_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }

    /// Access does not extend the lifetime; only the write time counts.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.age(now) > ttl
    }
}
