//! Two-tier caching for booking data.
//!
//! - `CacheStore`: bounded in-memory map with per-entry TTL, LRU eviction
//!   and hit/miss/eviction statistics
//! - `PersistentLayer`: single JSON record on disk with its own validity window
//! - `strategy`: which tier(s) a read probes and a write lands in
//!
//! The two tiers expire independently; a record can be fresh in one and
//! stale in the other.

pub mod entry;
pub mod key;
pub mod persistent;
pub mod store;
pub mod strategy;

pub use entry::CacheEntry;
pub use key::CacheKey;
pub use persistent::{CachedRecord, PersistentLayer};
pub use store::{CacheConfig, CacheMetrics, CacheStatistics, CacheStore, KeyAccess};
pub use strategy::{
    read_plan, resolve_write_strategy, write_plan, CacheStrategy, FixedMemory, MemoryInfo,
    MemoryInfoProvider, SystemMemory, Tier, WritePlan,
};
