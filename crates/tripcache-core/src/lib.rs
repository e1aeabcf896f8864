//! tripcache-core - booking data with a two-tier cache.
//!
//! This crate holds everything except presentation:
//! - Booking models and validation
//! - An in-memory cache store and a single-record disk layer
//! - Strategy selection for which tier(s) to read and write
//! - Request deduplication for concurrent identical fetches
//! - Data sources (bundled file, HTTP) with retry and timeout
//! - The `DataManager` façade tying it together

pub mod cache;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod manager;
pub mod models;
pub mod retry;
pub mod source;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{
    CacheConfig, CacheStatistics, CacheStrategy, MemoryInfo, MemoryInfoProvider, SystemMemory,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, ManagerConfig};
pub use error::{DataError, Result, StorageError};
pub use manager::{DataManager, DataManagerBuilder, DataState, HealthReport, ResourceReport};
pub use models::{Booking, Segment, ValidationRules};
pub use source::{DataSource, Fetched, FileSource, HttpSource, SourceLocation};
