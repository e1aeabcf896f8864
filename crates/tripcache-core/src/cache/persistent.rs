//! Durable single-slot tier.
//!
//! Holds exactly one record as pretty JSON on disk, wrapped with the time it
//! was fetched and its own expiry. That expiry is independent of the
//! in-memory tier's TTL.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use crate::clock::Clock;
use crate::error::StorageError;

/// Default disk validity window (5 minutes).
pub const DEFAULT_VALIDITY_SECS: u64 = 300;

/// The persisted envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRecord<T> {
    pub record: T,
    pub fetched_at: DateTime<Utc>,
    pub expiry: DateTime<Utc>,
}

impl<T> CachedRecord<T> {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expiry
    }

    pub fn time_remaining(&self, now: DateTime<Utc>) -> Duration {
        self.expiry - now
    }

    pub fn age_minutes(&self, now: DateTime<Utc>) -> i64 {
        (now - self.fetched_at).num_minutes()
    }

    pub fn age_display(&self, now: DateTime<Utc>) -> String {
        let minutes = self.age_minutes(now);
        if minutes < 1 {
            // Also covers clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            if minutes % 60 >= 30 {
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            if (minutes % 1440) / 60 >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }
}

pub struct PersistentLayer<T> {
    path: PathBuf,
    validity: Duration,
    clock: Arc<dyn Clock>,
    /// Serializes file access so a save never interleaves with another save or a load.
    io_lock: Mutex<()>,
    _record: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> PersistentLayer<T> {
    pub fn new(
        path: PathBuf,
        validity_secs: u64,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| io_error(parent, source))?;
        }
        Ok(Self {
            path,
            validity: Duration::seconds(validity_secs as i64),
            clock,
            io_lock: Mutex::new(()),
            _record: PhantomData,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn validity(&self) -> Duration {
        self.validity
    }

    /// Replace the stored record. Expiry is `fetched_at + validity`.
    pub fn save(&self, record: &T, fetched_at: DateTime<Utc>) -> Result<(), StorageError> {
        let envelope = CachedRecord {
            record,
            fetched_at,
            expiry: fetched_at + self.validity,
        };
        let contents = serde_json::to_string_pretty(&envelope).map_err(StorageError::Serialize)?;

        let _guard = self.io_lock.lock();
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, contents).map_err(|source| io_error(&tmp, source))?;
        std::fs::rename(&tmp, &self.path).map_err(|source| io_error(&self.path, source))?;
        debug!(
            path = %self.path.display(),
            expiry = %envelope.expiry,
            "Saved record to disk cache"
        );
        Ok(())
    }

    /// The stored record regardless of validity, or `None` if nothing is stored.
    pub fn load(&self) -> Result<Option<CachedRecord<T>>, StorageError> {
        let _guard = self.io_lock.lock();
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(io_error(&self.path, source)),
        };
        let cached = serde_json::from_str(&contents).map_err(|source| StorageError::Corrupt {
            path: self.path.display().to_string(),
            source,
        })?;
        Ok(Some(cached))
    }

    /// Remove the stored record. Succeeds if there was nothing to remove.
    pub fn clear(&self) -> Result<(), StorageError> {
        let _guard = self.io_lock.lock();
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(io_error(&self.path, source)),
        }
    }

    /// Load errors count as invalid.
    pub fn is_valid(&self) -> bool {
        match self.load() {
            Ok(Some(cached)) => cached.is_valid_at(self.clock.now()),
            Ok(None) => false,
            Err(e) => {
                debug!(error = %e, "Failed to load disk cache for validity check");
                false
            }
        }
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.display().to_string(),
        source,
    }
}
