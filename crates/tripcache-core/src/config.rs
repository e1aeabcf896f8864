//! Configuration.
//!
//! `ManagerConfig` tunes the data manager: cache strategy and limits, retry
//! budgets, timeouts, background refresh and validation. `Config` is the
//! application file stored at `~/.config/tripcache/config.json`, which
//! names the data source and embeds a `ManagerConfig`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cache::persistent::DEFAULT_VALIDITY_SECS;
use crate::cache::{CacheConfig, CacheStrategy};
use crate::models::ValidationRules;
use crate::retry::RetryPolicy;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "tripcache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Disk tier file name inside the cache directory
const DISK_CACHE_FILE: &str = "booking.json";

/// Attempts for a normal `get`.
const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 3;

/// Attempts for an explicit `refresh`; the caller asked for fresh data so we try harder.
const DEFAULT_REFRESH_RETRY_ATTEMPTS: u32 = 5;

const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Per-attempt upstream timeout.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 300;

/// Refresh in the background once the booking is this close to expiring.
const DEFAULT_REFRESH_THRESHOLD_SECS: u64 = 3600;

/// Health check flags more concurrent waiters than this.
const DEFAULT_MAX_WAITERS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub strategy: CacheStrategy,
    pub cache: CacheConfig,
    /// Disk tier validity window, independent of `cache.expiration_secs`.
    pub disk_validity_secs: u64,
    pub max_retry_attempts: u32,
    pub refresh_retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub exponential_backoff: bool,
    pub request_timeout_secs: u64,
    pub background_refresh: bool,
    pub refresh_interval_secs: u64,
    pub refresh_threshold_secs: u64,
    pub validation: ValidationRules,
    pub max_waiters: usize,
    /// Drop the in-memory tier on destroy when running memory-only.
    pub clear_memory_on_destroy: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            strategy: CacheStrategy::default(),
            cache: CacheConfig::default(),
            disk_validity_secs: DEFAULT_VALIDITY_SECS,
            max_retry_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
            refresh_retry_attempts: DEFAULT_REFRESH_RETRY_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            exponential_backoff: false,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            background_refresh: false,
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
            refresh_threshold_secs: DEFAULT_REFRESH_THRESHOLD_SECS,
            validation: ValidationRules::default(),
            max_waiters: DEFAULT_MAX_WAITERS,
            clear_memory_on_destroy: true,
        }
    }
}

impl ManagerConfig {
    pub fn get_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retry_attempts,
            Duration::from_millis(self.retry_delay_ms),
            self.exponential_backoff,
        )
    }

    pub fn refresh_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.refresh_retry_attempts,
            Duration::from_millis(self.retry_delay_ms),
            self.exponential_backoff,
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }

    pub fn refresh_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.refresh_threshold_secs as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Bundled file path or http(s) URL.
    pub source: Option<String>,
    /// Overrides the platform cache directory.
    pub cache_dir: Option<PathBuf>,
    pub manager: ManagerConfig,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.cache_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn disk_cache_path(&self) -> Result<PathBuf> {
        Ok(self.cache_dir()?.join(DISK_CACHE_FILE))
    }
}
