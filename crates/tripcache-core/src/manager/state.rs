use std::fmt;

use serde::Serialize;

use crate::cache::{CacheStatistics, MemoryInfo};

/// Public state of the current-booking slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum DataState {
    Loading,
    Loaded,
    /// The loaded booking has passed its own expiry time.
    Expired,
    Error(String),
}

impl DataState {
    pub fn is_loaded(&self) -> bool {
        matches!(self, DataState::Loaded)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, DataState::Error(_))
    }
}

impl fmt::Display for DataState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataState::Loading => write!(f, "Loading"),
            DataState::Loaded => write!(f, "Loaded"),
            DataState::Expired => write!(f, "Expired"),
            DataState::Error(message) => write!(f, "Error: {}", message),
        }
    }
}

/// Non-fatal advisories. `healthy` is true when there are none.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub issues: Vec<String>,
}

impl HealthReport {
    pub fn from_issues(issues: Vec<String>) -> Self {
        Self {
            healthy: issues.is_empty(),
            issues,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceReport {
    pub memory: MemoryInfo,
    pub cache: CacheStatistics,
    pub in_flight_requests: usize,
    pub pending_waiters: usize,
    pub background_refresh_running: bool,
    pub disk_cache_valid: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(DataState::Loaded.to_string(), "Loaded");
        assert_eq!(DataState::Error("boom".into()).to_string(), "Error: boom");
    }

    #[test]
    fn test_health_report_from_issues() {
        assert!(HealthReport::from_issues(vec![]).healthy);
        assert!(!HealthReport::from_issues(vec!["memory".into()]).healthy);
    }
}
