//! Upstream booking sources.
//!
//! A `DataSource` yields a decoded `Booking` plus the time it was fetched.
//! The manager is agnostic to where the bytes come from: a bundled file,
//! an HTTP endpoint, or a test double.

pub mod file;
pub mod http;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::clock::Clock;
use crate::error::DataError;
use crate::models::Booking;

pub use file::FileSource;
pub use http::HttpSource;

#[derive(Debug, Clone, PartialEq)]
pub struct Fetched {
    pub booking: Booking,
    pub fetched_at: DateTime<Utc>,
}

#[async_trait]
pub trait DataSource: Send + Sync {
    /// Short label for logs.
    fn describe(&self) -> String;

    async fn fetch(&self) -> Result<Fetched, DataError>;
}

/// Decode a booking payload.
pub fn decode_booking(bytes: &[u8]) -> Result<Booking, DataError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(DataError::NotFound("payload is empty".to_string()));
    }
    serde_json::from_slice(bytes).map_err(|e| DataError::Decode(e.to_string()))
}

/// Where to fetch from, as written in config or on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    File(std::path::PathBuf),
    Http(String),
}

impl SourceLocation {
    pub fn parse(location: &str) -> Self {
        let trimmed = location.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            SourceLocation::Http(trimmed.to_string())
        } else {
            SourceLocation::File(trimmed.into())
        }
    }

    pub fn into_source(
        self,
        timeout: std::time::Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<dyn DataSource>, DataError> {
        Ok(match self {
            SourceLocation::File(path) => Arc::new(FileSource::new(path, clock)),
            SourceLocation::Http(url) => Arc::new(HttpSource::new(url, timeout, clock)?),
        })
    }
}
