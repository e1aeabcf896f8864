use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{decode_booking, DataSource, Fetched};
use crate::clock::Clock;
use crate::error::DataError;

/// Reads a booking bundled as a JSON file.
pub struct FileSource {
    path: PathBuf,
    clock: Arc<dyn Clock>,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: path.into(),
            clock,
        }
    }
}

#[async_trait]
impl DataSource for FileSource {
    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }

    async fn fetch(&self) -> Result<Fetched, DataError> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                DataError::NotFound(format!("{} does not exist", self.path.display()))
            }
            std::io::ErrorKind::PermissionDenied => {
                DataError::PermissionDenied(format!("{}: {}", self.path.display(), e))
            }
            _ => DataError::Storage(format!("Failed to read {}: {}", self.path.display(), e)),
        })?;
        debug!(path = %self.path.display(), bytes = bytes.len(), "Read booking file");

        let booking = decode_booking(&bytes)?;
        Ok(Fetched {
            booking,
            fetched_at: self.clock.now(),
        })
    }
}
