use std::time::Duration;

use thiserror::Error;

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Failures of the data path, from the source up to the manager façade.
///
/// `Clone` so a single outcome can be handed to every caller waiting on
/// the same in-flight request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DataError {
    #[error("No booking data available: {0}")]
    NotFound(String),

    #[error("Malformed booking payload: {0}")]
    Decode(String),

    #[error("Invalid booking: {0}")]
    Validation(String),

    #[error("Booking {reference} expired at {expired_at}")]
    Expired {
        reference: String,
        expired_at: String,
    },

    #[error("Cache storage error: {0}")]
    Storage(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Data manager has been destroyed")]
    ManagerDestroyed,

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Access denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DataError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DataError::Network(_) | DataError::Timeout(_) | DataError::Storage(_)
        )
    }

    /// Truncate a response body to avoid logging excessive data
    pub(crate) fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Map a non-success HTTP status to the matching error category.
    pub fn from_status(status: u16, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status {
            401 | 403 => DataError::PermissionDenied(truncated),
            404 => DataError::NotFound(truncated),
            408 | 429 => DataError::Network(format!("Status {}: {}", status, truncated)),
            500..=599 => DataError::Network(format!("Server error {}: {}", status, truncated)),
            _ => DataError::Decode(format!("Unexpected status {}: {}", status, truncated)),
        }
    }
}

/// Failures of the durable tier.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize cached record: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Corrupt cache file {path}: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl From<StorageError> for DataError {
    fn from(err: StorageError) -> Self {
        DataError::Storage(err.to_string())
    }
}

pub type Result<T, E = DataError> = std::result::Result<T, E>;
