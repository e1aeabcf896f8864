use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use tracing::debug;

use super::{decode_booking, DataSource, Fetched};
use crate::clock::Clock;
use crate::error::DataError;

/// Fetches a booking document from a remote URL.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpSource {
    client: Client,
    url: String,
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl HttpSource {
    pub fn new(
        url: impl Into<String>,
        timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, DataError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DataError::Configuration(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
            timeout,
            clock,
        })
    }

    fn map_transport_error(&self, err: reqwest::Error) -> DataError {
        if err.is_timeout() {
            DataError::Timeout(self.timeout)
        } else {
            DataError::Network(format!("{}: {}", self.url, err))
        }
    }
}

#[async_trait]
impl DataSource for HttpSource {
    fn describe(&self) -> String {
        self.url.clone()
    }

    async fn fetch(&self) -> Result<Fetched, DataError> {
        let response = self
            .client
            .get(&self.url)
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DataError::from_status(status.as_u16(), &body));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.map_transport_error(e))?;
        debug!(url = %self.url, bytes = bytes.len(), "Fetched booking document");

        let booking = decode_booking(&bytes)?;
        Ok(Fetched {
            booking,
            fetched_at: self.clock.now(),
        })
    }
}
