//! Device description download

use std::time::Duration;

use tracing::debug;

use crate::error::{DiscoveryError, Result};

/// Blocking HTTP fetcher for device description documents
#[derive(Debug, Clone)]
pub struct DescriptionFetcher {
    http_client: reqwest::blocking::Client,
}

impl DescriptionFetcher {
    /// Create a fetcher whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        let http_client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DiscoveryError::HttpError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http_client })
    }

    /// Download the description document at `location`
    pub fn fetch(&self, location: &str) -> Result<String> {
        let response = self
            .http_client
            .get(location)
            .send()
            .map_err(|e| DiscoveryError::HttpError(format!("Failed to fetch device description: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DiscoveryError::Status {
                location: location.to_string(),
                status: status.as_u16(),
            });
        }

        let xml = response
            .text()
            .map_err(|e| DiscoveryError::HttpError(format!("Failed to read response body: {}", e)))?;

        debug!(location, bytes = xml.len(), "Downloaded device description");
        Ok(xml)
    }
}
