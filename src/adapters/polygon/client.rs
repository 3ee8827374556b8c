//! Polygon API Client
//!
//! HTTP plumbing for the Polygon.io REST API. Auth rides as an `apiKey`
//! query parameter on every request, including follow-ups to the
//! `next_url` pagination links which Polygon returns without credentials.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Polygon API client configuration
#[derive(Debug, Clone)]
pub struct PolygonConfig {
    /// Base URL for the Polygon REST API
    pub base_url: String,
    pub api_key: String,
    /// Request timeout
    pub timeout: Duration,
    /// Number of retry attempts
    pub max_retries: u32,
}

impl Default for PolygonConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.polygon.io".to_string(),
            api_key: String::new(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}

#[derive(Error, Debug)]
pub enum PolygonApiError {
    #[error("http error: {0}")]
    Http(String),

    #[error("polygon api error {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("failed to parse polygon response: {0}")]
    Parse(String),
}

/// Polygon REST client
#[derive(Debug, Clone)]
pub struct PolygonClient {
    config: PolygonConfig,
    http: Client,
}

impl PolygonClient {
    pub fn new(config: PolygonConfig) -> Result<Self, PolygonApiError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PolygonApiError::Http(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { config, http })
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, PolygonApiError> {
        let url = format!("{}{}", self.config.base_url, path);
        self.get_absolute(&url, query).await
    }

    /// Fetch a fully qualified URL (used to follow `next_url` links).
    pub async fn get_absolute<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, PolygonApiError> {
        let mut last_error = None;

        for attempt in 0..self.config.max_retries {
            let req = self
                .http
                .get(url)
                .query(query)
                .query(&[("apiKey", self.config.api_key.as_str())]);

            match req.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        let backoff = Duration::from_secs(2u64.pow(attempt + 1));
                        tracing::warn!(
                            "rate limited (429), backing off for {:?} (attempt {}/{})",
                            backoff,
                            attempt + 1,
                            self.config.max_retries
                        );
                        last_error = Some(PolygonApiError::Status {
                            status,
                            body: "rate limit exceeded".into(),
                        });
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    if status.is_server_error() {
                        last_error = Some(PolygonApiError::Status {
                            status,
                            body: "server error".into(),
                        });
                        tokio::time::sleep(Duration::from_millis(500 * (attempt as u64 + 1)))
                            .await;
                        continue;
                    }
                    if !status.is_success() {
                        let body = response.text().await.unwrap_or_default();
                        return Err(PolygonApiError::Status { status, body });
                    }
                    return response
                        .json()
                        .await
                        .map_err(|e| PolygonApiError::Parse(e.to_string()));
                }
                Err(e) => {
                    last_error = Some(PolygonApiError::Http(e.to_string()));
                    tokio::time::sleep(Duration::from_millis(500 * (attempt as u64 + 1))).await;
                }
            }
        }

        Err(last_error.unwrap_or_else(|| PolygonApiError::Http("max retries exceeded".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = PolygonConfig::default();
        assert_eq!(config.base_url, "https://api.polygon.io");
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn client_creation() {
        assert!(PolygonClient::new(PolygonConfig::default()).is_ok());
    }
}
