//! Alpaca API Client
//!
//! Shared HTTP plumbing for the Alpaca trading and market data hosts.
//! Handles auth headers, retry with backoff, and response decoding; the
//! port implementations in this module map `AlpacaApiError` into their
//! own error types.

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Alpaca API client configuration
#[derive(Debug, Clone)]
pub struct AlpacaConfig {
    /// Trading host (paper or live), without a version path
    pub trading_host: String,
    /// Market data host, without a version path
    pub data_host: String,
    pub key_id: String,
    pub secret_key: String,
    /// Request timeout
    pub timeout: Duration,
    /// Number of retry attempts
    pub max_retries: u32,
}

impl Default for AlpacaConfig {
    fn default() -> Self {
        Self {
            trading_host: Self::PAPER_TRADING_HOST.to_string(),
            data_host: "https://data.alpaca.markets".to_string(),
            key_id: String::new(),
            secret_key: String::new(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}

impl AlpacaConfig {
    /// Paper-trading host, the default.
    pub const PAPER_TRADING_HOST: &'static str = "https://paper-api.alpaca.markets";
    /// Live-trading host. Paper is the default; going live is explicit.
    pub const LIVE_TRADING_HOST: &'static str = "https://api.alpaca.markets";
}

#[derive(Error, Debug)]
pub enum AlpacaApiError {
    #[error("http error: {0}")]
    Http(String),

    #[error("alpaca api error {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("failed to parse alpaca response: {0}")]
    Parse(String),
}

impl AlpacaApiError {
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            AlpacaApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Which Alpaca host a request targets.
#[derive(Debug, Clone, Copy)]
pub enum Host {
    Trading,
    Data,
}

/// Alpaca REST client shared by the trading, market data, and news adapters
#[derive(Debug, Clone)]
pub struct AlpacaClient {
    config: AlpacaConfig,
    http: Client,
}

impl AlpacaClient {
    pub fn new(config: AlpacaConfig) -> Result<Self, AlpacaApiError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AlpacaApiError::Http(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { config, http })
    }

    fn base(&self, host: Host) -> &str {
        match host {
            Host::Trading => &self.config.trading_host,
            Host::Data => &self.config.data_host,
        }
    }

    fn request(&self, method: Method, host: Host, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base(host), path);
        self.http
            .request(method, url)
            .header("APCA-API-KEY-ID", &self.config.key_id)
            .header("APCA-API-SECRET-KEY", &self.config.secret_key)
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        host: Host,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, AlpacaApiError> {
        let req = self.request(Method::GET, host, path).query(query);
        let response = self.execute_with_retry(req).await?;
        Self::decode(response).await
    }

    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        host: Host,
        path: &str,
        body: &B,
    ) -> Result<T, AlpacaApiError> {
        let req = self.request(Method::POST, host, path).json(body);
        let response = self.execute_with_retry(req).await?;
        Self::decode(response).await
    }

    pub async fn delete_json<T: DeserializeOwned>(
        &self,
        host: Host,
        path: &str,
    ) -> Result<T, AlpacaApiError> {
        let req = self.request(Method::DELETE, host, path);
        let response = self.execute_with_retry(req).await?;
        Self::decode(response).await
    }

    /// Send with retry: 429 backs off exponentially (2s, 4s, 8s), 5xx and
    /// transport errors back off linearly. 4xx returns immediately so the
    /// caller sees the body.
    async fn execute_with_retry(
        &self,
        req: RequestBuilder,
    ) -> Result<reqwest::Response, AlpacaApiError> {
        let mut last_error = None;

        for attempt in 0..self.config.max_retries {
            let attempt_req = req
                .try_clone()
                .ok_or_else(|| AlpacaApiError::Http("failed to clone request".into()))?;

            match attempt_req.send().await {
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
                        last_error = Some(AlpacaApiError::Status {
                            status,
                            body: "rate limit exceeded".into(),
                        });
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    if status.is_server_error() {
                        last_error = Some(AlpacaApiError::Status {
                            status,
                            body: "server error".into(),
                        });
                        tokio::time::sleep(Duration::from_millis(500 * (attempt as u64 + 1)))
                            .await;
                        continue;
                    }
                    return Ok(response);
                }
                Err(e) => {
                    last_error = Some(AlpacaApiError::Http(e.to_string()));
                    tokio::time::sleep(Duration::from_millis(500 * (attempt as u64 + 1))).await;
                }
            }
        }

        Err(last_error.unwrap_or_else(|| AlpacaApiError::Http("max retries exceeded".into())))
    }

    async fn decode<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, AlpacaApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AlpacaApiError::Status { status, body });
        }
        response
            .json()
            .await
            .map_err(|e| AlpacaApiError::Parse(e.to_string()))
    }
}
