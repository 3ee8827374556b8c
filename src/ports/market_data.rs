//! Equity market data port

use async_trait::async_trait;
use thiserror::Error;

use super::models::PriceBar;

/// Market data error type
#[derive(Error, Debug, Clone)]
pub enum MarketDataError {
    #[error("market data request failed: {0}")]
    Request(String),

    #[error("market data response malformed: {0}")]
    Malformed(String),

    #[error("no market data for {0}")]
    NoData(String),
}

/// Market data port trait
#[async_trait]
pub trait MarketDataPort: Send + Sync {
    /// Most recent trade price.
    async fn latest_price(&self, symbol: &str) -> Result<f64, MarketDataError>;

    /// Up to `limit` daily bars, oldest first.
    async fn daily_bars(&self, symbol: &str, limit: usize)
        -> Result<Vec<PriceBar>, MarketDataError>;
}
