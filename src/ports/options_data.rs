//! Options chain data port

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::gex::types::OptionContract;

/// Options data error type
#[derive(Error, Debug, Clone)]
pub enum OptionsDataError {
    #[error("options vendor request failed: {0}")]
    Request(String),

    #[error("options vendor returned malformed data: {0}")]
    Malformed(String),

    #[error("no options data: {0}")]
    NoData(String),
}

/// One expiration's chain as fetched from the vendor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSnapshot {
    /// Underlying price as reported alongside the chain, when the vendor
    /// supplies one.
    pub underlying_price: Option<f64>,

    pub contracts: Vec<OptionContract>,
}

/// Options chain port trait
#[async_trait]
pub trait OptionsDataPort: Send + Sync {
    /// Upcoming expiration dates for a ticker, nearest first.
    async fn expirations(&self, ticker: &str) -> Result<Vec<NaiveDate>, OptionsDataError>;

    /// Full chain (both sides, all strikes) for one expiration.
    async fn chain(
        &self,
        ticker: &str,
        expiration: NaiveDate,
    ) -> Result<ChainSnapshot, OptionsDataError>;

    /// Spot quote for the underlying, used when no chain carries one.
    async fn spot_price(&self, ticker: &str) -> Result<f64, OptionsDataError>;
}
