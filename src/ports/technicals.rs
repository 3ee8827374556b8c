//! Technical indicator port

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::market_data::MarketDataError;

/// Technicals error type
#[derive(Error, Debug, Clone)]
pub enum TechnicalsError {
    #[error("not enough history for {symbol}: {got} bars")]
    InsufficientHistory { symbol: String, got: usize },

    #[error(transparent)]
    Data(#[from] MarketDataError),
}

/// MACD line, signal line, and their difference.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MacdValue {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// Coarse trend read used in oracle prompts and status output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Bullish,
    Bearish,
    Sideways,
}

impl std::fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TrendDirection::Bullish => "bullish",
            TrendDirection::Bearish => "bearish",
            TrendDirection::Sideways => "sideways",
        };
        write!(f, "{s}")
    }
}

/// Indicator bundle for one symbol. Longer-window averages are `None` when
/// the available history cannot support them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechnicalSnapshot {
    pub symbol: String,
    pub price: f64,
    pub rsi_14: Option<f64>,
    pub sma_50: Option<f64>,
    pub sma_200: Option<f64>,
    pub macd: Option<MacdValue>,
    pub trend: TrendDirection,
}

/// Technicals port trait
#[async_trait]
pub trait TechnicalsPort: Send + Sync {
    /// Compute the indicator bundle for a symbol.
    async fn snapshot(&self, symbol: &str) -> Result<TechnicalSnapshot, TechnicalsError>;
}
