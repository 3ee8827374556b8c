//! Brokerage execution port

use async_trait::async_trait;
use thiserror::Error;

use super::models::{AccountSnapshot, MarketClock, OrderReceipt, OrderSpec, Position};

/// Broker error type
#[derive(Error, Debug, Clone)]
pub enum BrokerError {
    #[error("broker request failed: {0}")]
    Request(String),

    #[error("broker rejected order: {0}")]
    Rejected(String),

    #[error("insufficient funds: need ${needed:.2}, have ${available:.2}")]
    InsufficientFunds { needed: f64, available: f64 },

    #[error("no open position in {0}")]
    UnknownPosition(String),

    #[error("broker response malformed: {0}")]
    Malformed(String),
}

/// Broker port trait
#[async_trait]
pub trait BrokerPort: Send + Sync {
    /// Current balances.
    async fn account(&self) -> Result<AccountSnapshot, BrokerError>;

    /// All open positions.
    async fn positions(&self) -> Result<Vec<Position>, BrokerError>;

    /// One position by symbol, `None` when flat.
    async fn position(&self, symbol: &str) -> Result<Option<Position>, BrokerError>;

    /// Submit an order.
    async fn submit_order(&self, spec: &OrderSpec) -> Result<OrderReceipt, BrokerError>;

    /// Flatten one position at market.
    async fn close_position(&self, symbol: &str) -> Result<OrderReceipt, BrokerError>;

    /// Cancel every open order; returns how many were cancelled.
    async fn cancel_all_orders(&self) -> Result<u32, BrokerError>;

    /// Flatten everything at market.
    async fn close_all_positions(&self) -> Result<Vec<OrderReceipt>, BrokerError>;

    /// Exchange session clock.
    async fn clock(&self) -> Result<MarketClock, BrokerError>;
}
