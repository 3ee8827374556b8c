//! Common data structures shared across ports
//!
//! Money and share quantities at the broker boundary are `Decimal`; analytic
//! inputs (bars, indicator values) stay `f64`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Order side (buy/sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Asset class classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
    UsEquity,
    UsOption,
    Crypto,
}

/// Position direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionSide {
    Long,
    Short,
}

/// Account balances snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    /// Total account value
    pub equity: Decimal,

    /// Settled cash available
    pub cash: Decimal,

    /// Buying power (may include margin)
    pub buying_power: Decimal,

    /// Equity at the previous close, for daily drawdown math
    pub last_equity: Decimal,
}

impl AccountSnapshot {
    /// Today's move versus the prior close, as a signed fraction.
    pub fn daily_change_pct(&self) -> Option<f64> {
        use rust_decimal::prelude::ToPrimitive;
        let last = self.last_equity.to_f64()?;
        let equity = self.equity.to_f64()?;
        if last <= 0.0 {
            return None;
        }
        Some((equity - last) / last)
    }
}

/// An open position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub qty: Decimal,
    pub avg_entry_price: Decimal,
    pub current_price: Decimal,

    /// Unrealized profit/loss as a signed fraction of entry value
    pub unrealized_pnl_pct: f64,

    pub side: PositionSide,
    pub asset_class: AssetClass,
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
}

/// Time in force
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeInForce {
    Day,
    Gtc,
}

/// Order request handed to a broker port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSpec {
    pub symbol: String,
    pub qty: Decimal,
    pub side: OrderSide,
    pub order_type: OrderType,

    /// Required for limit orders, ignored for market orders
    pub limit_price: Option<Decimal>,

    pub time_in_force: TimeInForce,
    pub asset_class: AssetClass,
}

impl OrderSpec {
    /// Day market order, the common case for both loops.
    pub fn market(symbol: &str, qty: Decimal, side: OrderSide, asset_class: AssetClass) -> Self {
        Self {
            symbol: symbol.to_string(),
            qty,
            side,
            order_type: OrderType::Market,
            limit_price: None,
            time_in_force: TimeInForce::Day,
            asset_class,
        }
    }
}

/// Order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Accepted,
    Filled,
    PartiallyFilled,
    Cancelled,
    Rejected,
}

/// Broker acknowledgment of a submitted order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderReceipt {
    pub order_id: String,
    pub symbol: String,
    pub qty: Decimal,
    pub side: OrderSide,
    pub status: OrderStatus,
    pub filled_avg_price: Option<Decimal>,
    pub submitted_at: DateTime<Utc>,
}

/// Exchange session clock
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketClock {
    pub is_open: bool,
    pub next_open: DateTime<Utc>,
    pub next_close: DateTime<Utc>,
}

impl MarketClock {
    /// Minutes until the session closes; `None` when the market is closed.
    pub fn minutes_to_close(&self, now: DateTime<Utc>) -> Option<i64> {
        self.is_open.then(|| (self.next_close - now).num_minutes())
    }
}

/// Daily OHLCV bar
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PriceBar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn daily_change_pct_is_signed() {
        let account = AccountSnapshot {
            equity: dec!(97000),
            cash: dec!(50000),
            buying_power: dec!(100000),
            last_equity: dec!(100000),
        };
        let change = account.daily_change_pct().unwrap();
        assert!((change - (-0.03)).abs() < 1e-9);
    }

    #[test]
    fn daily_change_pct_requires_prior_equity() {
        let account = AccountSnapshot {
            equity: dec!(1000),
            cash: dec!(1000),
            buying_power: dec!(1000),
            last_equity: dec!(0),
        };
        assert!(account.daily_change_pct().is_none());
    }

    #[test]
    fn minutes_to_close_only_while_open() {
        let now = Utc::now();
        let clock = MarketClock {
            is_open: true,
            next_open: now + chrono::Duration::hours(18),
            next_close: now + chrono::Duration::minutes(90),
        };
        assert_eq!(clock.minutes_to_close(now), Some(90));

        let closed = MarketClock {
            is_open: false,
            ..clock
        };
        assert_eq!(closed.minutes_to_close(now), None);
    }

    #[test]
    fn market_order_defaults() {
        let spec = OrderSpec::market("AAPL", dec!(10), OrderSide::Buy, AssetClass::UsEquity);
        assert_eq!(spec.order_type, OrderType::Market);
        assert_eq!(spec.time_in_force, TimeInForce::Day);
        assert!(spec.limit_price.is_none());
    }
}
