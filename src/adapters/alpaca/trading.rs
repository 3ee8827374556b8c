//! Alpaca Trading API
//!
//! `BrokerPort` implementation over the Alpaca v2 trading endpoints.
//! Alpaca quotes money and quantities as JSON strings; everything is
//! decoded into `Decimal` and converted at the edges.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::ports::broker::{BrokerError, BrokerPort};
use crate::ports::models::{
    AccountSnapshot, AssetClass, MarketClock, OrderReceipt, OrderSide, OrderSpec, OrderStatus,
    OrderType, Position, PositionSide, TimeInForce,
};

use super::client::{AlpacaApiError, AlpacaClient, Host};

impl From<AlpacaApiError> for BrokerError {
    fn from(err: AlpacaApiError) -> Self {
        match err {
            AlpacaApiError::Status { status, body } if status == StatusCode::FORBIDDEN => {
                BrokerError::Rejected(body)
            }
            AlpacaApiError::Status { status, body } if status.is_client_error() => {
                BrokerError::Rejected(format!("{status}: {body}"))
            }
            AlpacaApiError::Status { status, body } => {
                BrokerError::Request(format!("{status}: {body}"))
            }
            AlpacaApiError::Http(msg) => BrokerError::Request(msg),
            AlpacaApiError::Parse(msg) => BrokerError::Malformed(msg),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AlpacaAccount {
    equity: Decimal,
    cash: Decimal,
    buying_power: Decimal,
    last_equity: Decimal,
}

#[derive(Debug, Deserialize)]
struct AlpacaPosition {
    symbol: String,
    qty: Decimal,
    avg_entry_price: Decimal,
    current_price: Decimal,
    /// Unrealized P/L fraction, e.g. "0.0945"
    unrealized_plpc: Decimal,
    side: PositionSide,
    asset_class: AssetClass,
}

impl From<AlpacaPosition> for Position {
    fn from(p: AlpacaPosition) -> Self {
        Position {
            symbol: p.symbol,
            qty: p.qty,
            avg_entry_price: p.avg_entry_price,
            current_price: p.current_price,
            unrealized_pnl_pct: p.unrealized_plpc.to_f64().unwrap_or(0.0),
            side: p.side,
            asset_class: p.asset_class,
        }
    }
}

#[derive(Debug, Serialize)]
struct OrderRequest {
    symbol: String,
    qty: Decimal,
    side: &'static str,
    #[serde(rename = "type")]
    order_type: &'static str,
    time_in_force: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit_price: Option<Decimal>,
}

impl OrderRequest {
    fn from_spec(spec: &OrderSpec) -> Self {
        Self {
            symbol: spec.symbol.clone(),
            qty: spec.qty,
            side: spec.side.as_str(),
            order_type: match spec.order_type {
                OrderType::Market => "market",
                OrderType::Limit => "limit",
            },
            time_in_force: match spec.time_in_force {
                TimeInForce::Day => "day",
                TimeInForce::Gtc => "gtc",
            },
            limit_price: spec.limit_price,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AlpacaOrder {
    id: String,
    symbol: String,
    qty: Decimal,
    side: String,
    status: String,
    filled_avg_price: Option<Decimal>,
    submitted_at: DateTime<Utc>,
}

fn map_status(status: &str) -> OrderStatus {
    match status {
        "filled" => OrderStatus::Filled,
        "partially_filled" => OrderStatus::PartiallyFilled,
        "canceled" | "cancelled" => OrderStatus::Cancelled,
        "rejected" => OrderStatus::Rejected,
        _ => OrderStatus::Accepted,
    }
}

impl From<AlpacaOrder> for OrderReceipt {
    fn from(o: AlpacaOrder) -> Self {
        OrderReceipt {
            order_id: o.id,
            symbol: o.symbol,
            qty: o.qty,
            side: if o.side == "sell" {
                OrderSide::Sell
            } else {
                OrderSide::Buy
            },
            status: map_status(&o.status),
            filled_avg_price: o.filled_avg_price,
            submitted_at: o.submitted_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AlpacaClock {
    is_open: bool,
    next_open: DateTime<Utc>,
    next_close: DateTime<Utc>,
}

/// One element of the close-all response; `body` is absent for entries
/// Alpaca could not close.
#[derive(Debug, Deserialize)]
struct CloseAllItem {
    #[allow(dead_code)]
    symbol: String,
    body: Option<AlpacaOrder>,
}

#[derive(Debug, Deserialize)]
struct CancelledOrder {
    #[allow(dead_code)]
    id: String,
}

/// Alpaca-backed broker
#[derive(Debug, Clone)]
pub struct AlpacaBroker {
    client: AlpacaClient,
}

impl AlpacaBroker {
    pub fn new(client: AlpacaClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BrokerPort for AlpacaBroker {
    async fn account(&self) -> Result<AccountSnapshot, BrokerError> {
        let account: AlpacaAccount = self
            .client
            .get_json(Host::Trading, "/v2/account", &[])
            .await?;
        Ok(AccountSnapshot {
            equity: account.equity,
            cash: account.cash,
            buying_power: account.buying_power,
            last_equity: account.last_equity,
        })
    }

    async fn positions(&self) -> Result<Vec<Position>, BrokerError> {
        let positions: Vec<AlpacaPosition> = self
            .client
            .get_json(Host::Trading, "/v2/positions", &[])
            .await?;
        Ok(positions.into_iter().map(Position::from).collect())
    }

    async fn position(&self, symbol: &str) -> Result<Option<Position>, BrokerError> {
        let path = format!("/v2/positions/{symbol}");
        match self
            .client
            .get_json::<AlpacaPosition>(Host::Trading, &path, &[])
            .await
        {
            Ok(position) => Ok(Some(position.into())),
            Err(err) if err.status_code() == Some(StatusCode::NOT_FOUND) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn submit_order(&self, spec: &OrderSpec) -> Result<OrderReceipt, BrokerError> {
        let request = OrderRequest::from_spec(spec);
        let order: AlpacaOrder = self
            .client
            .post_json(Host::Trading, "/v2/orders", &request)
            .await?;
        info!(
            symbol = %spec.symbol,
            side = %spec.side,
            qty = %spec.qty,
            order_id = %order.id,
            "order submitted"
        );
        Ok(order.into())
    }

    async fn close_position(&self, symbol: &str) -> Result<OrderReceipt, BrokerError> {
        let path = format!("/v2/positions/{symbol}");
        match self
            .client
            .delete_json::<AlpacaOrder>(Host::Trading, &path)
            .await
        {
            Ok(order) => {
                info!(symbol, order_id = %order.id, "position close submitted");
                Ok(order.into())
            }
            Err(err) if err.status_code() == Some(StatusCode::NOT_FOUND) => {
                Err(BrokerError::UnknownPosition(symbol.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn cancel_all_orders(&self) -> Result<u32, BrokerError> {
        let cancelled: Vec<CancelledOrder> = self
            .client
            .delete_json(Host::Trading, "/v2/orders")
            .await?;
        Ok(cancelled.len() as u32)
    }

    async fn close_all_positions(&self) -> Result<Vec<OrderReceipt>, BrokerError> {
        let closed: Vec<CloseAllItem> = self
            .client
            .delete_json(Host::Trading, "/v2/positions?cancel_orders=true")
            .await?;
        Ok(closed
            .into_iter()
            .filter_map(|item| item.body.map(OrderReceipt::from))
            .collect())
    }

    async fn clock(&self) -> Result<MarketClock, BrokerError> {
        let clock: AlpacaClock = self
            .client
            .get_json(Host::Trading, "/v2/clock", &[])
            .await?;
        Ok(MarketClock {
            is_open: clock.is_open,
            next_open: clock.next_open,
            next_close: clock.next_close,
        })
    }
}
