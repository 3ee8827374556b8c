//! Offline paper broker
//!
//! Fill simulator behind `BrokerPort` for running the pipeline without a
//! brokerage account. Market orders fill instantly at the latest quote
//! plus simulated slippage; cash, average cost, and realized PnL are
//! tracked in an in-memory book. The simulated market never closes.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::ports::broker::{BrokerError, BrokerPort};
use crate::ports::market_data::MarketDataPort;
use crate::ports::models::{
    AccountSnapshot, AssetClass, MarketClock, OrderReceipt, OrderSide, OrderSpec, OrderStatus,
    OrderType, Position, PositionSide,
};

/// Simulated slippage applied to every fill, in basis points.
const DEFAULT_SLIPPAGE_BPS: u16 = 10;

#[derive(Debug, Clone)]
struct Holding {
    qty: f64,
    avg_entry: f64,
    asset_class: AssetClass,
}

#[derive(Debug)]
struct Book {
    cash: f64,
    initial_cash: f64,
    holdings: HashMap<String, Holding>,
    realized_pnl: f64,
    next_order_id: u64,
}

/// In-memory broker simulation priced off a market data port.
pub struct PaperBroker {
    market_data: Arc<dyn MarketDataPort>,
    slippage_bps: u16,
    book: Mutex<Book>,
}

impl PaperBroker {
    pub fn new(market_data: Arc<dyn MarketDataPort>, initial_cash: f64) -> Self {
        info!(initial_cash, "paper broker initialized");
        Self {
            market_data,
            slippage_bps: DEFAULT_SLIPPAGE_BPS,
            book: Mutex::new(Book {
                cash: initial_cash,
                initial_cash,
                holdings: HashMap::new(),
                realized_pnl: 0.0,
                next_order_id: 1,
            }),
        }
    }

    pub fn with_slippage_bps(mut self, slippage_bps: u16) -> Self {
        self.slippage_bps = slippage_bps;
        self
    }

    /// Realized PnL across all closed lots.
    pub async fn realized_pnl(&self) -> f64 {
        self.book.lock().await.realized_pnl
    }

    pub async fn cash(&self) -> f64 {
        self.book.lock().await.cash
    }

    /// Fill price with slippage against the taker.
    fn fill_price(&self, quote: f64, side: OrderSide) -> f64 {
        let slip = self.slippage_bps as f64 / 10_000.0;
        match side {
            OrderSide::Buy => quote * (1.0 + slip),
            OrderSide::Sell => quote * (1.0 - slip),
        }
    }

    async fn quote(&self, symbol: &str) -> Result<f64, BrokerError> {
        let price = self
            .market_data
            .latest_price(symbol)
            .await
            .map_err(|e| BrokerError::Request(format!("paper fill price for {symbol}: {e}")))?;
        if price <= 0.0 {
            return Err(BrokerError::Request(format!(
                "paper fill price for {symbol}: non-positive quote {price}"
            )));
        }
        Ok(price)
    }

    fn receipt(book: &mut Book, spec: &OrderSpec, price: f64) -> OrderReceipt {
        let id = book.next_order_id;
        book.next_order_id += 1;
        OrderReceipt {
            order_id: format!("paper-{id}"),
            symbol: spec.symbol.clone(),
            qty: spec.qty,
            side: spec.side,
            status: OrderStatus::Filled,
            filled_avg_price: Decimal::from_f64(price),
            submitted_at: Utc::now(),
        }
    }

    fn position_from_holding(symbol: &str, holding: &Holding, mark: f64) -> Position {
        let unrealized_pnl_pct = if holding.avg_entry > 0.0 {
            (mark - holding.avg_entry) / holding.avg_entry
        } else {
            0.0
        };
        Position {
            symbol: symbol.to_string(),
            qty: Decimal::from_f64(holding.qty).unwrap_or_default(),
            avg_entry_price: Decimal::from_f64(holding.avg_entry).unwrap_or_default(),
            current_price: Decimal::from_f64(mark).unwrap_or_default(),
            unrealized_pnl_pct,
            side: PositionSide::Long,
            asset_class: holding.asset_class,
        }
    }

    /// Mark price for a holding; falls back to cost when no quote exists.
    async fn mark(&self, symbol: &str, holding: &Holding) -> f64 {
        match self.market_data.latest_price(symbol).await {
            Ok(p) if p > 0.0 => p,
            _ => holding.avg_entry,
        }
    }
}

#[async_trait]
impl BrokerPort for PaperBroker {
    async fn account(&self) -> Result<AccountSnapshot, BrokerError> {
        let (cash, initial_cash, holdings) = {
            let book = self.book.lock().await;
            (book.cash, book.initial_cash, book.holdings.clone())
        };

        let mut equity = cash;
        for (symbol, holding) in &holdings {
            equity += holding.qty * self.mark(symbol, holding).await;
        }

        Ok(AccountSnapshot {
            equity: Decimal::from_f64(equity).unwrap_or_default(),
            cash: Decimal::from_f64(cash).unwrap_or_default(),
            buying_power: Decimal::from_f64(cash).unwrap_or_default(),
            last_equity: Decimal::from_f64(initial_cash).unwrap_or_default(),
        })
    }

    async fn positions(&self) -> Result<Vec<Position>, BrokerError> {
        let holdings = self.book.lock().await.holdings.clone();
        let mut out = Vec::with_capacity(holdings.len());
        for (symbol, holding) in &holdings {
            let mark = self.mark(symbol, holding).await;
            out.push(Self::position_from_holding(symbol, holding, mark));
        }
        out.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(out)
    }

    async fn position(&self, symbol: &str) -> Result<Option<Position>, BrokerError> {
        let key = symbol.to_uppercase();
        let holding = self.book.lock().await.holdings.get(&key).cloned();
        match holding {
            Some(h) => {
                let mark = self.mark(&key, &h).await;
                Ok(Some(Self::position_from_holding(&key, &h, mark)))
            }
            None => Ok(None),
        }
    }

    async fn submit_order(&self, spec: &OrderSpec) -> Result<OrderReceipt, BrokerError> {
        if spec.order_type != OrderType::Market {
            return Err(BrokerError::Rejected(
                "paper broker fills market orders only".to_string(),
            ));
        }
        let qty = spec.qty.to_f64().unwrap_or(0.0);
        if qty <= 0.0 {
            return Err(BrokerError::Rejected(format!(
                "order quantity must be positive, got {}",
                spec.qty
            )));
        }

        let symbol = spec.symbol.to_uppercase();
        let quote = self.quote(&symbol).await?;
        let price = self.fill_price(quote, spec.side);
        // Option premiums are quoted per share on a 100-share contract.
        let multiplier = match spec.asset_class {
            AssetClass::UsOption => 100.0,
            _ => 1.0,
        };

        let mut guard = self.book.lock().await;
        let book = &mut *guard;
        match spec.side {
            OrderSide::Buy => {
                let cost = qty * price * multiplier;
                if cost > book.cash {
                    return Err(BrokerError::InsufficientFunds {
                        needed: cost,
                        available: book.cash,
                    });
                }
                book.cash -= cost;
                let holding = book.holdings.entry(symbol.clone()).or_insert(Holding {
                    qty: 0.0,
                    avg_entry: 0.0,
                    asset_class: spec.asset_class,
                });
                let prev_cost = holding.qty * holding.avg_entry;
                holding.qty += qty;
                holding.avg_entry = (prev_cost + qty * price) / holding.qty;
                info!(symbol = %symbol, qty, price, cost, "paper buy filled");
            }
            OrderSide::Sell => {
                let holding = book
                    .holdings
                    .get_mut(&symbol)
                    .ok_or_else(|| BrokerError::UnknownPosition(symbol.clone()))?;
                if qty > holding.qty + 1e-9 {
                    return Err(BrokerError::Rejected(format!(
                        "cannot sell {qty} {symbol}, holding {}",
                        holding.qty
                    )));
                }
                let pnl = qty * (price - holding.avg_entry) * multiplier;
                holding.qty -= qty;
                let drained = holding.qty < 1e-9;
                book.cash += qty * price * multiplier;
                book.realized_pnl += pnl;
                if drained {
                    book.holdings.remove(&symbol);
                }
                info!(symbol = %symbol, qty, price, pnl, "paper sell filled");
            }
        }

        Ok(Self::receipt(book, spec, price))
    }

    async fn close_position(&self, symbol: &str) -> Result<OrderReceipt, BrokerError> {
        let key = symbol.to_uppercase();
        let holding = self
            .book
            .lock()
            .await
            .holdings
            .get(&key)
            .cloned()
            .ok_or_else(|| BrokerError::UnknownPosition(key.clone()))?;

        let spec = OrderSpec::market(
            &key,
            Decimal::from_f64(holding.qty).unwrap_or_default(),
            OrderSide::Sell,
            holding.asset_class,
        );
        self.submit_order(&spec).await
    }

    async fn cancel_all_orders(&self) -> Result<u32, BrokerError> {
        // Fills are instantaneous, nothing ever rests.
        Ok(0)
    }

    async fn close_all_positions(&self) -> Result<Vec<OrderReceipt>, BrokerError> {
        let symbols: Vec<String> = self.book.lock().await.holdings.keys().cloned().collect();
        let mut receipts = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            match self.close_position(&symbol).await {
                Ok(receipt) => receipts.push(receipt),
                Err(e) => warn!(symbol = %symbol, error = %e, "paper close failed"),
            }
        }
        Ok(receipts)
    }

    async fn clock(&self) -> Result<MarketClock, BrokerError> {
        let now = Utc::now();
        Ok(MarketClock {
            is_open: true,
            next_open: now,
            next_close: now + Duration::hours(6),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::mocks::MockMarketData;
    use approx::assert_relative_eq;
    use rust_decimal_macros::dec;

    fn broker_with(prices: &[(&str, f64)], cash: f64) -> PaperBroker {
        let mut data = MockMarketData::new();
        for (symbol, price) in prices {
            data = data.with_price(symbol, *price);
        }
        // Zero slippage keeps the arithmetic exact in assertions.
        PaperBroker::new(Arc::new(data), cash).with_slippage_bps(0)
    }

    #[tokio::test]
    async fn buy_moves_cash_into_a_position() {
        let broker = broker_with(&[("AAPL", 200.0)], 10_000.0);
        let spec = OrderSpec::market("AAPL", dec!(10), OrderSide::Buy, AssetClass::UsEquity);
        let receipt = broker.submit_order(&spec).await.unwrap();

        assert_eq!(receipt.status, OrderStatus::Filled);
        assert_relative_eq!(broker.cash().await, 8_000.0, epsilon = 1e-9);

        let pos = broker.position("AAPL").await.unwrap().unwrap();
        assert_eq!(pos.qty, dec!(10));
        assert_eq!(pos.avg_entry_price, dec!(200));
    }

    #[tokio::test]
    async fn buy_beyond_cash_is_rejected() {
        let broker = broker_with(&[("NVDA", 1_000.0)], 500.0);
        let spec = OrderSpec::market("NVDA", dec!(1), OrderSide::Buy, AssetClass::UsEquity);
        let err = broker.submit_order(&spec).await.unwrap_err();
        assert!(matches!(err, BrokerError::InsufficientFunds { .. }));
        assert_relative_eq!(broker.cash().await, 500.0, epsilon = 1e-9);
    }

    #[tokio::test]
    async fn sell_realizes_pnl_and_frees_cash() {
        let broker = broker_with(&[("MSFT", 100.0)], 10_000.0);
        let buy = OrderSpec::market("MSFT", dec!(20), OrderSide::Buy, AssetClass::UsEquity);
        broker.submit_order(&buy).await.unwrap();

        // The mock quote never moves, so the close realizes flat PnL.
        let receipt = broker.close_position("MSFT").await.unwrap();
        assert_eq!(receipt.side, OrderSide::Sell);
        assert_relative_eq!(broker.cash().await, 10_000.0, epsilon = 1e-9);
        assert_relative_eq!(broker.realized_pnl().await, 0.0, epsilon = 1e-9);
        assert!(broker.position("MSFT").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn average_cost_blends_across_buys() {
        let broker = broker_with(&[("SPY", 500.0)], 100_000.0);
        let first = OrderSpec::market("SPY", dec!(10), OrderSide::Buy, AssetClass::UsEquity);
        broker.submit_order(&first).await.unwrap();
        broker.submit_order(&first).await.unwrap();

        let pos = broker.position("SPY").await.unwrap().unwrap();
        assert_eq!(pos.qty, dec!(20));
        assert_eq!(pos.avg_entry_price, dec!(500));
    }

    #[tokio::test]
    async fn option_fills_use_the_contract_multiplier() {
        let broker = broker_with(&[("SPY250825C00600000", 1.50)], 1_000.0);
        let spec = OrderSpec::market(
            "SPY250825C00600000",
            dec!(2),
            OrderSide::Buy,
            AssetClass::UsOption,
        );
        broker.submit_order(&spec).await.unwrap();
        // 2 contracts x $1.50 x 100 shares.
        assert_relative_eq!(broker.cash().await, 700.0, epsilon = 1e-9);
    }

    #[tokio::test]
    async fn close_all_drains_the_book() {
        let broker = broker_with(&[("AAPL", 200.0), ("MSFT", 100.0)], 50_000.0);
        for symbol in ["AAPL", "MSFT"] {
            let spec = OrderSpec::market(symbol, dec!(5), OrderSide::Buy, AssetClass::UsEquity);
            broker.submit_order(&spec).await.unwrap();
        }

        let receipts = broker.close_all_positions().await.unwrap();
        assert_eq!(receipts.len(), 2);
        assert!(broker.positions().await.unwrap().is_empty());
        assert_relative_eq!(broker.cash().await, 50_000.0, epsilon = 1e-9);
    }

    #[tokio::test]
    async fn equity_marks_holdings_to_market() {
        let broker = broker_with(&[("TSLA", 250.0)], 10_000.0);
        let spec = OrderSpec::market("TSLA", dec!(4), OrderSide::Buy, AssetClass::UsEquity);
        broker.submit_order(&spec).await.unwrap();

        let account = broker.account().await.unwrap();
        assert_eq!(account.equity, dec!(10000));
        assert_eq!(account.cash, dec!(9000));
        assert_eq!(account.last_equity, dec!(10000));
    }

    #[tokio::test]
    async fn sells_without_a_position_are_unknown() {
        let broker = broker_with(&[("AMZN", 180.0)], 10_000.0);
        let spec = OrderSpec::market("AMZN", dec!(1), OrderSide::Sell, AssetClass::UsEquity);
        assert!(matches!(
            broker.submit_order(&spec).await.unwrap_err(),
            BrokerError::UnknownPosition(_)
        ));
    }

    #[tokio::test]
    async fn slippage_moves_fills_against_the_taker() {
        let data = MockMarketData::new().with_price("QQQ", 400.0);
        let broker = PaperBroker::new(Arc::new(data), 100_000.0).with_slippage_bps(50);
        let spec = OrderSpec::market("QQQ", dec!(10), OrderSide::Buy, AssetClass::UsEquity);
        let receipt = broker.submit_order(&spec).await.unwrap();
        let fill = receipt.filled_avg_price.unwrap().to_f64().unwrap();
        assert_relative_eq!(fill, 402.0, epsilon = 1e-9);
    }
}
