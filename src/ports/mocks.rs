//! In-memory port implementations with scripted responses and call
//! recording, used by unit and integration tests. Builders configure
//! responses up front; accessors expose what the code under test did.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::broker::{BrokerError, BrokerPort};
use super::market_data::{MarketDataError, MarketDataPort};
use super::models::{
    AccountSnapshot, AssetClass, MarketClock, OrderReceipt, OrderSide, OrderSpec, OrderStatus,
    Position, PositionSide, PriceBar,
};
use super::options_data::{ChainSnapshot, OptionsDataError, OptionsDataPort};
use super::oracle::{DecisionOraclePort, OracleError};
use super::sentiment::{SentimentError, SentimentPort, SentimentSnapshot};
use super::state::{PersistedState, StateError, StatePort};
use super::technicals::{TechnicalSnapshot, TechnicalsError, TechnicalsPort, TrendDirection};

/// Build a long equity position from plain floats.
pub fn equity_position(symbol: &str, qty: f64, entry: f64, current: f64) -> Position {
    Position {
        symbol: symbol.to_string(),
        qty: Decimal::from_f64(qty).unwrap_or_default(),
        avg_entry_price: Decimal::from_f64(entry).unwrap_or_default(),
        current_price: Decimal::from_f64(current).unwrap_or_default(),
        unrealized_pnl_pct: if entry > 0.0 { (current - entry) / entry } else { 0.0 },
        side: PositionSide::Long,
        asset_class: AssetClass::UsEquity,
    }
}

/// Build a long option position (OCC symbol) from plain floats.
pub fn option_position(symbol: &str, contracts: f64, entry: f64, current: f64) -> Position {
    Position {
        asset_class: AssetClass::UsOption,
        ..equity_position(symbol, contracts, entry, current)
    }
}

/// A neutral technicals bundle for tests that only need one to exist.
pub fn neutral_technicals(symbol: &str, price: f64) -> TechnicalSnapshot {
    TechnicalSnapshot {
        symbol: symbol.to_string(),
        price,
        rsi_14: Some(50.0),
        sma_50: Some(price),
        sma_200: Some(price),
        macd: None,
        trend: TrendDirection::Sideways,
    }
}

/// Mock options data port with per-(ticker, expiry) scripted chains.
#[derive(Default)]
pub struct MockOptionsData {
    expirations: HashMap<String, Vec<NaiveDate>>,
    chains: HashMap<(String, NaiveDate), Result<ChainSnapshot, String>>,
    spots: HashMap<String, f64>,
    chain_calls: Mutex<Vec<(String, NaiveDate)>>,
}

impl MockOptionsData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_expirations(mut self, ticker: &str, dates: Vec<NaiveDate>) -> Self {
        self.expirations.insert(ticker.to_string(), dates);
        self
    }

    pub fn with_chain(mut self, ticker: &str, expiration: NaiveDate, chain: ChainSnapshot) -> Self {
        self.chains
            .insert((ticker.to_string(), expiration), Ok(chain));
        self
    }

    pub fn with_chain_failure(mut self, ticker: &str, expiration: NaiveDate, error: &str) -> Self {
        self.chains
            .insert((ticker.to_string(), expiration), Err(error.to_string()));
        self
    }

    pub fn with_spot(mut self, ticker: &str, price: f64) -> Self {
        self.spots.insert(ticker.to_string(), price);
        self
    }

    pub fn chain_calls(&self) -> Vec<(String, NaiveDate)> {
        self.chain_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl OptionsDataPort for MockOptionsData {
    async fn expirations(&self, ticker: &str) -> Result<Vec<NaiveDate>, OptionsDataError> {
        self.expirations
            .get(ticker)
            .cloned()
            .ok_or_else(|| OptionsDataError::NoData(format!("no expirations for {ticker}")))
    }

    async fn chain(
        &self,
        ticker: &str,
        expiration: NaiveDate,
    ) -> Result<ChainSnapshot, OptionsDataError> {
        self.chain_calls
            .lock()
            .unwrap()
            .push((ticker.to_string(), expiration));
        match self.chains.get(&(ticker.to_string(), expiration)) {
            Some(Ok(chain)) => Ok(chain.clone()),
            Some(Err(msg)) => Err(OptionsDataError::Request(msg.clone())),
            None => Err(OptionsDataError::NoData(format!(
                "no chain for {ticker} {expiration}"
            ))),
        }
    }

    async fn spot_price(&self, ticker: &str) -> Result<f64, OptionsDataError> {
        self.spots
            .get(ticker)
            .copied()
            .ok_or_else(|| OptionsDataError::NoData(format!("no spot for {ticker}")))
    }
}

/// Mock market data port with fixed prices and bar history.
#[derive(Default)]
pub struct MockMarketData {
    prices: HashMap<String, f64>,
    bars: HashMap<String, Vec<PriceBar>>,
}

impl MockMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(mut self, symbol: &str, price: f64) -> Self {
        self.prices.insert(symbol.to_string(), price);
        self
    }

    pub fn with_bars(mut self, symbol: &str, bars: Vec<PriceBar>) -> Self {
        self.bars.insert(symbol.to_string(), bars);
        self
    }
}

#[async_trait]
impl MarketDataPort for MockMarketData {
    async fn latest_price(&self, symbol: &str) -> Result<f64, MarketDataError> {
        self.prices
            .get(symbol)
            .copied()
            .ok_or_else(|| MarketDataError::NoData(symbol.to_string()))
    }

    async fn daily_bars(
        &self,
        symbol: &str,
        limit: usize,
    ) -> Result<Vec<PriceBar>, MarketDataError> {
        let bars = self
            .bars
            .get(symbol)
            .ok_or_else(|| MarketDataError::NoData(symbol.to_string()))?;
        let skip = bars.len().saturating_sub(limit);
        Ok(bars[skip..].to_vec())
    }
}

/// Mock technicals port with per-symbol scripted snapshots.
#[derive(Default)]
pub struct MockTechnicals {
    snapshots: HashMap<String, TechnicalSnapshot>,
    failures: HashMap<String, String>,
}

impl MockTechnicals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(mut self, snapshot: TechnicalSnapshot) -> Self {
        self.snapshots.insert(snapshot.symbol.clone(), snapshot);
        self
    }

    pub fn with_failure(mut self, symbol: &str, error: &str) -> Self {
        self.failures.insert(symbol.to_string(), error.to_string());
        self
    }
}

#[async_trait]
impl TechnicalsPort for MockTechnicals {
    async fn snapshot(&self, symbol: &str) -> Result<TechnicalSnapshot, TechnicalsError> {
        if let Some(msg) = self.failures.get(symbol) {
            return Err(TechnicalsError::Data(MarketDataError::Request(msg.clone())));
        }
        self.snapshots.get(symbol).cloned().ok_or_else(|| {
            TechnicalsError::InsufficientHistory {
                symbol: symbol.to_string(),
                got: 0,
            }
        })
    }
}

/// Mock sentiment port. Symbols without scripted snapshots read as having
/// no coverage, which is what most loop tests want.
#[derive(Default)]
pub struct MockSentiment {
    snapshots: HashMap<String, SentimentSnapshot>,
}

impl MockSentiment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(mut self, snapshot: SentimentSnapshot) -> Self {
        self.snapshots.insert(snapshot.symbol.clone(), snapshot);
        self
    }
}

#[async_trait]
impl SentimentPort for MockSentiment {
    async fn snapshot(&self, symbol: &str) -> Result<SentimentSnapshot, SentimentError> {
        Ok(self
            .snapshots
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| SentimentSnapshot::empty(symbol)))
    }
}

/// Mock oracle that replays queued completions and records every prompt.
#[derive(Default)]
pub struct MockOracle {
    queue: Mutex<VecDeque<Result<String, String>>>,
    default_response: Option<String>,
    prompts: Mutex<Vec<(String, String)>>,
}

impl MockOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one completion, consumed in order.
    pub fn with_response(self, text: &str) -> Self {
        self.queue
            .lock()
            .unwrap()
            .push_back(Ok(text.to_string()));
        self
    }

    pub fn with_error(self, error: &str) -> Self {
        self.queue
            .lock()
            .unwrap()
            .push_back(Err(error.to_string()));
        self
    }

    /// Completion returned once the queue runs dry.
    pub fn with_default_response(mut self, text: &str) -> Self {
        self.default_response = Some(text.to_string());
        self
    }

    pub fn prompts(&self) -> Vec<(String, String)> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl DecisionOraclePort for MockOracle {
    async fn complete(&self, system: &str, user: &str) -> Result<String, OracleError> {
        self.prompts
            .lock()
            .unwrap()
            .push((system.to_string(), user.to_string()));
        match self.queue.lock().unwrap().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(msg)) => Err(OracleError::Request(msg)),
            None => self
                .default_response
                .clone()
                .ok_or_else(|| OracleError::Request("no response configured".to_string())),
        }
    }
}

/// Mock broker with a mutable book of positions and full call recording.
pub struct MockBroker {
    account: Mutex<AccountSnapshot>,
    positions: Mutex<Vec<Position>>,
    clock: Mutex<MarketClock>,
    submitted: Mutex<Vec<OrderSpec>>,
    closed: Mutex<Vec<String>>,
    open_orders: Mutex<u32>,
    submit_failure: Option<String>,
    next_order_id: Mutex<u64>,
}

impl Default for MockBroker {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            account: Mutex::new(AccountSnapshot {
                equity: dec!(100_000),
                cash: dec!(100_000),
                buying_power: dec!(200_000),
                last_equity: dec!(100_000),
            }),
            positions: Mutex::new(Vec::new()),
            clock: Mutex::new(MarketClock {
                is_open: true,
                next_open: now + Duration::hours(18),
                next_close: now + Duration::hours(6),
            }),
            submitted: Mutex::new(Vec::new()),
            closed: Mutex::new(Vec::new()),
            open_orders: Mutex::new(0),
            submit_failure: None,
            next_order_id: Mutex::new(1),
        }
    }
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(self, equity: Decimal, cash: Decimal) -> Self {
        {
            let mut account = self.account.lock().unwrap();
            account.equity = equity;
            account.cash = cash;
            account.buying_power = cash;
            account.last_equity = equity;
        }
        self
    }

    /// Prior-close equity, for daily drawdown scenarios.
    pub fn with_last_equity(self, last_equity: Decimal) -> Self {
        self.account.lock().unwrap().last_equity = last_equity;
        self
    }

    pub fn with_position(self, position: Position) -> Self {
        self.positions.lock().unwrap().push(position);
        self
    }

    pub fn with_market_open(self, is_open: bool) -> Self {
        self.clock.lock().unwrap().is_open = is_open;
        self
    }

    pub fn with_close_in_minutes(self, minutes: i64) -> Self {
        {
            let mut clock = self.clock.lock().unwrap();
            clock.is_open = true;
            clock.next_close = Utc::now() + Duration::minutes(minutes);
        }
        self
    }

    pub fn with_open_orders(self, count: u32) -> Self {
        *self.open_orders.lock().unwrap() = count;
        self
    }

    pub fn with_submit_failure(mut self, error: &str) -> Self {
        self.submit_failure = Some(error.to_string());
        self
    }

    pub fn submitted(&self) -> Vec<OrderSpec> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn closed_symbols(&self) -> Vec<String> {
        self.closed.lock().unwrap().clone()
    }

    fn receipt(&self, symbol: &str, qty: Decimal, side: OrderSide) -> OrderReceipt {
        let mut id = self.next_order_id.lock().unwrap();
        *id += 1;
        OrderReceipt {
            order_id: format!("mock-{}", *id - 1),
            symbol: symbol.to_string(),
            qty,
            side,
            status: OrderStatus::Filled,
            filled_avg_price: None,
            submitted_at: Utc::now(),
        }
    }
}

#[async_trait]
impl BrokerPort for MockBroker {
    async fn account(&self) -> Result<AccountSnapshot, BrokerError> {
        Ok(self.account.lock().unwrap().clone())
    }

    async fn positions(&self) -> Result<Vec<Position>, BrokerError> {
        Ok(self.positions.lock().unwrap().clone())
    }

    async fn position(&self, symbol: &str) -> Result<Option<Position>, BrokerError> {
        Ok(self
            .positions
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.symbol == symbol)
            .cloned())
    }

    async fn submit_order(&self, spec: &OrderSpec) -> Result<OrderReceipt, BrokerError> {
        self.submitted.lock().unwrap().push(spec.clone());
        if let Some(msg) = &self.submit_failure {
            return Err(BrokerError::Rejected(msg.clone()));
        }
        Ok(self.receipt(&spec.symbol, spec.qty, spec.side))
    }

    async fn close_position(&self, symbol: &str) -> Result<OrderReceipt, BrokerError> {
        let mut positions = self.positions.lock().unwrap();
        let idx = positions
            .iter()
            .position(|p| p.symbol == symbol)
            .ok_or_else(|| BrokerError::UnknownPosition(symbol.to_string()))?;
        let position = positions.remove(idx);
        self.closed.lock().unwrap().push(symbol.to_string());
        Ok(self.receipt(symbol, position.qty, OrderSide::Sell))
    }

    async fn cancel_all_orders(&self) -> Result<u32, BrokerError> {
        let mut open = self.open_orders.lock().unwrap();
        let cancelled = *open;
        *open = 0;
        Ok(cancelled)
    }

    async fn close_all_positions(&self) -> Result<Vec<OrderReceipt>, BrokerError> {
        let drained: Vec<Position> = self.positions.lock().unwrap().drain(..).collect();
        let mut receipts = Vec::with_capacity(drained.len());
        for position in drained {
            self.closed.lock().unwrap().push(position.symbol.clone());
            receipts.push(self.receipt(&position.symbol, position.qty, OrderSide::Sell));
        }
        Ok(receipts)
    }

    async fn clock(&self) -> Result<MarketClock, BrokerError> {
        Ok(self.clock.lock().unwrap().clone())
    }
}

/// Mock state store that keeps everything in memory.
#[derive(Default)]
pub struct MockState {
    initial: Mutex<Option<PersistedState>>,
    saved: Mutex<Vec<PersistedState>>,
    snapshots: Mutex<Vec<(String, PersistedState)>>,
}

impl MockState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial(self, state: PersistedState) -> Self {
        *self.initial.lock().unwrap() = Some(state);
        self
    }

    pub fn save_count(&self) -> usize {
        self.saved.lock().unwrap().len()
    }

    pub fn last_saved(&self) -> Option<PersistedState> {
        self.saved.lock().unwrap().last().cloned()
    }

    pub fn snapshot_labels(&self) -> Vec<String> {
        self.snapshots
            .lock()
            .unwrap()
            .iter()
            .map(|(label, _)| label.clone())
            .collect()
    }
}

#[async_trait]
impl StatePort for MockState {
    async fn load(&self) -> Result<Option<PersistedState>, StateError> {
        Ok(self.initial.lock().unwrap().clone())
    }

    async fn save(&self, state: &PersistedState) -> Result<(), StateError> {
        self.saved.lock().unwrap().push(state.clone());
        Ok(())
    }

    async fn write_snapshot(
        &self,
        label: &str,
        state: &PersistedState,
    ) -> Result<String, StateError> {
        self.snapshots
            .lock()
            .unwrap()
            .push((label.to_string(), state.clone()));
        Ok(format!("memory://{label}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn options_mock_scripts_success_and_failure() {
        let date: NaiveDate = "2025-06-20".parse().unwrap();
        let mock = MockOptionsData::new()
            .with_chain(
                "SPY",
                date,
                ChainSnapshot {
                    underlying_price: Some(600.0),
                    contracts: vec![],
                },
            )
            .with_chain_failure("QQQ", date, "boom");

        assert!(mock.chain("SPY", date).await.is_ok());
        assert!(matches!(
            mock.chain("QQQ", date).await,
            Err(OptionsDataError::Request(_))
        ));
        assert_eq!(mock.chain_calls().len(), 2);
    }

    #[tokio::test]
    async fn broker_mock_records_orders_and_closes() {
        let broker = MockBroker::new().with_position(equity_position("AAPL", 10.0, 100.0, 110.0));

        let spec = OrderSpec::market("MSFT", dec!(5), OrderSide::Buy, AssetClass::UsEquity);
        broker.submit_order(&spec).await.unwrap();
        assert_eq!(broker.submitted().len(), 1);

        broker.close_position("AAPL").await.unwrap();
        assert!(broker.positions().await.unwrap().is_empty());
        assert_eq!(broker.closed_symbols(), vec!["AAPL"]);

        assert!(matches!(
            broker.close_position("AAPL").await,
            Err(BrokerError::UnknownPosition(_))
        ));
    }

    #[tokio::test]
    async fn oracle_mock_replays_in_order_then_falls_back() {
        let oracle = MockOracle::new()
            .with_response("first")
            .with_default_response("later");

        assert_eq!(oracle.complete("sys", "one").await.unwrap(), "first");
        assert_eq!(oracle.complete("sys", "two").await.unwrap(), "later");
        assert_eq!(oracle.prompts().len(), 2);
    }
}
