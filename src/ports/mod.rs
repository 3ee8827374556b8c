//! Ports Layer - Trait definitions for external dependencies
//!
//! This module defines the interfaces (ports) that adapters must implement.
//! Following hexagonal architecture, these traits abstract:
//! - Options chain data (expirations, chains, spot)
//! - Equity market data (quotes, daily bars)
//! - Derived technicals and news sentiment
//! - The decision oracle (chat completion)
//! - Brokerage execution (account, positions, orders)
//! - Durable state (policy, breaker, cooldowns, journal)

pub mod broker;
pub mod market_data;
pub mod mocks;
pub mod models;
pub mod options_data;
pub mod oracle;
pub mod sentiment;
pub mod state;
pub mod technicals;

pub use broker::{BrokerError, BrokerPort};
pub use market_data::{MarketDataError, MarketDataPort};
pub use models::{
    AccountSnapshot, AssetClass, MarketClock, OrderReceipt, OrderSide, OrderSpec, OrderStatus,
    OrderType, Position, PositionSide, PriceBar, TimeInForce,
};
pub use options_data::{ChainSnapshot, OptionsDataError, OptionsDataPort};
pub use oracle::{
    DecisionOraclePort, OptionsAction, OptionsDecision, OracleAction, OracleDecision, OracleError,
};
pub use sentiment::{SentimentError, SentimentPort, SentimentSnapshot};
pub use state::{PersistedState, StateError, StatePort};
pub use technicals::{
    MacdValue, TechnicalSnapshot, TechnicalsError, TechnicalsPort, TrendDirection,
};
