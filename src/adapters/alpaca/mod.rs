//! Alpaca adapters: trading, market data, and news sentiment over one
//! shared HTTP client.

pub mod client;
pub mod market_data;
pub mod news;
pub mod trading;

pub use client::{AlpacaApiError, AlpacaClient, AlpacaConfig};
pub use market_data::AlpacaMarketData;
pub use news::AlpacaNews;
pub use trading::AlpacaBroker;
