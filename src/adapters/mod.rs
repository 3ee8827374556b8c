//! Adapters Layer - External System Implementations
//!
//! This module contains implementations of the port traits:
//! - Alpaca: brokerage (accounts, orders, positions, clock), stock data, and news
//! - Polygon: options chain snapshots, expirations, and OCC symbol handling
//! - OpenAI: chat-completion decision oracle
//! - Technicals: indicator engine computed from daily bars
//! - Paper: offline fill simulator behind the broker port
//! - State file: JSON crash-recovery store
//! - CLI: command-line argument parsing

pub mod alpaca;
pub mod cli;
pub mod openai;
pub mod paper;
pub mod polygon;
pub mod state_file;
pub mod technicals;

pub use alpaca::{AlpacaBroker, AlpacaClient, AlpacaConfig, AlpacaMarketData, AlpacaNews};
pub use cli::CliApp;
pub use openai::{OpenAiConfig, OpenAiOracle};
pub use paper::PaperBroker;
pub use polygon::{PolygonClient, PolygonConfig, PolygonOptionsData};
pub use state_file::FileStateStore;
pub use technicals::TechnicalsEngine;
