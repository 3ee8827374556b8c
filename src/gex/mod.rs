//! Dealer gamma exposure (GEX) analytics.
//!
//! - `types`: contracts, per-strike aggregates, regime, walls, engine config
//! - `greeks`: Black-Scholes gamma fallback for snapshots without greeks
//! - `engine`: aggregation, gamma flip, regime classification, walls, and
//!   the concurrent multi-expiry orchestrator

pub mod engine;
pub mod greeks;
pub mod types;

pub use engine::{
    classify_regime, compute_strike_gex, find_gamma_flip, find_walls, stacked_strikes, GexEngine,
    GexError, StackedSides,
};
pub use types::{
    DealerConvention, GexAnalysis, GexConfig, OptionContract, OptionKind, RegimeClassification,
    RegimeLabel, StrikeAggregate, Wall, Walls,
};
