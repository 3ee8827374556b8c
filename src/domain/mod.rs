//! Domain Layer - Core business logic for the gexbot trading loop
//!
//! This module contains pure domain types and logic with no external
//! dependencies. All external interactions happen through the ports layer.
//!
//! ## Safety Modules
//!
//! The following safety modules gate autonomous execution:
//! - `policy`: runtime risk limits plus the dangerous-mode switch
//! - `circuit_breaker`: halt after consecutive losing trades
//! - `cooldown`: per-symbol re-entry locks after a close
//! - `trade_log`: bounded journal of submissions, blocks, and closes

pub mod circuit_breaker;
pub mod cooldown;
pub mod policy;
pub mod trade_log;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerError, CircuitBreakerState, CircuitBreakerStatus, TradeOutcome,
    TripEvent,
};
pub use cooldown::CooldownMap;
pub use policy::{KeyChange, PolicyEngine, PolicyError, PolicyState, TradingPolicy, POLICY_KEYS};
pub use trade_log::{JournalEntry, JournalEvent, Mood, TradeJournal, MAX_JOURNAL_ENTRIES};
