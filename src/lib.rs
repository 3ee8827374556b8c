#![allow(dead_code, unused_imports, unused_variables)]
//! gexbot - GEX-Driven Autonomous Trading Agent Library
//!
//! Reads dealer gamma positioning from the options chain, asks an LLM
//! oracle for verdicts, and routes whatever survives the safety funnel
//! to the brokerage.
//!
//! # Modules
//!
//! - `domain`: Safety core (TradingPolicy, CircuitBreaker, CooldownMap, TradeJournal)
//! - `ports`: Trait abstractions (BrokerPort, MarketDataPort, OptionsDataPort, DecisionOraclePort)
//! - `gex`: Gamma exposure engine (per-strike aggregation, gamma flip, regime, walls)
//! - `squeeze`: Squeeze scoring and per-symbol state tracking
//! - `adapters`: External implementations (Alpaca, Polygon, OpenAI, paper broker, CLI)
//! - `config`: Configuration loading and validation
//! - `application`: Trading loops, gates, and operator actions

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod gex;
pub mod ports;
pub mod squeeze;
