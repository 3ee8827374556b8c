//! Durable state port
//!
//! Everything the bot must remember across restarts goes through here:
//! policy (including dangerous mode and its restore snapshot), circuit
//! breaker, cooldowns, and the trade journal.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::circuit_breaker::CircuitBreakerState;
use crate::domain::policy::PolicyState;
use crate::domain::trade_log::TradeJournal;

/// State store error type
#[derive(Error, Debug)]
pub enum StateError {
    #[error("state io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// The full durable state blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedState {
    pub policy: PolicyState,
    pub breaker: CircuitBreakerState,
    pub cooldowns: HashMap<String, DateTime<Utc>>,
    pub journal: TradeJournal,
    pub updated_at: DateTime<Utc>,
}

impl PersistedState {
    pub fn fresh() -> Self {
        Self {
            policy: crate::domain::policy::PolicyEngine::default().state(),
            breaker: crate::domain::circuit_breaker::CircuitBreaker::default().state(),
            cooldowns: HashMap::new(),
            journal: TradeJournal::new(),
            updated_at: Utc::now(),
        }
    }
}

/// State store port trait
#[async_trait]
pub trait StatePort: Send + Sync {
    /// Load the last saved state, `None` on first run.
    async fn load(&self) -> Result<Option<PersistedState>, StateError>;

    /// Persist the current state, replacing the previous save.
    async fn save(&self, state: &PersistedState) -> Result<(), StateError>;

    /// Write a labeled, timestamped copy that `save` will never overwrite.
    /// Used for breaker-trip and kill-switch postmortems. Returns the
    /// location written.
    async fn write_snapshot(
        &self,
        label: &str,
        state: &PersistedState,
    ) -> Result<String, StateError>;
}
