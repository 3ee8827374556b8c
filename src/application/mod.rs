//! Application layer
//!
//! Wires the domain safety core to the ports and runs the two control
//! loops. `CoreServices` is the shared context: every loop and operator
//! command works through the same safety state, the same trade lock, and
//! the same persistence path, so a `config set` from the CLI is visible
//! to the next scan cycle and a breaker trip survives a restart.

pub mod actions;
pub mod equity_loop;
pub mod evaluation;
pub mod gates;
pub mod options_loop;

pub use actions::{ActionError, KillReport, ManualTradeOutcome, StatusReport};
pub use equity_loop::EquityLoop;
pub use evaluation::CandidateEvaluation;
pub use gates::BlockReason;
pub use options_loop::ZeroDteLoop;

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::domain::{CircuitBreaker, CooldownMap, PolicyEngine, TradeJournal, TradingPolicy};
use crate::gex::{GexConfig, GexEngine};
use crate::ports::broker::BrokerPort;
use crate::ports::market_data::MarketDataPort;
use crate::ports::options_data::OptionsDataPort;
use crate::ports::oracle::DecisionOraclePort;
use crate::ports::sentiment::SentimentPort;
use crate::ports::state::{PersistedState, StateError, StatePort};
use crate::ports::technicals::TechnicalsPort;
use crate::squeeze::SqueezeRegistry;

/// The mutable safety core: policy, breaker, cooldowns, journal. Guarded by
/// one lock so a gate check never sees policy and breaker from different
/// moments.
pub struct SafetyState {
    pub policy: PolicyEngine,
    pub breaker: CircuitBreaker,
    pub cooldowns: CooldownMap,
    pub journal: TradeJournal,
}

impl SafetyState {
    pub fn fresh() -> Self {
        Self {
            policy: PolicyEngine::default(),
            breaker: CircuitBreaker::default(),
            cooldowns: CooldownMap::new(),
            journal: TradeJournal::new(),
        }
    }

    /// Rebuild from a saved blob. A breaker that went down tripped comes
    /// back tripped; running cooldowns keep running.
    pub fn from_persisted(state: PersistedState) -> Self {
        Self {
            policy: PolicyEngine::from_state(state.policy),
            breaker: CircuitBreaker::from_state(state.breaker),
            cooldowns: CooldownMap::from_state(state.cooldowns),
            journal: state.journal,
        }
    }

    pub fn to_persisted(&self) -> PersistedState {
        PersistedState {
            policy: self.policy.state(),
            breaker: self.breaker.state(),
            cooldowns: self.cooldowns.state(),
            journal: self.journal.clone(),
            updated_at: Utc::now(),
        }
    }
}

/// Shared context for loops and operator commands.
pub struct CoreServices {
    pub broker: Arc<dyn BrokerPort>,
    pub market_data: Arc<dyn MarketDataPort>,
    pub technicals: Arc<dyn TechnicalsPort>,
    pub sentiment: Arc<dyn SentimentPort>,
    pub oracle: Arc<dyn DecisionOraclePort>,
    pub options_data: Arc<dyn OptionsDataPort>,
    pub state: Arc<dyn StatePort>,
    pub gex: GexEngine,
    pub safety: RwLock<SafetyState>,
    pub squeezes: RwLock<SqueezeRegistry>,

    /// Serializes mutating passes. Loops take it with `try_lock` so an
    /// overlapping tick is skipped, not queued; operator actions block on it.
    pub trade_lock: Mutex<()>,
}

impl CoreServices {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        broker: Arc<dyn BrokerPort>,
        market_data: Arc<dyn MarketDataPort>,
        technicals: Arc<dyn TechnicalsPort>,
        sentiment: Arc<dyn SentimentPort>,
        oracle: Arc<dyn DecisionOraclePort>,
        options_data: Arc<dyn OptionsDataPort>,
        state: Arc<dyn StatePort>,
        safety: SafetyState,
    ) -> Self {
        let gex = GexEngine::new(Arc::clone(&options_data), GexConfig::default());
        Self {
            broker,
            market_data,
            technicals,
            sentiment,
            oracle,
            options_data,
            state,
            gex,
            safety: RwLock::new(safety),
            squeezes: RwLock::new(SqueezeRegistry::new()),
            trade_lock: Mutex::new(()),
        }
    }

    /// Load saved state from the store, falling back to defaults on first
    /// run.
    pub async fn restore_safety(state: &dyn StatePort) -> Result<SafetyState, StateError> {
        match state.load().await? {
            Some(persisted) => {
                info!("restored saved trading state");
                Ok(SafetyState::from_persisted(persisted))
            }
            None => {
                info!("no saved state, starting fresh");
                Ok(SafetyState::fresh())
            }
        }
    }

    /// Write the current safety core through the state store.
    pub async fn persist(&self) -> Result<(), StateError> {
        let blob = self.safety.read().await.to_persisted();
        self.state.save(&blob).await
    }

    /// Labeled postmortem copy alongside the main state file.
    pub async fn snapshot(&self, label: &str) -> Result<String, StateError> {
        let blob = self.safety.read().await.to_persisted();
        self.state.write_snapshot(label, &blob).await
    }

    /// Clone of the live policy, for code that should not hold the safety
    /// lock across awaits.
    pub async fn policy(&self) -> TradingPolicy {
        self.safety.read().await.policy.policy().clone()
    }
}
