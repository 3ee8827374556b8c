//! Circuit Breaker
//!
//! Halts all autonomous execution after a run of consecutive losing trades.
//! The breaker never un-trips on its own: score decay, time, or winning
//! paper math cannot clear it, only an explicit operator reset.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

/// Consecutive losing trades that trip the breaker.
pub const DEFAULT_LOSS_THRESHOLD: u32 = 3;

/// Trade outcomes kept for the postmortem window.
pub const MAX_HISTORY_ENTRIES: usize = 20;

#[derive(Error, Debug, Clone)]
pub enum CircuitBreakerError {
    #[error("circuit breaker tripped: {reason}")]
    Tripped { reason: String },
}

/// One recorded trade outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub symbol: String,
    /// Realized profit/loss in percent (negative = loss).
    pub pnl_percent: f64,
    pub timestamp: DateTime<Utc>,
}

impl TradeOutcome {
    pub fn is_loss(&self) -> bool {
        self.pnl_percent < 0.0
    }
}

/// Emitted when a recorded outcome trips the breaker. The caller is expected
/// to persist a full-state snapshot for postmortem when it sees one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripEvent {
    pub reason: String,
    pub consecutive_losses: u32,
    pub at: DateTime<Utc>,
}

/// Read-only view for status rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerStatus {
    pub paused: bool,
    pub consecutive_losses: u32,
    pub threshold: u32,
    pub total_trips: u32,
    pub paused_at: Option<DateTime<Utc>>,
    pub paused_reason: Option<String>,
    pub recorded_trades: usize,
}

impl CircuitBreakerStatus {
    pub fn can_trade(&self) -> bool {
        !self.paused
    }

    pub fn description(&self) -> String {
        if self.paused {
            format!(
                "TRIPPED ({}) - manual reset required",
                self.paused_reason.as_deref().unwrap_or("unknown")
            )
        } else {
            format!(
                "armed: {} of {} consecutive losses",
                self.consecutive_losses, self.threshold
            )
        }
    }
}

/// Full breaker state, serialized as the postmortem snapshot and restored
/// across restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub threshold: u32,
    pub consecutive_losses: u32,
    pub paused: bool,
    pub paused_at: Option<DateTime<Utc>>,
    pub paused_reason: Option<String>,
    pub total_trips: u32,
    pub history: VecDeque<TradeOutcome>,
}

/// Consecutive-loss circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    threshold: u32,
    consecutive_losses: u32,
    paused: bool,
    paused_at: Option<DateTime<Utc>>,
    paused_reason: Option<String>,
    total_trips: u32,
    history: VecDeque<TradeOutcome>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_LOSS_THRESHOLD)
    }
}

impl CircuitBreaker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive_losses: 0,
            paused: false,
            paused_at: None,
            paused_reason: None,
            total_trips: 0,
            history: VecDeque::with_capacity(MAX_HISTORY_ENTRIES),
        }
    }

    /// Record a realized trade outcome.
    ///
    /// A loss increments the consecutive counter; any non-negative outcome
    /// resets it to zero outright. Returns a `TripEvent` exactly when this
    /// call crossed the threshold while the breaker was still armed.
    pub fn record_outcome(&mut self, symbol: &str, pnl_percent: f64) -> Option<TripEvent> {
        let outcome = TradeOutcome {
            symbol: symbol.to_string(),
            pnl_percent,
            timestamp: Utc::now(),
        };

        if outcome.is_loss() {
            self.consecutive_losses += 1;
        } else {
            self.consecutive_losses = 0;
        }

        self.history.push_back(outcome);
        while self.history.len() > MAX_HISTORY_ENTRIES {
            self.history.pop_front();
        }

        if !self.paused && self.consecutive_losses >= self.threshold {
            let reason = format!(
                "{} consecutive losing trades (last: {} {:+.2}%)",
                self.consecutive_losses, symbol, pnl_percent
            );
            self.paused = true;
            self.paused_at = Some(Utc::now());
            self.paused_reason = Some(reason.clone());
            self.total_trips += 1;
            error!(%reason, "circuit breaker tripped, autonomous trading halted");
            return Some(TripEvent {
                reason,
                consecutive_losses: self.consecutive_losses,
                at: Utc::now(),
            });
        }

        None
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Gate check for anything about to trade.
    pub fn ensure_can_trade(&self) -> Result<(), CircuitBreakerError> {
        if self.paused {
            Err(CircuitBreakerError::Tripped {
                reason: self
                    .paused_reason
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string()),
            })
        } else {
            Ok(())
        }
    }

    /// The only path back to unpaused. Returns whether the breaker was
    /// actually paused, so callers can distinguish a no-op reset.
    pub fn reset(&mut self) -> bool {
        let was_paused = self.paused;
        self.paused = false;
        self.paused_at = None;
        self.paused_reason = None;
        self.consecutive_losses = 0;
        if was_paused {
            info!("circuit breaker reset, autonomous trading re-armed");
        }
        was_paused
    }

    pub fn status(&self) -> CircuitBreakerStatus {
        CircuitBreakerStatus {
            paused: self.paused,
            consecutive_losses: self.consecutive_losses,
            threshold: self.threshold,
            total_trips: self.total_trips,
            paused_at: self.paused_at,
            paused_reason: self.paused_reason.clone(),
            recorded_trades: self.history.len(),
        }
    }

    pub fn history(&self) -> &VecDeque<TradeOutcome> {
        &self.history
    }

    /// Snapshot for persistence (and the postmortem write on trip).
    pub fn state(&self) -> CircuitBreakerState {
        CircuitBreakerState {
            threshold: self.threshold,
            consecutive_losses: self.consecutive_losses,
            paused: self.paused,
            paused_at: self.paused_at,
            paused_reason: self.paused_reason.clone(),
            total_trips: self.total_trips,
            history: self.history.clone(),
        }
    }

    /// Rebuild from a persisted snapshot. A breaker that went down tripped
    /// comes back tripped.
    pub fn from_state(state: CircuitBreakerState) -> Self {
        Self {
            threshold: state.threshold.max(1),
            consecutive_losses: state.consecutive_losses,
            paused: state.paused,
            paused_at: state.paused_at,
            paused_reason: state.paused_reason,
            total_trips: state.total_trips,
            history: state.history,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_consecutive_losses_trip() {
        let mut breaker = CircuitBreaker::default();

        assert!(breaker.record_outcome("AAPL", -1.2).is_none());
        assert!(breaker.record_outcome("MSFT", -0.4).is_none());
        assert!(!breaker.is_paused());

        let trip = breaker.record_outcome("NVDA", -2.1);
        assert!(trip.is_some());
        assert!(breaker.is_paused());
        assert_eq!(breaker.status().total_trips, 1);
        assert!(breaker.ensure_can_trade().is_err());
    }

    #[test]
    fn a_win_anywhere_resets_the_counter() {
        let mut breaker = CircuitBreaker::default();

        breaker.record_outcome("AAPL", -1.0);
        breaker.record_outcome("MSFT", -1.0);
        breaker.record_outcome("NVDA", 0.5);
        assert_eq!(breaker.status().consecutive_losses, 0);

        breaker.record_outcome("TSLA", -1.0);
        breaker.record_outcome("AMZN", -1.0);
        assert!(!breaker.is_paused());

        // Only now does the third consecutive loss land.
        assert!(breaker.record_outcome("META", -1.0).is_some());
    }

    #[test]
    fn breakeven_counts_as_a_win_for_the_counter() {
        let mut breaker = CircuitBreaker::default();
        breaker.record_outcome("AAPL", -1.0);
        breaker.record_outcome("AAPL", -1.0);
        breaker.record_outcome("AAPL", 0.0);
        assert_eq!(breaker.status().consecutive_losses, 0);
        assert!(!breaker.is_paused());
    }

    #[test]
    fn losses_while_paused_do_not_retrip() {
        let mut breaker = CircuitBreaker::default();
        for _ in 0..3 {
            breaker.record_outcome("SPY", -1.0);
        }
        assert!(breaker.is_paused());

        // Forced-trade losses recorded while paused must not double-count trips.
        assert!(breaker.record_outcome("SPY", -1.0).is_none());
        assert_eq!(breaker.status().total_trips, 1);
    }

    #[test]
    fn only_reset_unpauses() {
        let mut breaker = CircuitBreaker::default();
        for _ in 0..3 {
            breaker.record_outcome("SPY", -1.0);
        }
        assert!(breaker.is_paused());

        // Wins do not clear a paused breaker.
        breaker.record_outcome("SPY", 5.0);
        assert!(breaker.is_paused());

        assert!(breaker.reset());
        assert!(!breaker.is_paused());
        assert_eq!(breaker.status().consecutive_losses, 0);
        assert!(breaker.ensure_can_trade().is_ok());

        // Resetting an armed breaker is a no-op.
        assert!(!breaker.reset());
    }

    #[test]
    fn history_is_bounded() {
        let mut breaker = CircuitBreaker::new(1000);
        for i in 0..50 {
            breaker.record_outcome("SPY", if i % 2 == 0 { 1.0 } else { -1.0 });
        }
        assert_eq!(breaker.history().len(), MAX_HISTORY_ENTRIES);
    }

    #[test]
    fn snapshot_round_trip_preserves_paused_state() {
        let mut breaker = CircuitBreaker::default();
        for _ in 0..3 {
            breaker.record_outcome("SPY", -1.0);
        }
        let state = breaker.state();

        let json = serde_json::to_value(&state).unwrap();
        let restored: CircuitBreakerState = serde_json::from_value(json).unwrap();
        let restored = CircuitBreaker::from_state(restored);

        assert!(restored.is_paused());
        assert_eq!(restored.status().total_trips, 1);
        assert_eq!(restored.history().len(), 3);
    }

    #[test]
    fn custom_threshold_respected() {
        let mut breaker = CircuitBreaker::new(2);
        breaker.record_outcome("SPY", -1.0);
        assert!(!breaker.is_paused());
        assert!(breaker.record_outcome("SPY", -1.0).is_some());
    }
}
