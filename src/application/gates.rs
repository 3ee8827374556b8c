//! Entry gates
//!
//! Pure checks between "the oracle said something" and "an order goes out".
//! Each gate answers with a `BlockReason` so callers can log and journal the
//! same words the operator later reads in `status`. Nothing here touches a
//! port; the loops gather the inputs and call down.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;

use crate::domain::{CircuitBreaker, CooldownMap, TradingPolicy};
use crate::ports::models::{AccountSnapshot, MarketClock, OrderSide, Position};
use crate::ports::oracle::{OracleAction, OracleDecision};

/// Why a cycle, candidate, or order did not proceed.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockReason {
    AutonomousDisabled,
    MarketClosed,
    BreakerTripped { reason: String },
    DailyLossBreached { change_pct: f64, limit_pct: f64 },
    /// Daily change could not be computed and the policy says halt.
    DailyLossUnknown,
    AtMaxPositions { open: usize, max: u32 },
    CoolingDown { remaining_minutes: i64 },
    AlreadyHeld,
    LowConfidence { confidence: f64, min: f64 },
    OracleHold,
    ShortingDisabled,
    BelowMinimumSize { notional: f64, min: f64 },
    PremiumOverBudget { cost: f64, budget: f64 },
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockReason::AutonomousDisabled => write!(f, "autonomous trading disabled"),
            BlockReason::MarketClosed => write!(f, "market closed"),
            BlockReason::BreakerTripped { reason } => {
                write!(f, "circuit breaker tripped: {reason}")
            }
            BlockReason::DailyLossBreached {
                change_pct,
                limit_pct,
            } => write!(
                f,
                "daily loss {:.2}% beyond limit {:.2}%",
                change_pct * 100.0,
                limit_pct * 100.0
            ),
            BlockReason::DailyLossUnknown => {
                write!(f, "daily loss unknown and fail-open disabled")
            }
            BlockReason::AtMaxPositions { open, max } => {
                write!(f, "at position cap ({open}/{max})")
            }
            BlockReason::CoolingDown { remaining_minutes } => {
                write!(f, "cooling down for {remaining_minutes}m")
            }
            BlockReason::AlreadyHeld => write!(f, "already holding"),
            BlockReason::LowConfidence { confidence, min } => {
                write!(f, "confidence {confidence:.2} below floor {min:.2}")
            }
            BlockReason::OracleHold => write!(f, "oracle says hold"),
            BlockReason::ShortingDisabled => write!(f, "shorting disabled"),
            BlockReason::BelowMinimumSize { notional, min } => {
                write!(f, "sized ${notional:.2} below minimum ${min:.2}")
            }
            BlockReason::PremiumOverBudget { cost, budget } => {
                write!(f, "premium ${cost:.2} over budget ${budget:.2}")
            }
        }
    }
}

/// Cycle-level gates, checked once per scan before any candidate work.
///
/// Order matters: the kill switch and breaker are consulted before anything
/// that costs an API call, and the session check honors the crypto carve-out
/// since crypto venues have no closing bell.
pub fn cycle_gates(
    policy: &TradingPolicy,
    breaker: &CircuitBreaker,
    clock: &MarketClock,
    open_positions: usize,
) -> Result<(), BlockReason> {
    if !policy.autonomous_enabled {
        return Err(BlockReason::AutonomousDisabled);
    }
    if let Err(e) = breaker.ensure_can_trade() {
        return Err(BlockReason::BreakerTripped {
            reason: e.to_string(),
        });
    }
    if !clock.is_open && !policy.crypto_enabled {
        return Err(BlockReason::MarketClosed);
    }
    if open_positions >= policy.max_positions as usize {
        return Err(BlockReason::AtMaxPositions {
            open: open_positions,
            max: policy.max_positions,
        });
    }
    Ok(())
}

/// Daily drawdown gate. `Ok(Some(change))` passes along today's move for
/// logging; `Ok(None)` means the number was unavailable but the policy says
/// trade anyway.
pub fn daily_loss_gate(
    policy: &TradingPolicy,
    account: &AccountSnapshot,
) -> Result<Option<f64>, BlockReason> {
    match account.daily_change_pct() {
        Some(change) => {
            if change <= -policy.daily_loss_limit_percent {
                Err(BlockReason::DailyLossBreached {
                    change_pct: change,
                    limit_pct: policy.daily_loss_limit_percent,
                })
            } else {
                Ok(Some(change))
            }
        }
        None if policy.fail_open_daily_loss => Ok(None),
        None => Err(BlockReason::DailyLossUnknown),
    }
}

/// Per-candidate gates that need no oracle call: held names and cooling
/// names are skipped before any evaluation spend.
pub fn candidate_gates(
    symbol: &str,
    positions: &[Position],
    cooldowns: &CooldownMap,
    now: DateTime<Utc>,
) -> Result<(), BlockReason> {
    if positions
        .iter()
        .any(|p| p.symbol.eq_ignore_ascii_case(symbol))
    {
        return Err(BlockReason::AlreadyHeld);
    }
    if cooldowns.is_active_at(symbol, now) {
        let remaining_minutes = cooldowns
            .remaining(symbol)
            .map(|d| d.num_minutes().max(1))
            .unwrap_or(1);
        return Err(BlockReason::CoolingDown { remaining_minutes });
    }
    Ok(())
}

/// Verdict gates, applied in a fixed order: confidence floor first, then the
/// hold short-circuit, then the shorting rule. A sell verdict on a candidate
/// list that already excludes held names can only mean opening a short.
pub fn decision_gates(
    policy: &TradingPolicy,
    decision: &OracleDecision,
) -> Result<OrderSide, BlockReason> {
    if decision.confidence < policy.min_confidence {
        return Err(BlockReason::LowConfidence {
            confidence: decision.confidence,
            min: policy.min_confidence,
        });
    }
    match decision.action {
        OracleAction::Hold => Err(BlockReason::OracleHold),
        OracleAction::Sell if !policy.allow_shorting => Err(BlockReason::ShortingDisabled),
        OracleAction::Sell => Ok(OrderSide::Sell),
        OracleAction::Buy => Ok(OrderSide::Buy),
    }
}

/// Equity notional: a cash fraction clamped by the per-trade ceiling,
/// rejected below the floor.
pub fn size_equity_order(policy: &TradingPolicy, cash: f64) -> Result<f64, BlockReason> {
    let notional = (cash * policy.position_size_percent).min(policy.max_trade_dollar_amount);
    if notional < policy.min_trade_dollar_amount {
        return Err(BlockReason::BelowMinimumSize {
            notional,
            min: policy.min_trade_dollar_amount,
        });
    }
    Ok(notional)
}

/// Default universe plus the operator watchlist, first-seen order, no dupes.
pub fn build_universe(policy: &TradingPolicy, defaults: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    defaults
        .iter()
        .chain(policy.watchlist.iter())
        .map(|s| s.to_uppercase())
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.clone()))
        .collect()
}

/// Position count as the cap sees it. Fractional share dust still occupies
/// a slot; the cap is about name-level exposure, not share count.
pub fn open_position_count(positions: &[Position]) -> usize {
    positions
        .iter()
        .filter(|p| p.qty.to_f64().map(f64::abs).unwrap_or(0.0) > 1e-9)
        .count()
}
