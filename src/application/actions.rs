//! Operator actions
//!
//! Everything the CLI can do besides running the loops: manual trades, the
//! kill switch, breaker reset, policy edits, status, and one-shot scans.
//! Handlers return structured results and typed errors; rendering stays in
//! the binary. A manual trade rides the same safety funnel as the loops,
//! minus the oracle and its confidence gate; `force` overrides exactly one
//! thing, a paused circuit breaker.

use std::collections::HashMap;
use std::fmt;

use chrono::Utc;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{error, info, warn};

use super::gates::{daily_loss_gate, open_position_count, size_equity_order, BlockReason};
use super::CoreServices;
use crate::domain::{KeyChange, Mood, PolicyError, TradingPolicy};
use crate::gex::{GexAnalysis, GexError};
use crate::ports::broker::BrokerError;
use crate::ports::market_data::MarketDataError;
use crate::ports::models::{
    AccountSnapshot, AssetClass, OrderReceipt, OrderSide, OrderSpec, Position,
};
use crate::ports::state::StateError;
use crate::squeeze::{PriceSample, SqueezeState, SqueezeUpdate};

#[derive(Error, Debug)]
pub enum ActionError {
    /// A safety gate said no. Normal control flow, not a failure.
    #[error("{0}")]
    Blocked(BlockReason),

    #[error("no usable price for {0}")]
    NoPrice(String),

    #[error("{symbol} sized to zero shares at ${price:.2}")]
    SizedToZero { symbol: String, price: f64 },

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    MarketData(#[from] MarketDataError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Gex(#[from] GexError),
}

/// What a manual trade did.
#[derive(Debug)]
pub enum ManualTradeOutcome {
    Submitted {
        receipt: OrderReceipt,
        qty: Decimal,
        notional: f64,
    },
    Closed {
        receipt: OrderReceipt,
        pnl_percent: f64,
    },
}

impl fmt::Display for ManualTradeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManualTradeOutcome::Submitted {
                receipt,
                qty,
                notional,
            } => write!(
                f,
                "submitted {} {} {} (${notional:.2}), order {}",
                receipt.side, qty, receipt.symbol, receipt.order_id
            ),
            ManualTradeOutcome::Closed {
                receipt,
                pnl_percent,
            } => write!(
                f,
                "closed {} at {pnl_percent:+.2}%, order {}",
                receipt.symbol, receipt.order_id
            ),
        }
    }
}

/// Operator-initiated trade. Skips the oracle and its confidence floor;
/// every other gate still applies. A sell against a held position closes
/// it and records the realized outcome; a sell with nothing held is a
/// short entry and needs `allow_shorting`.
pub async fn manual_trade(
    services: &CoreServices,
    symbol: &str,
    side: OrderSide,
    notional: Option<f64>,
    force: bool,
) -> Result<ManualTradeOutcome, ActionError> {
    let symbol = symbol.trim().to_uppercase();
    // Blocks until any in-flight cycle finishes; operator actions wait
    // rather than skip.
    let _guard = services.trade_lock.lock().await;
    let policy = services.policy().await;

    {
        let safety = services.safety.read().await;
        if let Err(e) = safety.breaker.ensure_can_trade() {
            if force {
                warn!(symbol, reason = %e, "breaker overridden by force flag");
            } else {
                return Err(ActionError::Blocked(BlockReason::BreakerTripped {
                    reason: e.to_string(),
                }));
            }
        }
    }

    let clock = services.broker.clock().await?;
    if !clock.is_open && !policy.crypto_enabled {
        return Err(ActionError::Blocked(BlockReason::MarketClosed));
    }

    if side == OrderSide::Sell {
        if let Some(position) = services.broker.position(&symbol).await? {
            return close_held(services, &policy, position).await;
        }
        if !policy.allow_shorting {
            return Err(ActionError::Blocked(BlockReason::ShortingDisabled));
        }
    }

    let account = services.broker.account().await?;
    daily_loss_gate(&policy, &account).map_err(ActionError::Blocked)?;

    let positions = services.broker.positions().await?;
    let open = open_position_count(&positions);
    if open >= policy.max_positions as usize {
        return Err(ActionError::Blocked(BlockReason::AtMaxPositions {
            open,
            max: policy.max_positions,
        }));
    }
    {
        let safety = services.safety.read().await;
        if safety.cooldowns.is_active(&symbol) {
            let remaining_minutes = safety
                .cooldowns
                .remaining(&symbol)
                .map(|d| d.num_minutes().max(1))
                .unwrap_or(1);
            return Err(ActionError::Blocked(BlockReason::CoolingDown {
                remaining_minutes,
            }));
        }
    }

    let cash = account.cash.to_f64().unwrap_or(0.0);
    let notional = match notional {
        Some(requested) => {
            let clamped = requested.min(policy.max_trade_dollar_amount);
            if clamped < requested {
                warn!(requested, clamped, "notional clamped to the per-trade ceiling");
            }
            if clamped < policy.min_trade_dollar_amount {
                return Err(ActionError::Blocked(BlockReason::BelowMinimumSize {
                    notional: clamped,
                    min: policy.min_trade_dollar_amount,
                }));
            }
            clamped
        }
        None => size_equity_order(&policy, cash).map_err(ActionError::Blocked)?,
    };

    let price = services.market_data.latest_price(&symbol).await?;
    if price <= 0.0 {
        return Err(ActionError::NoPrice(symbol));
    }
    let qty = Decimal::from_f64(notional / price)
        .unwrap_or_default()
        .round_dp(3);
    if qty <= Decimal::ZERO {
        return Err(ActionError::SizedToZero { symbol, price });
    }

    let spec = OrderSpec::market(&symbol, qty, side, AssetClass::UsEquity);
    let receipt = services.broker.submit_order(&spec).await?;
    info!(
        symbol,
        side = %side,
        %qty,
        notional,
        order_id = %receipt.order_id,
        "manual order submitted"
    );
    {
        let mut safety = services.safety.write().await;
        safety
            .journal
            .submitted(&symbol, side.as_str(), qty.to_f64().unwrap_or(0.0), notional);
        safety.cooldowns.start(&symbol, policy.cooldown_minutes);
    }
    services.persist().await?;
    Ok(ManualTradeOutcome::Submitted {
        receipt,
        qty,
        notional,
    })
}

/// Close a held position on operator request. The realized outcome feeds
/// the breaker like any other close.
async fn close_held(
    services: &CoreServices,
    policy: &TradingPolicy,
    position: Position,
) -> Result<ManualTradeOutcome, ActionError> {
    let pnl_percent = position.unrealized_pnl_pct * 100.0;
    let receipt = services.broker.close_position(&position.symbol).await?;
    info!(symbol = %position.symbol, pnl_percent, "manual close");

    let trip = {
        let mut safety = services.safety.write().await;
        safety
            .journal
            .closed(&position.symbol, pnl_percent, "manual close");
        safety
            .cooldowns
            .start(&position.symbol, policy.cooldown_minutes);
        safety.breaker.record_outcome(&position.symbol, pnl_percent)
    };
    if let Some(trip) = trip {
        error!(reason = %trip.reason, "breaker tripped on manual close");
        match services.snapshot("breaker_trip").await {
            Ok(path) => info!(path, "postmortem snapshot written"),
            Err(e) => error!(error = %e, "postmortem snapshot failed"),
        }
    }
    services.persist().await?;
    Ok(ManualTradeOutcome::Closed {
        receipt,
        pnl_percent,
    })
}

#[derive(Debug)]
pub struct ClosedPosition {
    pub symbol: String,
    pub pnl_percent: f64,
}

/// What the kill switch did.
#[derive(Debug)]
pub struct KillReport {
    /// Whether autonomous trading was on when the switch was thrown.
    pub was_enabled: bool,
    pub cancelled_orders: u32,
    pub closed: Vec<ClosedPosition>,
    pub snapshot_path: Option<String>,
}

impl fmt::Display for KillReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "autonomous trading {}",
            if self.was_enabled {
                "disabled"
            } else {
                "already disabled"
            }
        )?;
        writeln!(f, "cancelled {} open order(s)", self.cancelled_orders)?;
        if self.closed.is_empty() {
            writeln!(f, "no positions to close")?;
        } else {
            for c in &self.closed {
                writeln!(f, "closed {} at {:+.2}%", c.symbol, c.pnl_percent)?;
            }
        }
        match &self.snapshot_path {
            Some(path) => write!(f, "snapshot written to {path}"),
            None => write!(f, "snapshot write FAILED, check the log"),
        }
    }
}

/// Emergency kill: disable the loops, cancel everything, flatten
/// everything, write a postmortem snapshot. No gates apply and calling it
/// again when already flat is safe.
pub async fn emergency_kill(services: &CoreServices) -> Result<KillReport, ActionError> {
    // Disable first so an in-flight cycle stops at its next candidate even
    // if the flatten below fails.
    let was_enabled = {
        let mut safety = services.safety.write().await;
        let was = safety.policy.policy().autonomous_enabled;
        if was {
            let _ = safety.policy.set_key("autonomous_enabled", "false");
        }
        was
    };
    warn!(was_enabled, "kill switch engaged");

    let _guard = services.trade_lock.lock().await;

    // Unrealized P/L per symbol before the close wipes it; best effort.
    let pnl_by_symbol: HashMap<String, f64> = services
        .broker
        .positions()
        .await
        .map(|ps| {
            ps.into_iter()
                .map(|p| (p.symbol.clone(), p.unrealized_pnl_pct * 100.0))
                .collect()
        })
        .unwrap_or_default();

    let cancelled_orders = services.broker.cancel_all_orders().await?;
    let receipts = services.broker.close_all_positions().await?;
    let closed: Vec<ClosedPosition> = receipts
        .iter()
        .map(|r| ClosedPosition {
            symbol: r.symbol.clone(),
            pnl_percent: pnl_by_symbol.get(&r.symbol).copied().unwrap_or(0.0),
        })
        .collect();

    {
        let mut safety = services.safety.write().await;
        for c in &closed {
            safety.journal.closed(&c.symbol, c.pnl_percent, "kill switch");
        }
    }

    let snapshot_path = match services.snapshot("kill_switch").await {
        Ok(path) => Some(path),
        Err(e) => {
            error!(error = %e, "kill snapshot failed");
            None
        }
    };
    services.persist().await?;
    info!(
        cancelled_orders,
        closed = closed.len(),
        "kill switch complete"
    );
    Ok(KillReport {
        was_enabled,
        cancelled_orders,
        closed,
        snapshot_path,
    })
}

/// Re-arm a tripped breaker. Returns whether it was actually paused.
pub async fn reset_breaker(services: &CoreServices) -> Result<bool, ActionError> {
    let was_paused = {
        let mut safety = services.safety.write().await;
        safety.breaker.reset()
    };
    services.persist().await?;
    Ok(was_paused)
}

pub async fn config_get(services: &CoreServices, key: &str) -> Result<String, ActionError> {
    let safety = services.safety.read().await;
    Ok(safety.policy.render_key(key)?)
}

pub async fn config_set(
    services: &CoreServices,
    key: &str,
    value: &str,
) -> Result<KeyChange, ActionError> {
    let change = {
        let mut safety = services.safety.write().await;
        safety.policy.set_key(key, value)?
    };
    services.persist().await?;
    Ok(change)
}

pub async fn config_list(services: &CoreServices) -> Vec<(&'static str, String)> {
    services.safety.read().await.policy.entries()
}

/// Toggle dangerous mode. Returns whether anything changed.
pub async fn set_dangerous(services: &CoreServices, on: bool) -> Result<bool, ActionError> {
    let changed = {
        let mut safety = services.safety.write().await;
        if on {
            safety.policy.enable_dangerous()
        } else {
            safety.policy.disable_dangerous()
        }
    };
    if changed {
        services.persist().await?;
    }
    Ok(changed)
}

/// Everything the `status` command shows.
#[derive(Debug)]
pub struct StatusReport {
    pub account: AccountSnapshot,
    pub daily_change_pct: Option<f64>,
    pub market_open: bool,
    pub positions: Vec<Position>,
    pub autonomous_enabled: bool,
    pub dangerous_mode: bool,
    pub breaker: String,
    pub mood: Mood,
    pub win_rate: Option<f64>,
    pub total_closed: u32,
    /// Active cooldowns as (symbol, minutes remaining).
    pub cooldowns: Vec<(String, i64)>,
    pub squeezes: Vec<(String, SqueezeState, f64)>,
    /// Rendered recent journal entries, newest last; empty unless detailed.
    pub journal: Vec<String>,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Account")?;
        writeln!(
            f,
            "  equity ${}  cash ${}  buying power ${}",
            self.account.equity, self.account.cash, self.account.buying_power
        )?;
        match self.daily_change_pct {
            Some(change) => writeln!(f, "  today {:+.2}%", change * 100.0)?,
            None => writeln!(f, "  today n/a")?,
        }
        writeln!(
            f,
            "  market {}",
            if self.market_open { "open" } else { "closed" }
        )?;

        writeln!(f, "Safety")?;
        writeln!(
            f,
            "  autonomous {}  dangerous mode {}",
            if self.autonomous_enabled { "ON" } else { "off" },
            if self.dangerous_mode { "ON" } else { "off" }
        )?;
        writeln!(f, "  breaker: {}", self.breaker)?;
        write!(f, "  mood {}", self.mood)?;
        if let Some(rate) = self.win_rate {
            write!(f, "  win rate {:.0}%", rate * 100.0)?;
        }
        writeln!(f, "  closed trades {}", self.total_closed)?;

        if self.positions.is_empty() {
            writeln!(f, "Positions: none")?;
        } else {
            writeln!(f, "Positions")?;
            for p in &self.positions {
                writeln!(
                    f,
                    "  {} {} @ {}  {:+.2}%",
                    p.symbol,
                    p.qty,
                    p.current_price,
                    p.unrealized_pnl_pct * 100.0
                )?;
            }
        }

        if !self.cooldowns.is_empty() {
            writeln!(f, "Cooldowns")?;
            for (symbol, minutes) in &self.cooldowns {
                writeln!(f, "  {symbol} {minutes}m remaining")?;
            }
        }

        if !self.squeezes.is_empty() {
            writeln!(f, "Squeeze trackers")?;
            for (symbol, state, score) in &self.squeezes {
                writeln!(f, "  {symbol} {state} (score {score:.1})")?;
            }
        }

        if !self.journal.is_empty() {
            writeln!(f, "Recent journal")?;
            for line in &self.journal {
                writeln!(f, "  {line}")?;
            }
        }
        Ok(())
    }
}

pub async fn status_report(
    services: &CoreServices,
    detailed: bool,
) -> Result<StatusReport, ActionError> {
    let account = services.broker.account().await?;
    let positions = services.broker.positions().await?;
    let clock = services.broker.clock().await?;

    let safety = services.safety.read().await;
    let now = Utc::now();
    let cooldowns = safety
        .cooldowns
        .active()
        .into_iter()
        .map(|(symbol, until)| (symbol, (until - now).num_minutes().max(0)))
        .collect();
    let journal = if detailed {
        safety.journal.recent(10).map(|e| e.to_string()).collect()
    } else {
        Vec::new()
    };
    let squeezes = services.squeezes.read().await.states();

    Ok(StatusReport {
        daily_change_pct: account.daily_change_pct(),
        market_open: clock.is_open,
        autonomous_enabled: safety.policy.policy().autonomous_enabled,
        dangerous_mode: safety.policy.is_dangerous(),
        breaker: safety.breaker.status().description(),
        mood: safety.journal.mood(),
        win_rate: safety.journal.win_rate(),
        total_closed: safety.journal.total_closed(),
        cooldowns,
        squeezes,
        journal,
        account,
        positions,
    })
}

/// One-shot GEX analysis over the nearest `expiry_count` listed expirations.
pub async fn gex_snapshot(
    services: &CoreServices,
    ticker: &str,
    expiry_count: usize,
) -> Result<GexAnalysis, ActionError> {
    let ticker = ticker.trim().to_uppercase();
    let dates = services.options_data.expirations(&ticker).await.map_err(GexError::from)?;
    let take = expiry_count.max(1).min(dates.len().max(1));
    let nearest: Vec<_> = dates.into_iter().take(take).collect();
    Ok(services.gex.analyze(&ticker, &nearest).await?)
}

/// Score each ticker's squeeze setup off its nearest expiration. Tickers
/// with no data are skipped with a warning, not failed.
pub async fn squeeze_scan(
    services: &CoreServices,
    tickers: &[String],
) -> Vec<(String, SqueezeUpdate)> {
    let mut updates = Vec::new();
    let now = Utc::now();

    for ticker in tickers {
        let ticker = ticker.trim().to_uppercase();
        let expiry = match services.options_data.expirations(&ticker).await {
            Ok(dates) if !dates.is_empty() => dates[0],
            Ok(_) => {
                warn!(ticker, "no listed expirations, skipping");
                continue;
            }
            Err(e) => {
                warn!(ticker, error = %e, "expirations unavailable, skipping");
                continue;
            }
        };
        let analysis = match services.gex.analyze(&ticker, &[expiry]).await {
            Ok(a) => a,
            Err(e) => {
                warn!(ticker, error = %e, "analysis failed, skipping");
                continue;
            }
        };
        let samples = services
            .market_data
            .daily_bars(&ticker, 10)
            .await
            .map(|bars| {
                bars.iter()
                    .map(|b| PriceSample {
                        high: b.high,
                        low: b.low,
                        close: b.close,
                        volume: b.volume as f64,
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        let update = services
            .squeezes
            .write()
            .await
            .update(&ticker, &analysis, &samples, now);
        updates.push((ticker, update));
    }

    updates
}
