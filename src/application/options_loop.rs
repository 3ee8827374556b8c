//! Zero-DTE options loop
//!
//! Same-day options on a short list of liquid underlyings, driven by the
//! dealer gamma picture instead of technicals. Each cycle runs a position
//! monitor before any entry work: stop-loss and take-profit breaches are
//! flattened, and anything expiring today is forced flat inside the final
//! minutes so nothing rides into settlement pinned to a strike. Every
//! monitored close feeds its realized P/L into the circuit breaker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::equity_loop::CycleError;
use super::evaluation::{build_options_prompt, parse_options_decision, OPTIONS_SYSTEM_PROMPT};
use super::gates::{cycle_gates, daily_loss_gate, open_position_count, BlockReason};
use super::CoreServices;
use crate::adapters::polygon::symbols::{occ_for_alpaca, parse_occ};
use crate::domain::TradingPolicy;
use crate::gex::{OptionContract, OptionKind};
use crate::ports::models::{AssetClass, OrderSide, OrderSpec, Position};
use crate::ports::oracle::{OptionsAction, OptionsDecision};
use crate::squeeze::PriceSample;

/// Fixed tick for the zero-DTE loop. Same-day gamma moves too fast for the
/// policy-driven equity interval.
pub const ZERO_DTE_TICK_SECS: u64 = 60;

/// Force-flat window before the close for contracts expiring today.
pub const EXPIRY_FLAT_MINUTES: i64 = 15;

/// Daily bars fed to the squeeze scorer.
const SQUEEZE_BAR_LOOKBACK: usize = 10;

/// Strike offset from spot by conviction band, as a fraction of spot. High
/// conviction buys at the money; weaker conviction moves out for cheaper
/// premium.
fn strike_offset(conviction: f64) -> f64 {
    if conviction >= 8.0 {
        0.0
    } else if conviction >= 6.0 {
        0.007
    } else {
        0.015
    }
}

/// Nearest liquid contract of the right kind to the target strike. Liquid
/// means open interest or volume, plus a usable ask.
fn pick_contract(contracts: &[OptionContract], kind: OptionKind, target: f64) -> Option<OptionContract> {
    contracts
        .iter()
        .filter(|c| c.kind == kind)
        .filter(|c| c.open_interest > 0 || c.volume > 0)
        .filter(|c| c.ask.is_some_and(|a| a > 0.0))
        .min_by(|a, b| {
            (a.strike - target)
                .abs()
                .total_cmp(&(b.strike - target).abs())
        })
        .cloned()
}

/// Contracts affordable under the premium budget, floored at one.
fn size_contracts(budget: f64, ask: f64) -> (u64, f64) {
    let per_contract = ask * 100.0;
    let qty = ((budget / per_contract).floor() as u64).max(1);
    (qty, qty as f64 * per_contract)
}

enum TickerOutcome {
    Entered,
    Journaled,
    Skipped,
}

/// The autonomous same-day options loop.
pub struct ZeroDteLoop {
    services: Arc<CoreServices>,
    tickers: Vec<String>,
    is_running: Arc<RwLock<bool>>,
    shutdown: Arc<AtomicBool>,
}

impl ZeroDteLoop {
    pub fn new(services: Arc<CoreServices>, tickers: Vec<String>) -> Self {
        Self {
            services,
            tickers,
            is_running: Arc::new(RwLock::new(false)),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub async fn run(&self) {
        {
            let mut running = self.is_running.write().await;
            *running = true;
        }

        let mut ticker = tokio::time::interval(Duration::from_secs(ZERO_DTE_TICK_SECS));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(tickers = ?self.tickers, "zero-DTE loop started");

        loop {
            ticker.tick().await;
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            match self.services.trade_lock.try_lock() {
                Ok(_guard) => {
                    if let Err(e) = self.cycle().await {
                        error!(error = %e, "zero-DTE cycle failed");
                    }
                }
                Err(_) => {
                    warn!("previous cycle still running, skipping tick");
                }
            }
        }

        {
            let mut running = self.is_running.write().await;
            *running = false;
        }
        info!("zero-DTE loop stopped");
    }

    pub async fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        info!("zero-DTE loop stop requested");
    }

    /// One pass: monitor open contracts first, then look for entries.
    pub async fn cycle(&self) -> Result<(), CycleError> {
        let services = &self.services;

        let policy = {
            let mut safety = services.safety.write().await;
            safety.cooldowns.prune();
            if !safety.policy.policy().autonomous_enabled {
                debug!("autonomous trading disabled, skipping cycle");
                return Ok(());
            }
            safety.policy.policy().clone()
        };

        // Options trade regular hours only; the crypto carve-out does not
        // apply here.
        let clock = services.broker.clock().await?;
        let now = Utc::now();
        let Some(minutes_left) = clock.minutes_to_close(now) else {
            debug!("market closed, skipping cycle");
            return Ok(());
        };
        let today = now.date_naive();

        // Monitor runs before entry gates, and runs even with the breaker
        // paused: the breaker halts new evaluations, not protective closes.
        let mut dirty = self.monitor_positions(&policy, today, minutes_left).await?;

        let positions = services.broker.positions().await?;
        let open_count = open_position_count(&positions);
        let entry_block = {
            let safety = services.safety.read().await;
            cycle_gates(&policy, &safety.breaker, &clock, open_count).err()
        };
        if let Some(reason) = entry_block {
            debug!(reason = %reason, "no entries this cycle");
            if dirty {
                services.persist().await?;
            }
            return Ok(());
        }

        let account = services.broker.account().await?;
        if let Err(reason) = daily_loss_gate(&policy, &account) {
            warn!(reason = %reason, "halting entries for the day");
            if dirty {
                services.persist().await?;
            }
            return Ok(());
        }

        let mut entered = 0usize;
        for ticker in &self.tickers {
            if self.shutdown.load(Ordering::Relaxed) {
                info!("stop requested mid-cycle");
                break;
            }
            {
                let safety = services.safety.read().await;
                if !safety.policy.policy().autonomous_enabled {
                    info!("disabled mid-cycle, no further candidates");
                    break;
                }
            }
            if open_count + entered >= policy.max_positions as usize {
                debug!(entered, "position cap reached mid-cycle");
                break;
            }

            match self
                .scan_ticker(&policy, ticker, today, &positions, now)
                .await?
            {
                TickerOutcome::Entered => {
                    entered += 1;
                    dirty = true;
                }
                TickerOutcome::Journaled => dirty = true,
                TickerOutcome::Skipped => {}
            }
        }

        if dirty {
            services.persist().await?;
        }
        Ok(())
    }

    /// Close anything breaching stop-loss or take-profit, and force-flat
    /// same-day contracts inside the final minutes before the bell. Returns
    /// whether any state changed.
    async fn monitor_positions(
        &self,
        policy: &TradingPolicy,
        today: NaiveDate,
        minutes_left: i64,
    ) -> Result<bool, CycleError> {
        let services = &self.services;
        let positions = services.broker.positions().await?;
        let mut dirty = false;

        for position in positions
            .iter()
            .filter(|p| p.asset_class == AssetClass::UsOption)
        {
            let pnl = position.unrealized_pnl_pct;
            let occ = parse_occ(&position.symbol);

            let reason = if pnl <= -policy.stop_loss_percent {
                Some("stop loss")
            } else if pnl >= policy.take_profit_percent {
                Some("take profit")
            } else if occ
                .as_ref()
                .is_some_and(|o| o.expiration == today && minutes_left <= EXPIRY_FLAT_MINUTES)
            {
                Some("expiry flat")
            } else {
                None
            };
            let Some(reason) = reason else {
                continue;
            };

            match services.broker.close_position(&position.symbol).await {
                Ok(receipt) => {
                    let pnl_percent = pnl * 100.0;
                    info!(
                        symbol = %position.symbol,
                        pnl_percent,
                        reason,
                        order_id = %receipt.order_id,
                        "position closed by monitor"
                    );
                    let trip = {
                        let mut safety = services.safety.write().await;
                        safety.journal.closed(&position.symbol, pnl_percent, reason);
                        if let Some(o) = &occ {
                            safety
                                .cooldowns
                                .start(&o.underlying, policy.cooldown_minutes);
                        }
                        safety.breaker.record_outcome(&position.symbol, pnl_percent)
                    };
                    if let Some(trip) = trip {
                        error!(reason = %trip.reason, "breaker tripped, writing postmortem");
                        match services.snapshot("breaker_trip").await {
                            Ok(path) => info!(path, "postmortem snapshot written"),
                            Err(e) => error!(error = %e, "postmortem snapshot failed"),
                        }
                    }
                    dirty = true;
                }
                Err(e) => {
                    warn!(symbol = %position.symbol, error = %e, "monitor close failed");
                    let mut safety = services.safety.write().await;
                    safety.journal.failed(&position.symbol, e.to_string());
                    dirty = true;
                }
            }
        }

        Ok(dirty)
    }

    /// Evaluate one underlying for a same-day entry.
    async fn scan_ticker(
        &self,
        policy: &TradingPolicy,
        ticker: &str,
        today: NaiveDate,
        positions: &[Position],
        now: DateTime<Utc>,
    ) -> Result<TickerOutcome, CycleError> {
        let services = &self.services;

        let holds_underlying = positions.iter().any(|p| {
            parse_occ(&p.symbol)
                .map(|o| o.underlying.eq_ignore_ascii_case(ticker))
                .unwrap_or_else(|| p.symbol.eq_ignore_ascii_case(ticker))
        });
        if holds_underlying {
            debug!(ticker, "already exposed, skipping");
            return Ok(TickerOutcome::Skipped);
        }
        {
            let safety = services.safety.read().await;
            if safety.cooldowns.is_active_at(ticker, now) {
                debug!(ticker, "cooling down, skipping");
                return Ok(TickerOutcome::Skipped);
            }
        }

        match services.options_data.expirations(ticker).await {
            Ok(dates) if dates.contains(&today) => {}
            Ok(_) => {
                debug!(ticker, "no same-day expiry listed");
                return Ok(TickerOutcome::Skipped);
            }
            Err(e) => {
                warn!(ticker, error = %e, "expirations unavailable, skipping");
                return Ok(TickerOutcome::Skipped);
            }
        }

        let analysis = match services.gex.analyze(ticker, &[today]).await {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!(ticker, error = %e, "gamma analysis failed, skipping");
                return Ok(TickerOutcome::Skipped);
            }
        };

        let samples = match services
            .market_data
            .daily_bars(ticker, SQUEEZE_BAR_LOOKBACK)
            .await
        {
            Ok(bars) => bars
                .iter()
                .map(|b| PriceSample {
                    high: b.high,
                    low: b.low,
                    close: b.close,
                    volume: b.volume as f64,
                })
                .collect::<Vec<_>>(),
            Err(e) => {
                debug!(ticker, error = %e, "no bars for squeeze scoring");
                Vec::new()
            }
        };
        let squeeze = {
            let mut registry = services.squeezes.write().await;
            registry.update(ticker, &analysis, &samples, now)
        };
        debug!(
            ticker,
            squeeze_state = %squeeze.state,
            score = squeeze.breakdown.total,
            multiplier = squeeze.state.conviction_multiplier(),
            "squeeze advisory"
        );

        let briefing = build_options_prompt(&analysis, Some(&squeeze));
        let decision = match services
            .oracle
            .complete(OPTIONS_SYSTEM_PROMPT, &briefing)
            .await
        {
            Ok(raw) => parse_options_decision(&raw),
            Err(e) => {
                warn!(ticker, error = %e, "oracle unavailable, skipping");
                OptionsDecision::skip()
            }
        };
        debug!(
            ticker,
            action = %decision.action,
            confidence = decision.confidence,
            reasoning = %decision.reasoning,
            "oracle verdict"
        );

        if decision.confidence < policy.min_confidence {
            let reason = BlockReason::LowConfidence {
                confidence: decision.confidence,
                min: policy.min_confidence,
            };
            info!(ticker, reason = %reason, "candidate blocked");
            let mut safety = services.safety.write().await;
            safety.journal.blocked(ticker, reason.to_string());
            return Ok(TickerOutcome::Journaled);
        }
        let kind = match decision.action {
            OptionsAction::Call => OptionKind::Call,
            OptionsAction::Put => OptionKind::Put,
            OptionsAction::Skip => {
                debug!(ticker, "no trade");
                return Ok(TickerOutcome::Skipped);
            }
        };

        let conviction = decision.confidence * 10.0;
        let offset = strike_offset(conviction);
        let target = match kind {
            OptionKind::Call => analysis.spot * (1.0 + offset),
            OptionKind::Put => analysis.spot * (1.0 - offset),
        };

        let chain = match services.options_data.chain(ticker, today).await {
            Ok(chain) => chain,
            Err(e) => {
                warn!(ticker, error = %e, "chain unavailable, skipping");
                return Ok(TickerOutcome::Skipped);
            }
        };
        let Some(contract) = pick_contract(&chain.contracts, kind, target) else {
            debug!(ticker, target, "no liquid contract near target");
            return Ok(TickerOutcome::Skipped);
        };

        let ask = contract.ask.unwrap_or(0.0);
        let (qty, est_cost) = size_contracts(policy.max_premium_budget, ask);
        if est_cost > policy.max_premium_budget * 1.5 {
            let reason = BlockReason::PremiumOverBudget {
                cost: est_cost,
                budget: policy.max_premium_budget,
            };
            info!(ticker, strike = contract.strike, reason = %reason, "candidate blocked");
            let mut safety = services.safety.write().await;
            safety.journal.blocked(ticker, reason.to_string());
            return Ok(TickerOutcome::Journaled);
        }

        let symbol = occ_for_alpaca(ticker, today, kind, contract.strike);
        let spec = OrderSpec::market(
            &symbol,
            Decimal::from(qty),
            OrderSide::Buy,
            AssetClass::UsOption,
        );
        match services.broker.submit_order(&spec).await {
            Ok(receipt) => {
                info!(
                    ticker,
                    symbol = %symbol,
                    strike = contract.strike,
                    qty,
                    est_cost,
                    order_id = %receipt.order_id,
                    "contract order submitted"
                );
                let mut safety = services.safety.write().await;
                safety
                    .journal
                    .submitted(&symbol, OrderSide::Buy.as_str(), qty as f64, est_cost);
                safety.cooldowns.start(ticker, policy.cooldown_minutes);
                Ok(TickerOutcome::Entered)
            }
            Err(e) => {
                warn!(ticker, symbol = %symbol, error = %e, "order failed");
                let mut safety = services.safety.write().await;
                safety.journal.failed(&symbol, e.to_string());
                Ok(TickerOutcome::Journaled)
            }
        }
    }
}
