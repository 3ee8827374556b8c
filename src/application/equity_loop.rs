//! Equity scan loop
//!
//! The fixed-interval funnel: gate the cycle, build candidates, evaluate
//! them one at a time, size and submit what survives. Candidate evaluation
//! is strictly sequential as backpressure against rate-limited upstreams;
//! only the technicals and sentiment fetches inside one candidate run
//! concurrently. A tick that lands while the previous cycle is still
//! running is skipped outright, never queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::evaluation::evaluate_equity_candidate;
use super::gates::{
    build_universe, candidate_gates, cycle_gates, daily_loss_gate, decision_gates,
    open_position_count, size_equity_order, BlockReason,
};
use super::CoreServices;
use crate::ports::broker::BrokerError;
use crate::ports::models::{AssetClass, OrderSpec};
use crate::ports::state::StateError;

#[derive(Error, Debug)]
pub enum CycleError {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    State(#[from] StateError),
}

/// The autonomous equity loop.
pub struct EquityLoop {
    services: Arc<CoreServices>,
    universe: Vec<String>,
    is_running: Arc<RwLock<bool>>,
    shutdown: Arc<AtomicBool>,
}

impl EquityLoop {
    pub fn new(services: Arc<CoreServices>, universe: Vec<String>) -> Self {
        Self {
            services,
            universe,
            is_running: Arc::new(RwLock::new(false)),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    /// Run until `stop`. Cycle failures are logged and the loop keeps
    /// ticking; only `stop` ends it.
    pub async fn run(&self) {
        {
            let mut running = self.is_running.write().await;
            *running = true;
        }

        let mut interval_secs = self.services.policy().await.scan_interval_seconds.max(1);
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs, "equity loop started");

        loop {
            ticker.tick().await;
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            match self.services.trade_lock.try_lock() {
                Ok(_guard) => {
                    if let Err(e) = self.cycle().await {
                        error!(error = %e, "scan cycle failed");
                    }
                }
                Err(_) => {
                    warn!("previous cycle still running, skipping tick");
                }
            }

            let configured = self.services.policy().await.scan_interval_seconds.max(1);
            if configured != interval_secs {
                interval_secs = configured;
                ticker = tokio::time::interval(Duration::from_secs(interval_secs));
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                info!(interval_secs, "scan interval updated");
            }
        }

        {
            let mut running = self.is_running.write().await;
            *running = false;
        }
        info!("equity loop stopped");
    }

    pub async fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        info!("equity loop stop requested");
    }

    /// One pass of the funnel.
    pub async fn cycle(&self) -> Result<(), CycleError> {
        let services = &self.services;

        // Cheap local gates before any API call.
        let policy = {
            let mut safety = services.safety.write().await;
            safety.cooldowns.prune();
            if !safety.policy.policy().autonomous_enabled {
                debug!("autonomous trading disabled, skipping cycle");
                return Ok(());
            }
            if let Err(e) = safety.breaker.ensure_can_trade() {
                info!(reason = %e, "circuit breaker paused, skipping cycle");
                return Ok(());
            }
            safety.policy.policy().clone()
        };

        let clock = services.broker.clock().await?;
        let account = services.broker.account().await?;
        let positions = services.broker.positions().await?;
        let open_count = open_position_count(&positions);

        {
            let safety = services.safety.read().await;
            if let Err(reason) = cycle_gates(&policy, &safety.breaker, &clock, open_count) {
                match reason {
                    BlockReason::MarketClosed => debug!("market closed, skipping cycle"),
                    BlockReason::AtMaxPositions { open, max } => {
                        debug!(open, max, "at position cap, skipping cycle")
                    }
                    other => info!(reason = %other, "cycle blocked"),
                }
                return Ok(());
            }
        }

        match daily_loss_gate(&policy, &account) {
            Ok(Some(change)) => {
                let mood = services.safety.read().await.journal.mood();
                debug!(
                    daily_change_pct = change * 100.0,
                    mood = %mood,
                    "daily drawdown within limit"
                );
            }
            Ok(None) => {
                warn!("daily change unavailable, trading on (fail-open)");
            }
            Err(reason) => {
                warn!(reason = %reason, "halting entries for the day");
                return Ok(());
            }
        }

        let candidates = build_universe(&policy, &self.universe);
        let cash = account.cash.to_f64().unwrap_or(0.0);
        let mut entered = 0usize;
        let mut dirty = false;

        for symbol in &candidates {
            // Cooperative cancellation: a disable or stop mid-cycle must not
            // abort an order already in flight, but no further candidate
            // starts.
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

            {
                let safety = services.safety.read().await;
                if let Err(reason) =
                    candidate_gates(symbol, &positions, &safety.cooldowns, Utc::now())
                {
                    debug!(symbol, reason = %reason, "candidate skipped");
                    continue;
                }
            }

            let eval = evaluate_equity_candidate(
                services.technicals.as_ref(),
                services.sentiment.as_ref(),
                services.oracle.as_ref(),
                symbol,
            )
            .await;
            debug!(
                symbol,
                action = %eval.decision.action,
                confidence = eval.decision.confidence,
                reasoning = %eval.decision.reasoning,
                "oracle verdict"
            );

            let side = match decision_gates(&policy, &eval.decision) {
                Ok(side) => side,
                Err(reason @ BlockReason::OracleHold) => {
                    debug!(symbol, reason = %reason, "no trade");
                    continue;
                }
                Err(reason) => {
                    info!(symbol, reason = %reason, "candidate blocked");
                    let mut safety = services.safety.write().await;
                    safety.journal.blocked(symbol, reason.to_string());
                    dirty = true;
                    continue;
                }
            };

            let notional = match size_equity_order(&policy, cash) {
                Ok(n) => n,
                Err(reason) => {
                    info!(symbol, reason = %reason, "candidate blocked");
                    let mut safety = services.safety.write().await;
                    safety.journal.blocked(symbol, reason.to_string());
                    dirty = true;
                    continue;
                }
            };

            let price = match eval.technicals.as_ref().map(|t| t.price) {
                Some(p) if p > 0.0 => p,
                _ => match services.market_data.latest_price(symbol).await {
                    Ok(p) if p > 0.0 => p,
                    Ok(_) | Err(_) => {
                        warn!(symbol, "no usable price, skipping");
                        continue;
                    }
                },
            };
            let qty = Decimal::from_f64(notional / price)
                .unwrap_or_default()
                .round_dp(3);
            if qty <= Decimal::ZERO {
                warn!(symbol, notional, price, "sized to zero quantity, skipping");
                continue;
            }

            let spec = OrderSpec::market(symbol, qty, side, AssetClass::UsEquity);
            match services.broker.submit_order(&spec).await {
                Ok(receipt) => {
                    info!(
                        symbol,
                        side = %side,
                        %qty,
                        notional,
                        order_id = %receipt.order_id,
                        "order submitted"
                    );
                    let mut safety = services.safety.write().await;
                    safety.journal.submitted(
                        symbol,
                        side.as_str(),
                        qty.to_f64().unwrap_or(0.0),
                        notional,
                    );
                    safety.cooldowns.start(symbol, policy.cooldown_minutes);
                    entered += 1;
                    dirty = true;
                }
                Err(e) => {
                    // No cooldown on failure: the symbol stays eligible for
                    // the next cycle.
                    warn!(symbol, error = %e, "order failed");
                    let mut safety = services.safety.write().await;
                    safety.journal.failed(symbol, e.to_string());
                    dirty = true;
                }
            }
        }

        if dirty {
            services.persist().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::SafetyState;
    use crate::ports::mocks::{
        equity_position, neutral_technicals, MockBroker, MockMarketData, MockOptionsData,
        MockOracle, MockSentiment, MockState, MockTechnicals,
    };
    use crate::ports::models::OrderSide;
    use rust_decimal_macros::dec;

    const BUY_90: &str = r#"{"action": "buy", "confidence": 0.9, "reasoning": "strong"}"#;
    const SELL_90: &str = r#"{"action": "sell", "confidence": 0.9, "reasoning": "weak"}"#;
    const BUY_30: &str = r#"{"action": "buy", "confidence": 0.3, "reasoning": "meh"}"#;
    const HOLD: &str = r#"{"action": "hold", "confidence": 0.7, "reasoning": "flat"}"#;

    struct Harness {
        broker: Arc<MockBroker>,
        oracle: Arc<MockOracle>,
        state: Arc<MockState>,
        services: Arc<CoreServices>,
    }

    fn harness(broker: MockBroker, oracle: MockOracle, symbols: &[&str]) -> Harness {
        let mut safety = SafetyState::fresh();
        safety
            .policy
            .set_key("autonomous_enabled", "true")
            .unwrap();

        let mut technicals = MockTechnicals::new();
        for symbol in symbols {
            technicals = technicals.with_snapshot(neutral_technicals(symbol, 100.0));
        }

        let broker = Arc::new(broker);
        let oracle = Arc::new(oracle);
        let state = Arc::new(MockState::new());
        let services = Arc::new(CoreServices::new(
            Arc::clone(&broker) as Arc<dyn crate::ports::broker::BrokerPort>,
            Arc::new(MockMarketData::new()),
            Arc::new(technicals),
            Arc::new(MockSentiment::new()),
            Arc::clone(&oracle) as Arc<dyn crate::ports::oracle::DecisionOraclePort>,
            Arc::new(MockOptionsData::new()),
            Arc::clone(&state) as Arc<dyn crate::ports::state::StatePort>,
            safety,
        ));
        Harness {
            broker,
            oracle,
            state,
            services,
        }
    }

    fn loop_over(h: &Harness, symbols: &[&str]) -> EquityLoop {
        let universe = symbols.iter().map(|s| s.to_string()).collect();
        EquityLoop::new(Arc::clone(&h.services), universe)
    }

    #[tokio::test]
    async fn confident_buy_submits_sized_order_and_starts_cooldown() {
        let h = harness(
            MockBroker::new(),
            MockOracle::new().with_response(BUY_90).with_default_response(HOLD),
            &["AAPL", "MSFT"],
        );
        let eloop = loop_over(&h, &["AAPL", "MSFT"]);
        eloop.cycle().await.unwrap();

        let orders = h.broker.submitted();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].symbol, "AAPL");
        assert_eq!(orders[0].side, OrderSide::Buy);
        // 5% of 100k cash is 5000, at $100 a share.
        assert_eq!(orders[0].qty, dec!(50));

        let safety = h.services.safety.read().await;
        assert!(safety.cooldowns.is_active("AAPL"));
        assert!(!safety.cooldowns.is_active("MSFT"));
        assert_eq!(safety.journal.len(), 1);
        drop(safety);
        assert_eq!(h.state.save_count(), 1);
    }

    #[tokio::test]
    async fn low_confidence_is_journaled_blocked_with_no_order() {
        let h = harness(
            MockBroker::new(),
            MockOracle::new().with_default_response(BUY_30),
            &["AAPL"],
        );
        let eloop = loop_over(&h, &["AAPL"]);
        eloop.cycle().await.unwrap();

        assert!(h.broker.submitted().is_empty());
        let safety = h.services.safety.read().await;
        let entry = safety.journal.recent(1).next().unwrap();
        assert_eq!(entry.symbol, "AAPL");
        assert!(entry.to_string().contains("BLOCKED"));
        assert!(entry.to_string().contains("confidence 0.30 below floor 0.60"));
        assert!(!safety.cooldowns.is_active("AAPL"));
    }

    #[tokio::test]
    async fn hold_verdict_skips_without_journaling() {
        let h = harness(
            MockBroker::new(),
            MockOracle::new().with_default_response(HOLD),
            &["AAPL"],
        );
        let eloop = loop_over(&h, &["AAPL"]);
        eloop.cycle().await.unwrap();

        assert!(h.broker.submitted().is_empty());
        let safety = h.services.safety.read().await;
        assert!(safety.journal.is_empty());
        drop(safety);
        assert_eq!(h.state.save_count(), 0);
    }

    #[tokio::test]
    async fn sell_verdict_blocked_while_shorting_disabled() {
        let h = harness(
            MockBroker::new(),
            MockOracle::new().with_default_response(SELL_90),
            &["AAPL"],
        );
        let eloop = loop_over(&h, &["AAPL"]);
        eloop.cycle().await.unwrap();

        assert!(h.broker.submitted().is_empty());
        let safety = h.services.safety.read().await;
        let entry = safety.journal.recent(1).next().unwrap();
        assert!(entry.to_string().contains("shorting disabled"));
    }

    #[tokio::test]
    async fn sell_goes_out_when_shorting_enabled() {
        let h = harness(
            MockBroker::new(),
            MockOracle::new().with_default_response(SELL_90),
            &["AAPL"],
        );
        h.services
            .safety
            .write()
            .await
            .policy
            .set_key("allow_shorting", "true")
            .unwrap();
        let eloop = loop_over(&h, &["AAPL"]);
        eloop.cycle().await.unwrap();

        let orders = h.broker.submitted();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].side, OrderSide::Sell);
    }

    #[tokio::test]
    async fn held_symbols_never_reach_the_oracle() {
        let h = harness(
            MockBroker::new().with_position(equity_position("AAPL", 10.0, 90.0, 100.0)),
            MockOracle::new().with_default_response(HOLD),
            &["AAPL", "MSFT"],
        );
        let eloop = loop_over(&h, &["AAPL", "MSFT"]);
        eloop.cycle().await.unwrap();

        let prompts = h.oracle.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].1.contains("Symbol: MSFT"));
    }

    #[tokio::test]
    async fn disabled_policy_does_nothing() {
        let h = harness(
            MockBroker::new(),
            MockOracle::new().with_default_response(BUY_90),
            &["AAPL"],
        );
        h.services
            .safety
            .write()
            .await
            .policy
            .set_key("autonomous_enabled", "false")
            .unwrap();
        let eloop = loop_over(&h, &["AAPL"]);
        eloop.cycle().await.unwrap();
        assert!(h.broker.submitted().is_empty());
    }

    #[tokio::test]
    async fn tripped_breaker_stops_the_cycle_cold() {
        let h = harness(
            MockBroker::new(),
            MockOracle::new().with_default_response(BUY_90),
            &["AAPL"],
        );
        {
            let mut safety = h.services.safety.write().await;
            for _ in 0..3 {
                safety.breaker.record_outcome("SPY", -1.0);
            }
        }
        let eloop = loop_over(&h, &["AAPL"]);
        eloop.cycle().await.unwrap();
        assert!(h.broker.submitted().is_empty());
    }

    #[tokio::test]
    async fn closed_market_blocks_unless_crypto_enabled() {
        let h = harness(
            MockBroker::new().with_market_open(false),
            MockOracle::new().with_default_response(BUY_90),
            &["AAPL"],
        );
        let eloop = loop_over(&h, &["AAPL"]);
        eloop.cycle().await.unwrap();
        assert!(h.broker.submitted().is_empty());

        h.services
            .safety
            .write()
            .await
            .policy
            .set_key("crypto_enabled", "true")
            .unwrap();
        eloop.cycle().await.unwrap();
        assert_eq!(h.broker.submitted().len(), 1);
    }

    #[tokio::test]
    async fn daily_loss_breach_halts_entries() {
        let h = harness(
            MockBroker::new()
                .with_account(dec!(95_000), dec!(95_000))
                .with_last_equity(dec!(100_000)),
            MockOracle::new().with_default_response(BUY_90),
            &["AAPL"],
        );
        let eloop = loop_over(&h, &["AAPL"]);
        eloop.cycle().await.unwrap();
        assert!(h.broker.submitted().is_empty());
    }

    #[tokio::test]
    async fn position_cap_stops_entries_mid_cycle() {
        let h = harness(
            MockBroker::new(),
            MockOracle::new().with_default_response(BUY_90),
            &["A", "B", "C"],
        );
        h.services
            .safety
            .write()
            .await
            .policy
            .set_key("max_positions", "2")
            .unwrap();
        let eloop = loop_over(&h, &["A", "B", "C"]);
        eloop.cycle().await.unwrap();
        // Two entries fill the cap; the third candidate never evaluates.
        assert_eq!(h.broker.submitted().len(), 2);
    }

    #[tokio::test]
    async fn cooldown_blocks_reentry() {
        let h = harness(
            MockBroker::new(),
            MockOracle::new().with_default_response(BUY_90),
            &["AAPL"],
        );
        h.services.safety.write().await.cooldowns.start("AAPL", 60);
        let eloop = loop_over(&h, &["AAPL"]);
        eloop.cycle().await.unwrap();
        assert!(h.broker.submitted().is_empty());
    }

    #[tokio::test]
    async fn broker_failure_is_journaled_without_cooldown() {
        let h = harness(
            MockBroker::new().with_submit_failure("wash trade detected"),
            MockOracle::new().with_default_response(BUY_90),
            &["AAPL"],
        );
        let eloop = loop_over(&h, &["AAPL"]);
        eloop.cycle().await.unwrap();

        let safety = h.services.safety.read().await;
        let entry = safety.journal.recent(1).next().unwrap();
        assert!(entry.to_string().contains("FAILED"));
        assert!(entry.to_string().contains("wash trade detected"));
        assert!(!safety.cooldowns.is_active("AAPL"));
    }
}
