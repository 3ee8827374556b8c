//! Safety Funnel Integration Tests
//!
//! Integration tests that verify the trading components work together:
//! 1. EquityLoop -> decision gates -> broker flow
//! 2. Options chain -> GexEngine gamma flip interpolation
//! 3. Operator actions (manual trade, dangerous mode) -> persistence
//! 4. ZeroDteLoop position monitor -> circuit breaker
//!
//! All tests are deterministic (no real network calls) and use the
//! scripted port mocks.

use std::sync::Arc;

use approx::assert_relative_eq;
use chrono::Utc;
use rust_decimal_macros::dec;

use gexbot::adapters::polygon::occ_for_alpaca;
use gexbot::application::{actions, CoreServices, EquityLoop, ManualTradeOutcome, SafetyState, ZeroDteLoop};
use gexbot::gex::{OptionContract, OptionKind, RegimeLabel};
use gexbot::ports::mocks::{
    neutral_technicals, option_position, MockBroker, MockMarketData, MockOptionsData, MockOracle,
    MockSentiment, MockState, MockTechnicals,
};
use gexbot::ports::{ChainSnapshot, OrderSide};

// ============================================================================
// Test Fixtures
// ============================================================================

/// Wire mock ports into the shared service context with autonomous
/// trading switched on.
fn services_with(
    broker: MockBroker,
    market_data: MockMarketData,
    options: MockOptionsData,
    oracle: MockOracle,
    symbols: &[&str],
) -> (Arc<MockBroker>, Arc<MockState>, Arc<CoreServices>) {
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
    let state = Arc::new(MockState::new());
    let services = Arc::new(CoreServices::new(
        Arc::clone(&broker) as Arc<dyn gexbot::ports::BrokerPort>,
        Arc::new(market_data),
        Arc::new(technicals),
        Arc::new(MockSentiment::new()),
        Arc::new(oracle),
        Arc::new(options),
        Arc::clone(&state) as Arc<dyn gexbot::ports::StatePort>,
        safety,
    ));
    (broker, state, services)
}

fn contract(
    strike: f64,
    kind: OptionKind,
    open_interest: u64,
    gamma: f64,
    expiration: chrono::NaiveDate,
) -> OptionContract {
    OptionContract {
        strike,
        kind,
        open_interest,
        volume: 1_000,
        gamma: Some(gamma),
        implied_vol: Some(0.2),
        ask: Some(1.0),
        expiration,
    }
}

// ============================================================================
// Equity funnel
// ============================================================================

#[tokio::test]
async fn low_confidence_verdict_never_reaches_the_broker() {
    let verdict = r#"{"action": "buy", "confidence": 0.3, "reasoning": "weak setup"}"#;
    let (broker, _state, services) = services_with(
        MockBroker::new(),
        MockMarketData::new(),
        MockOptionsData::new(),
        MockOracle::new().with_default_response(verdict),
        &["SPY"],
    );

    let eloop = EquityLoop::new(Arc::clone(&services), vec!["SPY".to_string()]);
    eloop.cycle().await.unwrap();

    assert!(broker.submitted().is_empty());
    let safety = services.safety.read().await;
    let entry = safety.journal.recent(1).next().unwrap();
    assert_eq!(entry.symbol, "SPY");
    assert!(entry.to_string().contains("BLOCKED"));
    assert!(entry
        .to_string()
        .contains("confidence 0.30 below floor 0.60"));
    assert!(!safety.cooldowns.is_active("SPY"));
}

#[tokio::test]
async fn manual_buy_flows_through_the_funnel_to_the_broker() {
    let (broker, state, services) = services_with(
        MockBroker::new(),
        MockMarketData::new().with_price("AAPL", 100.0),
        MockOptionsData::new(),
        MockOracle::new(),
        &[],
    );

    let outcome = actions::manual_trade(&services, "aapl", OrderSide::Buy, Some(2_000.0), false)
        .await
        .unwrap();
    match outcome {
        ManualTradeOutcome::Submitted { qty, notional, .. } => {
            assert_eq!(qty, dec!(20));
            assert!((notional - 2_000.0).abs() < 1e-9);
        }
        other => panic!("expected a submitted order, got {other}"),
    }

    let orders = broker.submitted();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].symbol, "AAPL");
    assert_eq!(orders[0].side, OrderSide::Buy);

    let safety = services.safety.read().await;
    assert!(safety.cooldowns.is_active("AAPL"));
    assert!(safety.journal.recent(1).next().unwrap().to_string().contains("SUBMITTED"));
    drop(safety);
    assert_eq!(state.save_count(), 1);
}

// ============================================================================
// GEX analytics
// ============================================================================

#[tokio::test]
async fn gamma_flip_interpolates_between_straddling_strikes() {
    let expiry = Utc::now().date_naive();
    // Dealers short the 598 calls and long the 602 puts, with the put
    // side carrying exactly twice the dollar gamma. The sign change gets
    // interpolated a third of the way up the gap.
    let chain = ChainSnapshot {
        underlying_price: Some(600.0),
        contracts: vec![
            contract(598.0, OptionKind::Call, 100_000, 0.05, expiry),
            contract(602.0, OptionKind::Put, 200_000, 0.05, expiry),
        ],
    };
    let options = MockOptionsData::new()
        .with_expirations("SPY", vec![expiry])
        .with_chain("SPY", expiry, chain);

    let (_broker, _state, services) = services_with(
        MockBroker::new(),
        MockMarketData::new(),
        options,
        MockOracle::new(),
        &[],
    );

    let analysis = actions::gex_snapshot(&services, "SPY", 1).await.unwrap();

    let flip = analysis.gamma_flip.expect("flip between the strikes");
    assert_relative_eq!(flip, 598.0 + 4.0 / 3.0, epsilon = 1e-9);
    assert_eq!(analysis.regime.label, RegimeLabel::LongGamma);
    assert_eq!(analysis.walls.top_call_strike(), Some(598.0));
    assert_eq!(analysis.walls.top_put_strike(), Some(602.0));
    assert_eq!(analysis.expiries_analyzed.len(), 1);
}

// ============================================================================
// Operator actions and persistence
// ============================================================================

#[tokio::test]
async fn dangerous_mode_round_trips_through_persistence() {
    let (_broker, state, services) = services_with(
        MockBroker::new(),
        MockMarketData::new(),
        MockOptionsData::new(),
        MockOracle::new(),
        &[],
    );

    assert!(actions::set_dangerous(&services, true).await.unwrap());
    assert!((services.policy().await.stop_loss_percent - 0.10).abs() < 1e-9);

    // A restart rebuilds the safety core from the last saved blob.
    let restored = SafetyState::from_persisted(state.last_saved().unwrap());
    assert!(restored.policy.is_dangerous());
    assert!((restored.policy.policy().stop_loss_percent - 0.10).abs() < 1e-9);

    let (_broker2, _state2, services2) = services_with(
        MockBroker::new(),
        MockMarketData::new(),
        MockOptionsData::new(),
        MockOracle::new(),
        &[],
    );
    {
        let mut safety = services2.safety.write().await;
        *safety = restored;
    }
    assert!(actions::set_dangerous(&services2, false).await.unwrap());
    let policy = services2.policy().await;
    assert!(!services2.safety.read().await.policy.is_dangerous());
    assert!((policy.stop_loss_percent - 0.05).abs() < 1e-9);
}

// ============================================================================
// Zero-DTE position monitor
// ============================================================================

#[tokio::test]
async fn breached_stop_loss_is_flattened_before_new_entries() {
    let today = Utc::now().date_naive();
    let occ = occ_for_alpaca("SPY", today, OptionKind::Call, 600.0);
    // Premium went from 1.50 to 0.60, a -60% move against a 5% stop.
    let broker = MockBroker::new().with_position(option_position(&occ, 2.0, 1.50, 0.60));

    let (broker, state, services) = services_with(
        broker,
        MockMarketData::new(),
        MockOptionsData::new(),
        MockOracle::new(),
        &[],
    );

    let zloop = ZeroDteLoop::new(Arc::clone(&services), vec!["SPY".to_string()]);
    zloop.cycle().await.unwrap();

    assert_eq!(broker.closed_symbols(), vec![occ]);
    let safety = services.safety.read().await;
    assert_eq!(safety.journal.len(), 1);
    let entry = safety.journal.recent(1).next().unwrap();
    assert!(entry.to_string().contains("CLOSED -60.00% (stop loss)"));
    assert_eq!(safety.breaker.status().consecutive_losses, 1);
    assert!(safety.cooldowns.is_active("SPY"));
    drop(safety);
    assert_eq!(state.save_count(), 1);
}
