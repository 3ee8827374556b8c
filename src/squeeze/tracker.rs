//! Gamma squeeze state machine.
//!
//! One tracker per symbol, held in-memory for the life of the process.
//! Transitions are a pure function of (previous state, new composite score,
//! wall-shift detection), evaluated once per analysis pass. Score decay can
//! walk a squeeze back down through `unwinding`, but nothing here pauses
//! trading; the conviction multiplier is advisory for other consumers.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::gex::types::GexAnalysis;

use super::score::{composite_score, PriceSample, ScoreBreakdown};

/// Score at which a quiet tape starts building.
pub const BUILDING_THRESHOLD: f64 = 40.0;
/// Score at which a building squeeze goes active.
pub const ACTIVE_THRESHOLD: f64 = 65.0;
/// Score at which an active squeeze escalates on its own.
pub const KNIFE_THRESHOLD: f64 = 85.0;
/// Building falls back to normal below this.
pub const BUILDING_EXIT: f64 = 24.0;
/// Active squeeze decays into unwinding below this.
pub const ACTIVE_EXIT: f64 = 45.5;
/// Knife fight decays into unwinding below this.
pub const KNIFE_EXIT: f64 = 65.0;
/// Unwinding settles back to normal below this.
pub const UNWINDING_EXIT: f64 = 16.0;
/// Spot within this percent of both walls counts as pincered.
pub const PINCER_DISTANCE_PCT: f64 = 0.5;
/// History entries kept per tracker.
pub const HISTORY_CAP: usize = 50;

/// Squeeze lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqueezeState {
    Normal,
    Building,
    ActiveSqueeze,
    KnifeFight,
    Unwinding,
}

impl SqueezeState {
    /// Advisory conviction-boost multiplier for downstream signal consumers.
    /// Never a gate: execution decisions must not key off this value alone.
    pub fn conviction_multiplier(&self) -> f64 {
        match self {
            SqueezeState::Normal => 0.0,
            SqueezeState::Building => 1.0,
            SqueezeState::ActiveSqueeze => 2.0,
            SqueezeState::KnifeFight => 3.0,
            SqueezeState::Unwinding => 0.5,
        }
    }
}

impl std::fmt::Display for SqueezeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqueezeState::Normal => write!(f, "normal"),
            SqueezeState::Building => write!(f, "building"),
            SqueezeState::ActiveSqueeze => write!(f, "active_squeeze"),
            SqueezeState::KnifeFight => write!(f, "knife_fight"),
            SqueezeState::Unwinding => write!(f, "unwinding"),
        }
    }
}

/// One history entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreSnapshot {
    pub score: f64,
    pub state: SqueezeState,
    pub timestamp: DateTime<Utc>,
}

/// Result of one tracker update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqueezeUpdate {
    pub symbol: String,
    pub previous_state: SqueezeState,
    pub state: SqueezeState,
    pub breakdown: ScoreBreakdown,
    pub wall_shift: bool,
    pub timestamp: DateTime<Utc>,
}

impl SqueezeUpdate {
    pub fn transitioned(&self) -> bool {
        self.previous_state != self.state
    }
}

/// Pure transition function for the squeeze state machine.
///
/// A simultaneous wall shift can force `building`/`active_squeeze` straight
/// into `knife_fight` regardless of score; every other edge is score-driven.
pub fn next_state(current: SqueezeState, score: f64, wall_shift: bool) -> SqueezeState {
    match current {
        SqueezeState::Normal => {
            if score >= BUILDING_THRESHOLD {
                SqueezeState::Building
            } else {
                SqueezeState::Normal
            }
        }
        SqueezeState::Building => {
            if wall_shift {
                SqueezeState::KnifeFight
            } else if score >= ACTIVE_THRESHOLD {
                SqueezeState::ActiveSqueeze
            } else if score < BUILDING_EXIT {
                SqueezeState::Normal
            } else {
                SqueezeState::Building
            }
        }
        SqueezeState::ActiveSqueeze => {
            if wall_shift || score >= KNIFE_THRESHOLD {
                SqueezeState::KnifeFight
            } else if score < ACTIVE_EXIT {
                SqueezeState::Unwinding
            } else {
                SqueezeState::ActiveSqueeze
            }
        }
        SqueezeState::KnifeFight => {
            if score < KNIFE_EXIT {
                SqueezeState::Unwinding
            } else {
                SqueezeState::KnifeFight
            }
        }
        SqueezeState::Unwinding => {
            if score >= BUILDING_THRESHOLD {
                SqueezeState::Building
            } else if score < UNWINDING_EXIT {
                SqueezeState::Normal
            } else {
                SqueezeState::Unwinding
            }
        }
    }
}

/// Per-symbol squeeze tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqueezeTracker {
    pub symbol: String,
    pub state: SqueezeState,
    pub score: f64,
    pub history: VecDeque<ScoreSnapshot>,
    last_call_wall: Option<f64>,
    last_put_wall: Option<f64>,
    last_flip: Option<f64>,
}

impl SqueezeTracker {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            state: SqueezeState::Normal,
            score: 0.0,
            history: VecDeque::with_capacity(HISTORY_CAP),
            last_call_wall: None,
            last_put_wall: None,
            last_flip: None,
        }
    }

    /// Both top walls moved at once, or spot is pincered within
    /// `PINCER_DISTANCE_PCT` of both. Either reading marks the dealer
    /// hedging map as unstable.
    fn detect_wall_shift(&self, analysis: &GexAnalysis) -> bool {
        let call = analysis.walls.top_call_strike();
        let put = analysis.walls.top_put_strike();

        let both_moved = match (self.last_call_wall, self.last_put_wall, call, put) {
            (Some(prev_call), Some(prev_put), Some(new_call), Some(new_put)) => {
                prev_call != new_call && prev_put != new_put
            }
            _ => false,
        };

        let pincered = match (call, put) {
            (Some(call), Some(put)) if analysis.spot > 0.0 => {
                let call_dist = (call - analysis.spot).abs() / analysis.spot * 100.0;
                let put_dist = (put - analysis.spot).abs() / analysis.spot * 100.0;
                call_dist <= PINCER_DISTANCE_PCT && put_dist <= PINCER_DISTANCE_PCT
            }
            _ => false,
        };

        both_moved || pincered
    }

    /// Score the new analysis, advance the state machine, and record history.
    pub fn update(
        &mut self,
        analysis: &GexAnalysis,
        samples: &[PriceSample],
        now: DateTime<Utc>,
    ) -> SqueezeUpdate {
        let breakdown = composite_score(&analysis.regime, analysis.spot, analysis.gamma_flip, samples);
        let wall_shift = self.detect_wall_shift(analysis);
        let previous_state = self.state;
        let state = next_state(previous_state, breakdown.total, wall_shift);

        self.state = state;
        self.score = breakdown.total;
        self.last_call_wall = analysis.walls.top_call_strike();
        self.last_put_wall = analysis.walls.top_put_strike();
        self.last_flip = analysis.gamma_flip;

        self.history.push_back(ScoreSnapshot {
            score: breakdown.total,
            state,
            timestamp: now,
        });
        while self.history.len() > HISTORY_CAP {
            self.history.pop_front();
        }

        let update = SqueezeUpdate {
            symbol: self.symbol.clone(),
            previous_state,
            state,
            breakdown,
            wall_shift,
            timestamp: now,
        };
        if update.transitioned() {
            info!(
                symbol = %self.symbol,
                from = %previous_state,
                to = %state,
                score = breakdown.total,
                wall_shift,
                "squeeze state transition"
            );
        }
        update
    }

    pub fn conviction_multiplier(&self) -> f64 {
        self.state.conviction_multiplier()
    }

    pub fn last_flip(&self) -> Option<f64> {
        self.last_flip
    }

    pub fn last_walls(&self) -> (Option<f64>, Option<f64>) {
        (self.last_call_wall, self.last_put_wall)
    }
}

/// All per-symbol trackers, keyed by ticker. Single writer per cycle.
#[derive(Debug, Default)]
pub struct SqueezeRegistry {
    trackers: HashMap<String, SqueezeTracker>,
}

impl SqueezeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, symbol: &str) -> Option<&SqueezeTracker> {
        self.trackers.get(symbol)
    }

    /// Run one analysis pass through the symbol's tracker, creating it on
    /// first sight.
    pub fn update(
        &mut self,
        symbol: &str,
        analysis: &GexAnalysis,
        samples: &[PriceSample],
        now: DateTime<Utc>,
    ) -> SqueezeUpdate {
        self.trackers
            .entry(symbol.to_string())
            .or_insert_with(|| SqueezeTracker::new(symbol))
            .update(analysis, samples, now)
    }

    /// Current (state, score) per tracked symbol, for status rendering.
    pub fn states(&self) -> Vec<(String, SqueezeState, f64)> {
        let mut out: Vec<_> = self
            .trackers
            .values()
            .map(|t| (t.symbol.clone(), t.state, t.score))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gex::types::{
        RegimeClassification, RegimeLabel, Wall, Walls,
    };

    fn analysis(
        spot: f64,
        confidence: f64,
        flip: Option<f64>,
        call_wall: Option<f64>,
        put_wall: Option<f64>,
    ) -> GexAnalysis {
        let wall = |strike: f64, side: f64| Wall {
            strike,
            dollar_gex: side,
            distance_pct: (strike - spot) / spot * 100.0,
            stacked: false,
            expiry_count: 1,
        };
        GexAnalysis {
            ticker: "SPY".into(),
            spot,
            total_net_gex: -6e8,
            regime: RegimeClassification {
                label: RegimeLabel::ShortGamma,
                confidence,
                net_gex: -6e8,
            },
            gamma_flip: flip,
            strikes: vec![],
            walls: Walls {
                calls: call_wall.map(|s| vec![wall(s, -5e8)]).unwrap_or_default(),
                puts: put_wall.map(|s| vec![wall(s, 4e8)]).unwrap_or_default(),
            },
            expiries_analyzed: vec!["2025-06-20".into()],
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn transition_table_from_normal() {
        assert_eq!(next_state(SqueezeState::Normal, 39.9, false), SqueezeState::Normal);
        assert_eq!(next_state(SqueezeState::Normal, 40.0, false), SqueezeState::Building);
        // Normal ignores wall shifts.
        assert_eq!(next_state(SqueezeState::Normal, 10.0, true), SqueezeState::Normal);
    }

    #[test]
    fn transition_table_from_building() {
        assert_eq!(next_state(SqueezeState::Building, 50.0, true), SqueezeState::KnifeFight);
        assert_eq!(next_state(SqueezeState::Building, 65.0, false), SqueezeState::ActiveSqueeze);
        assert_eq!(next_state(SqueezeState::Building, 23.9, false), SqueezeState::Normal);
        assert_eq!(next_state(SqueezeState::Building, 24.0, false), SqueezeState::Building);
    }

    #[test]
    fn transition_table_from_active() {
        assert_eq!(next_state(SqueezeState::ActiveSqueeze, 50.0, true), SqueezeState::KnifeFight);
        assert_eq!(next_state(SqueezeState::ActiveSqueeze, 85.0, false), SqueezeState::KnifeFight);
        assert_eq!(next_state(SqueezeState::ActiveSqueeze, 45.4, false), SqueezeState::Unwinding);
        assert_eq!(
            next_state(SqueezeState::ActiveSqueeze, 45.5, false),
            SqueezeState::ActiveSqueeze
        );
    }

    #[test]
    fn transition_table_from_knife_and_unwinding() {
        assert_eq!(next_state(SqueezeState::KnifeFight, 64.9, false), SqueezeState::Unwinding);
        assert_eq!(next_state(SqueezeState::KnifeFight, 65.0, false), SqueezeState::KnifeFight);
        // Knife fight does not escalate further on wall shifts.
        assert_eq!(next_state(SqueezeState::KnifeFight, 70.0, true), SqueezeState::KnifeFight);

        assert_eq!(next_state(SqueezeState::Unwinding, 40.0, false), SqueezeState::Building);
        assert_eq!(next_state(SqueezeState::Unwinding, 15.9, false), SqueezeState::Normal);
        assert_eq!(next_state(SqueezeState::Unwinding, 20.0, false), SqueezeState::Unwinding);
    }

    #[test]
    fn increasing_scores_enter_building_only_past_threshold() {
        let mut tracker = SqueezeTracker::new("SPY");
        let now = Utc::now();

        // Regime component is 50 x confidence, so confidence drives the score.
        for confidence in [0.2, 0.4, 0.6, 0.79] {
            let update = tracker.update(&analysis(600.0, confidence, None, None, None), &[], now);
            assert_eq!(update.state, SqueezeState::Normal, "conf {confidence}");
        }
        let update = tracker.update(&analysis(600.0, 0.8, None, None, None), &[], now);
        assert_eq!(update.state, SqueezeState::Building);
        assert!(update.transitioned());
    }

    #[test]
    fn wall_shift_forces_knife_fight_from_building() {
        let mut tracker = SqueezeTracker::new("SPY");
        let now = Utc::now();

        tracker.update(&analysis(600.0, 0.9, None, Some(605.0), Some(595.0)), &[], now);
        assert_eq!(tracker.state, SqueezeState::Building);

        // Both walls move at once; score alone would have stayed building.
        let update =
            tracker.update(&analysis(600.0, 0.9, None, Some(610.0), Some(590.0)), &[], now);
        assert!(update.wall_shift);
        assert_eq!(update.state, SqueezeState::KnifeFight);
    }

    #[test]
    fn pincered_spot_counts_as_wall_shift() {
        let mut tracker = SqueezeTracker::new("SPY");
        let now = Utc::now();
        tracker.update(&analysis(600.0, 0.9, None, Some(601.0), Some(598.0)), &[], now);
        assert_eq!(tracker.state, SqueezeState::Building);

        // Walls unchanged but spot sits within 0.5% of both.
        let update =
            tracker.update(&analysis(600.0, 0.9, None, Some(601.0), Some(598.0)), &[], now);
        assert!(update.wall_shift);
        assert_eq!(update.state, SqueezeState::KnifeFight);
    }

    #[test]
    fn single_wall_move_is_not_a_shift() {
        let mut tracker = SqueezeTracker::new("SPY");
        let now = Utc::now();
        tracker.update(&analysis(600.0, 0.9, None, Some(605.0), Some(595.0)), &[], now);

        let update =
            tracker.update(&analysis(600.0, 0.9, None, Some(610.0), Some(595.0)), &[], now);
        assert!(!update.wall_shift);
        assert_eq!(update.state, SqueezeState::Building);
    }

    #[test]
    fn history_ring_caps_at_fifty() {
        let mut tracker = SqueezeTracker::new("SPY");
        let now = Utc::now();
        for _ in 0..60 {
            tracker.update(&analysis(600.0, 0.5, None, None, None), &[], now);
        }
        assert_eq!(tracker.history.len(), HISTORY_CAP);
    }

    #[test]
    fn conviction_multipliers_by_state() {
        assert_eq!(SqueezeState::Normal.conviction_multiplier(), 0.0);
        assert_eq!(SqueezeState::Building.conviction_multiplier(), 1.0);
        assert_eq!(SqueezeState::ActiveSqueeze.conviction_multiplier(), 2.0);
        assert_eq!(SqueezeState::KnifeFight.conviction_multiplier(), 3.0);
        assert_eq!(SqueezeState::Unwinding.conviction_multiplier(), 0.5);
    }

    #[test]
    fn registry_tracks_symbols_independently() {
        let mut registry = SqueezeRegistry::new();
        let now = Utc::now();

        registry.update("SPY", &analysis(600.0, 0.9, None, None, None), &[], now);
        registry.update("QQQ", &analysis(500.0, 0.1, None, None, None), &[], now);

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("SPY").map(|t| t.state), Some(SqueezeState::Building));
        assert_eq!(registry.get("QQQ").map(|t| t.state), Some(SqueezeState::Normal));
        assert!(registry.get("AAPL").is_none());
    }
}
