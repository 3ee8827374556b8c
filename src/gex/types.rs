//! Core data types for dealer gamma exposure (GEX) analysis.
//!
//! Everything here is ephemeral: contract lists are rebuilt from the vendor
//! snapshot on every analysis call, aggregates are derived and never mutated
//! after construction. Dollar amounts in this layer are plain `f64` since
//! they feed scoring heuristics, not order tickets.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Contract side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionKind {
    Call,
    Put,
}

impl std::fmt::Display for OptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptionKind::Call => write!(f, "CALL"),
            OptionKind::Put => write!(f, "PUT"),
        }
    }
}

/// One row of an options chain snapshot.
///
/// `gamma` is the vendor-supplied greek when available; when absent the
/// engine falls back to a Black-Scholes estimate from `implied_vol`.
/// Contracts carrying neither contribute nothing to the aggregation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionContract {
    pub strike: f64,
    pub kind: OptionKind,
    pub open_interest: u64,
    pub volume: u64,
    pub gamma: Option<f64>,
    pub implied_vol: Option<f64>,
    /// Best ask, used by the same-day contract selection step.
    pub ask: Option<f64>,
    pub expiration: NaiveDate,
}

/// Signed dollar gamma aggregated at one strike.
///
/// Invariant: `net_gex == call_gex + put_gex`. The call side carries the
/// dealer-positioning sign applied at accumulation time, so summing across
/// expirations is plain addition keyed on strike.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrikeAggregate {
    pub strike: f64,
    pub call_gex: f64,
    pub put_gex: f64,
    pub net_gex: f64,
    /// Expiration labels (YYYY-MM-DD) that contributed open interest here.
    pub expiries: BTreeSet<String>,
}

impl StrikeAggregate {
    pub fn new(strike: f64) -> Self {
        Self {
            strike,
            call_gex: 0.0,
            put_gex: 0.0,
            net_gex: 0.0,
            expiries: BTreeSet::new(),
        }
    }

    /// Number of distinct expirations contributing at this strike.
    pub fn expiry_count(&self) -> u32 {
        self.expiries.len() as u32
    }
}

/// Assumed dealer positioning, which decides the sign applied to each side.
///
/// The short-call/long-put assumption is the common heuristic for index and
/// mega-cap flow. It is a heuristic, so it stays configurable for the day a
/// data source supplies real dealer inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealerConvention {
    /// Dealers short calls (negated) and long puts (kept positive).
    ShortCallLongPut,
    /// Inverted book: long calls, short puts.
    LongCallShortPut,
}

impl DealerConvention {
    pub fn call_sign(&self) -> f64 {
        match self {
            DealerConvention::ShortCallLongPut => -1.0,
            DealerConvention::LongCallShortPut => 1.0,
        }
    }

    pub fn put_sign(&self) -> f64 {
        match self {
            DealerConvention::ShortCallLongPut => 1.0,
            DealerConvention::LongCallShortPut => -1.0,
        }
    }
}

impl Default for DealerConvention {
    fn default() -> Self {
        DealerConvention::ShortCallLongPut
    }
}

/// Market regime implied by aggregate dealer gamma.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegimeLabel {
    /// Dealers dampen moves (buy dips, sell rips).
    LongGamma,
    /// Dealer hedging amplifies moves.
    ShortGamma,
    /// Signal too small or too conflicted to call.
    MixedUncertain,
}

impl std::fmt::Display for RegimeLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegimeLabel::LongGamma => write!(f, "LONG GAMMA"),
            RegimeLabel::ShortGamma => write!(f, "SHORT GAMMA"),
            RegimeLabel::MixedUncertain => write!(f, "MIXED/UNCERTAIN"),
        }
    }
}

/// Regime call with a confidence in `[0, 1]`.
///
/// Confidence is exactly 0 whenever `|net_gex|` sits below the configured
/// floor, so a noise-level reading can never present as a confident regime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeClassification {
    pub label: RegimeLabel,
    pub confidence: f64,
    pub net_gex: f64,
}

/// A strike with outsized one-sided GEX concentration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wall {
    pub strike: f64,
    /// Side GEX at this strike (call side for call walls, put side for put walls).
    pub dollar_gex: f64,
    /// Signed distance from spot, in percent.
    pub distance_pct: f64,
    /// True when the strike is top-3 by magnitude on the same side in at
    /// least two independent expirations.
    pub stacked: bool,
    pub expiry_count: u32,
}

/// Ranked walls per side, strongest first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Walls {
    pub calls: Vec<Wall>,
    pub puts: Vec<Wall>,
}

impl Walls {
    /// Strongest call wall strike, if any.
    pub fn top_call_strike(&self) -> Option<f64> {
        self.calls.first().map(|w| w.strike)
    }

    /// Strongest put wall strike, if any.
    pub fn top_put_strike(&self) -> Option<f64> {
        self.puts.first().map(|w| w.strike)
    }
}

/// Full result of one multi-expiry GEX analysis pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GexAnalysis {
    pub ticker: String,
    pub spot: f64,
    pub total_net_gex: f64,
    pub regime: RegimeClassification,
    /// Price where cumulative net GEX flips sign, if one exists in range.
    pub gamma_flip: Option<f64>,
    /// Per-strike aggregates in ascending strike order.
    pub strikes: Vec<StrikeAggregate>,
    pub walls: Walls,
    /// Expirations that actually contributed (failed fetches are dropped).
    pub expiries_analyzed: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl GexAnalysis {
    /// Signed distance from spot to the gamma flip, in percent.
    pub fn flip_distance_pct(&self) -> Option<f64> {
        self.gamma_flip
            .filter(|_| self.spot > 0.0)
            .map(|flip| (flip - self.spot) / self.spot * 100.0)
    }
}

/// Tunables for the GEX engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GexConfig {
    /// Total |net GEX| below this is treated as no signal (confidence 0).
    pub min_abs_gex: f64,
    /// Regime confidence below this degrades the label to mixed/uncertain.
    pub min_confidence: f64,
    /// Strikes within this fraction of spot count double in the regime vote.
    pub atm_band_pct: f64,
    /// Walls reported per side, and the per-expiry list size used for stacking.
    pub wall_top_n: usize,
    /// Short-rate approximation for the Black-Scholes gamma fallback.
    pub risk_free_rate: f64,
    pub dealer_convention: DealerConvention,
}

impl Default for GexConfig {
    fn default() -> Self {
        Self {
            min_abs_gex: 50_000_000.0,
            min_confidence: 0.3,
            atm_band_pct: 0.02,
            wall_top_n: 3,
            risk_free_rate: 0.05,
            dealer_convention: DealerConvention::default(),
        }
    }
}
