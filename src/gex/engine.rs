//! Dealer gamma exposure engine.
//!
//! Turns raw chain snapshots into per-strike signed dollar gamma, a regime
//! classification, the gamma-flip price, and ranked walls. The multi-expiry
//! `analyze` entry point fetches independent expirations concurrently and
//! tolerates partial failures: a missing expiry is dropped, never retried
//! inline, and the analysis fails only when every expiry failed.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::warn;

use crate::ports::options_data::{ChainSnapshot, OptionsDataError, OptionsDataPort};

use super::greeks;
use super::types::{
    GexAnalysis, GexConfig, OptionContract, OptionKind, RegimeClassification, RegimeLabel,
    StrikeAggregate, Wall, Walls,
};

/// Shares per contract.
const CONTRACT_MULTIPLIER: f64 = 100.0;

/// Dollar gamma is quoted per 1% move in the underlying.
const PCT_MOVE: f64 = 0.01;

/// Expiration label format used in aggregates and reports.
const EXPIRY_LABEL: &str = "%Y-%m-%d";

#[derive(Debug, Error)]
pub enum GexError {
    #[error("no expirations requested for {ticker}")]
    NoExpirations { ticker: String },

    #[error("all requested expirations failed for {ticker}")]
    AllExpiriesFailed { ticker: String },

    #[error("no strikes with open interest for {ticker}")]
    InsufficientData { ticker: String },

    #[error("options data error: {0}")]
    Data(#[from] OptionsDataError),
}

/// Strikes are keyed at tenth-of-a-cent resolution for exact accumulation.
fn strike_key(strike: f64) -> i64 {
    (strike * 1000.0).round() as i64
}

fn expiry_label(date: NaiveDate) -> String {
    date.format(EXPIRY_LABEL).to_string()
}

/// Gamma for one contract: vendor value when usable, Black-Scholes from
/// implied vol otherwise. `None` means the contract contributes nothing.
fn resolve_gamma(
    contract: &OptionContract,
    spot: f64,
    now: DateTime<Utc>,
    config: &GexConfig,
) -> Option<f64> {
    if let Some(gamma) = contract.gamma {
        if gamma.is_finite() && gamma >= 0.0 {
            return Some(gamma);
        }
    }
    let iv = contract.implied_vol?;
    let t = greeks::time_to_expiry_years(contract.expiration, now);
    greeks::bs_gamma(spot, contract.strike, iv, t, config.risk_free_rate)
}

/// Aggregate signed dollar gamma per strike, ascending by strike.
///
/// Per contract: `gamma x open_interest x 100 x spot^2 x 0.01`, with the
/// dealer-convention sign applied by side. Contracts without open interest
/// or without a resolvable gamma are skipped.
pub fn compute_strike_gex(
    contracts: &[OptionContract],
    spot: f64,
    now: DateTime<Utc>,
    config: &GexConfig,
) -> Vec<StrikeAggregate> {
    let mut by_strike: BTreeMap<i64, StrikeAggregate> = BTreeMap::new();

    for contract in contracts {
        if contract.open_interest == 0 {
            continue;
        }
        let gamma = match resolve_gamma(contract, spot, now, config) {
            Some(g) => g,
            None => continue,
        };

        let dollar_gamma =
            gamma * contract.open_interest as f64 * CONTRACT_MULTIPLIER * spot * spot * PCT_MOVE;

        let entry = by_strike
            .entry(strike_key(contract.strike))
            .or_insert_with(|| StrikeAggregate::new(contract.strike));

        match contract.kind {
            OptionKind::Call => {
                entry.call_gex += dollar_gamma * config.dealer_convention.call_sign()
            }
            OptionKind::Put => entry.put_gex += dollar_gamma * config.dealer_convention.put_sign(),
        }
        entry.expiries.insert(expiry_label(contract.expiration));
    }

    by_strike
        .into_values()
        .map(|mut agg| {
            agg.net_gex = agg.call_gex + agg.put_gex;
            agg
        })
        .collect()
}

/// Price where per-strike net GEX crosses zero, by linear interpolation
/// between the adjacent sign-change pair nearest spot.
///
/// Net GEX is not monotonic across strikes, so several crossings can exist;
/// the one closest to spot wins. Returns `None` when no strict sign change
/// exists in the observed range (never extrapolates).
pub fn find_gamma_flip(strikes: &[StrikeAggregate], spot: f64) -> Option<f64> {
    let mut best: Option<f64> = None;

    for pair in strikes.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        if a.net_gex * b.net_gex < 0.0 {
            let weight = a.net_gex.abs() / (a.net_gex.abs() + b.net_gex.abs());
            let flip = a.strike + weight * (b.strike - a.strike);
            let closer = match best {
                None => true,
                Some(prev) => (flip - spot).abs() < (prev - spot).abs(),
            };
            if closer {
                best = Some(flip);
            }
        }
    }

    best
}

/// Classify the regime from aggregate dealer gamma.
///
/// Strikes within the ATM band vote double, so near-the-money positioning
/// dominates the label. Confidence is magnitude (saturating a decade above
/// the floor) discounted by half when the ATM-weighted vote disagrees in
/// sign with the raw total. Totals under `min_abs_gex` are no signal.
pub fn classify_regime(
    strikes: &[StrikeAggregate],
    spot: f64,
    total_net_gex: f64,
    config: &GexConfig,
) -> RegimeClassification {
    if total_net_gex.abs() < config.min_abs_gex {
        return RegimeClassification {
            label: RegimeLabel::MixedUncertain,
            confidence: 0.0,
            net_gex: total_net_gex,
        };
    }

    let mut weighted = 0.0;
    for agg in strikes {
        let atm = spot > 0.0 && (agg.strike - spot).abs() / spot <= config.atm_band_pct;
        let w = if atm { 2.0 } else { 1.0 };
        weighted += w * agg.net_gex;
    }

    let magnitude = (total_net_gex.abs() / (config.min_abs_gex * 10.0)).min(1.0);
    let agreement = if weighted.signum() == total_net_gex.signum() {
        1.0
    } else {
        0.5
    };
    let confidence = magnitude * agreement;

    let label = if weighted == 0.0 || confidence < config.min_confidence {
        RegimeLabel::MixedUncertain
    } else if weighted > 0.0 {
        RegimeLabel::LongGamma
    } else {
        RegimeLabel::ShortGamma
    };

    RegimeClassification {
        label,
        confidence,
        net_gex: total_net_gex,
    }
}

/// Strikes voted into a per-expiry top list on each side.
#[derive(Debug, Default)]
pub struct StackedSides {
    calls: HashSet<i64>,
    puts: HashSet<i64>,
}

/// A strike is stacked when it lands in the per-expiry top-N by magnitude
/// for the same side in at least two independent expirations.
pub fn stacked_strikes(per_expiry: &[Vec<StrikeAggregate>], top_n: usize) -> StackedSides {
    let mut call_votes: HashMap<i64, u32> = HashMap::new();
    let mut put_votes: HashMap<i64, u32> = HashMap::new();

    for aggregates in per_expiry {
        for agg in top_by(aggregates, top_n, |a| a.call_gex) {
            *call_votes.entry(strike_key(agg.strike)).or_insert(0) += 1;
        }
        for agg in top_by(aggregates, top_n, |a| a.put_gex) {
            *put_votes.entry(strike_key(agg.strike)).or_insert(0) += 1;
        }
    }

    StackedSides {
        calls: keys_with_votes(call_votes, 2),
        puts: keys_with_votes(put_votes, 2),
    }
}

fn top_by<'a>(
    aggregates: &'a [StrikeAggregate],
    top_n: usize,
    side: impl Fn(&StrikeAggregate) -> f64,
) -> Vec<&'a StrikeAggregate> {
    let mut with_side: Vec<&StrikeAggregate> =
        aggregates.iter().filter(|a| side(a) != 0.0).collect();
    with_side.sort_by(|a, b| {
        side(b)
            .abs()
            .partial_cmp(&side(a).abs())
            .unwrap_or(Ordering::Equal)
    });
    with_side.truncate(top_n);
    with_side
}

fn keys_with_votes(votes: HashMap<i64, u32>, min_votes: u32) -> HashSet<i64> {
    votes
        .into_iter()
        .filter(|(_, v)| *v >= min_votes)
        .map(|(k, _)| k)
        .collect()
}

/// Rank walls per side by aggregated side-GEX magnitude, strongest first.
pub fn find_walls(
    strikes: &[StrikeAggregate],
    spot: f64,
    config: &GexConfig,
    stacked: &StackedSides,
) -> Walls {
    let build = |top: Vec<&StrikeAggregate>, side: fn(&StrikeAggregate) -> f64, voted: &HashSet<i64>| {
        top.into_iter()
            .map(|agg| Wall {
                strike: agg.strike,
                dollar_gex: side(agg),
                distance_pct: if spot > 0.0 {
                    (agg.strike - spot) / spot * 100.0
                } else {
                    0.0
                },
                stacked: voted.contains(&strike_key(agg.strike)),
                expiry_count: agg.expiry_count(),
            })
            .collect::<Vec<Wall>>()
    };

    Walls {
        calls: build(
            top_by(strikes, config.wall_top_n, |a| a.call_gex),
            |a| a.call_gex,
            &stacked.calls,
        ),
        puts: build(
            top_by(strikes, config.wall_top_n, |a| a.put_gex),
            |a| a.put_gex,
            &stacked.puts,
        ),
    }
}

/// Multi-expiry GEX orchestrator over an options data port.
pub struct GexEngine {
    data: Arc<dyn OptionsDataPort>,
    config: GexConfig,
}

impl GexEngine {
    pub fn new(data: Arc<dyn OptionsDataPort>, config: GexConfig) -> Self {
        Self { data, config }
    }

    pub fn config(&self) -> &GexConfig {
        &self.config
    }

    /// Fetch every requested expiration concurrently, drop failures, and
    /// merge the survivors into one aggregated analysis.
    ///
    /// Spot is taken from the first requested expiry that supplies one;
    /// disagreeing vendor spots are never averaged. Falls back to the
    /// port's spot quote when no snapshot carries an underlying price.
    pub async fn analyze(
        &self,
        ticker: &str,
        expirations: &[NaiveDate],
    ) -> Result<GexAnalysis, GexError> {
        if expirations.is_empty() {
            return Err(GexError::NoExpirations {
                ticker: ticker.to_string(),
            });
        }

        let mut tasks = JoinSet::new();
        for (idx, expiration) in expirations.iter().copied().enumerate() {
            let data = Arc::clone(&self.data);
            let ticker = ticker.to_string();
            tasks.spawn(async move { (idx, expiration, data.chain(&ticker, expiration).await) });
        }

        // Collect in request order so "first expiry with a spot" is stable
        // even though tasks complete out of order.
        let mut slots: Vec<Option<(NaiveDate, ChainSnapshot)>> =
            (0..expirations.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, expiration, Ok(snapshot))) => slots[idx] = Some((expiration, snapshot)),
                Ok((_, expiration, Err(err))) => {
                    warn!(ticker, %expiration, error = %err, "expiry fetch failed, dropping");
                }
                Err(err) => {
                    warn!(ticker, error = %err, "expiry fetch task panicked, dropping");
                }
            }
        }

        let fetched: Vec<(NaiveDate, ChainSnapshot)> = slots.into_iter().flatten().collect();
        if fetched.is_empty() {
            return Err(GexError::AllExpiriesFailed {
                ticker: ticker.to_string(),
            });
        }

        let spot = match fetched
            .iter()
            .find_map(|(_, snap)| snap.underlying_price.filter(|p| *p > 0.0))
        {
            Some(spot) => spot,
            None => self.data.spot_price(ticker).await?,
        };

        let now = Utc::now();
        let mut per_expiry = Vec::with_capacity(fetched.len());
        let mut all_contracts = Vec::new();
        for (_, snapshot) in &fetched {
            per_expiry.push(compute_strike_gex(&snapshot.contracts, spot, now, &self.config));
            all_contracts.extend(snapshot.contracts.iter().cloned());
        }

        let strikes = compute_strike_gex(&all_contracts, spot, now, &self.config);
        if strikes.is_empty() {
            return Err(GexError::InsufficientData {
                ticker: ticker.to_string(),
            });
        }

        let total_net_gex: f64 = strikes.iter().map(|s| s.net_gex).sum();
        let stacked = stacked_strikes(&per_expiry, self.config.wall_top_n);
        let walls = find_walls(&strikes, spot, &self.config, &stacked);
        let gamma_flip = find_gamma_flip(&strikes, spot);
        let regime = classify_regime(&strikes, spot, total_net_gex, &self.config);

        Ok(GexAnalysis {
            ticker: ticker.to_string(),
            spot,
            total_net_gex,
            regime,
            gamma_flip,
            strikes,
            walls,
            expiries_analyzed: fetched.iter().map(|(d, _)| expiry_label(*d)).collect(),
            timestamp: now,
        })
    }
}
