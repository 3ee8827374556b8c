//! Composite squeeze score.
//!
//! Four bounded components sum to a 0-100 score, and every component is
//! reported alongside the total so a reading can always be decomposed.

use serde::{Deserialize, Serialize};

use crate::gex::types::{RegimeClassification, RegimeLabel};

/// Dealer-regime component ceiling.
pub const REGIME_MAX: f64 = 50.0;
/// Mixed/uncertain regimes contribute at most this much.
pub const MIXED_REGIME_CAP: f64 = 20.0;
/// Flip-proximity component ceiling.
pub const PROXIMITY_MAX: f64 = 25.0;
/// Distance to flip (percent of spot) at which proximity decays to zero.
pub const PROXIMITY_DECAY_PCT: f64 = 5.0;
/// Price-velocity component ceiling.
pub const VELOCITY_MAX: f64 = 15.0;
/// High-low range (fraction of average close) that earns full velocity.
pub const FULL_VELOCITY_RANGE: f64 = 0.05;
/// Velocity looks at this many trailing samples.
pub const VELOCITY_WINDOW: usize = 5;
/// Volume-surge component ceiling.
pub const VOLUME_MAX: f64 = 10.0;
/// Surge ratio below this contributes nothing.
pub const VOLUME_SURGE_FLOOR: f64 = 1.5;
/// Surge ratio that earns the full volume component.
pub const FULL_VOLUME_SURGE: f64 = 3.0;
/// Volume needs a 3-sample burst against a 7-sample baseline.
pub const VOLUME_RECENT_WINDOW: usize = 3;
pub const VOLUME_BASELINE_WINDOW: usize = 7;

/// One price/volume observation, oldest-first when passed in a slice.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PriceSample {
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Component-level decomposition of one composite score.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub regime: f64,
    pub proximity: f64,
    pub velocity: f64,
    pub volume: f64,
    pub total: f64,
}

/// Regime component: scales with short-gamma confidence. A long-gamma book
/// dampens moves and contributes nothing; an uncertain read is capped well
/// below the short-gamma ceiling.
pub fn regime_component(regime: &RegimeClassification) -> f64 {
    match regime.label {
        RegimeLabel::ShortGamma => REGIME_MAX * regime.confidence,
        RegimeLabel::MixedUncertain => (REGIME_MAX * regime.confidence).min(MIXED_REGIME_CAP),
        RegimeLabel::LongGamma => 0.0,
    }
}

/// Proximity component: full when spot sits on the flip, linearly decaying
/// to zero at `PROXIMITY_DECAY_PCT` percent away. No flip in range, no
/// proximity.
pub fn proximity_component(spot: f64, gamma_flip: Option<f64>) -> f64 {
    let flip = match gamma_flip {
        Some(f) if spot > 0.0 => f,
        _ => return 0.0,
    };
    let distance_pct = (flip - spot).abs() / spot * 100.0;
    let factor = (1.0 - distance_pct / PROXIMITY_DECAY_PCT).max(0.0);
    PROXIMITY_MAX * factor
}

/// Velocity component: high-low range of the trailing window as a fraction
/// of its average close, saturating at `FULL_VELOCITY_RANGE`.
pub fn velocity_component(samples: &[PriceSample]) -> f64 {
    if samples.len() < VELOCITY_WINDOW {
        return 0.0;
    }
    let window = &samples[samples.len() - VELOCITY_WINDOW..];
    let high = window.iter().map(|s| s.high).fold(f64::MIN, f64::max);
    let low = window.iter().map(|s| s.low).fold(f64::MAX, f64::min);
    let avg_close = window.iter().map(|s| s.close).sum::<f64>() / VELOCITY_WINDOW as f64;
    if avg_close <= 0.0 || high <= low {
        return 0.0;
    }
    let range = (high - low) / avg_close;
    VELOCITY_MAX * (range / FULL_VELOCITY_RANGE).min(1.0)
}

/// Volume component: a 3-sample burst against the preceding 7-sample
/// baseline. Contributes only past a 1.5x surge, saturating at 3x.
pub fn volume_component(samples: &[PriceSample]) -> f64 {
    let need = VOLUME_RECENT_WINDOW + VOLUME_BASELINE_WINDOW;
    if samples.len() < need {
        return 0.0;
    }
    let tail = &samples[samples.len() - need..];
    let baseline: f64 =
        tail[..VOLUME_BASELINE_WINDOW].iter().map(|s| s.volume).sum::<f64>()
            / VOLUME_BASELINE_WINDOW as f64;
    let recent: f64 = tail[VOLUME_BASELINE_WINDOW..].iter().map(|s| s.volume).sum::<f64>()
        / VOLUME_RECENT_WINDOW as f64;
    if baseline <= 0.0 {
        return 0.0;
    }
    let ratio = recent / baseline;
    if ratio <= VOLUME_SURGE_FLOOR {
        return 0.0;
    }
    let factor = ((ratio - VOLUME_SURGE_FLOOR) / (FULL_VOLUME_SURGE - VOLUME_SURGE_FLOOR)).min(1.0);
    VOLUME_MAX * factor
}

/// Composite 0-100 squeeze score with its component breakdown.
pub fn composite_score(
    regime: &RegimeClassification,
    spot: f64,
    gamma_flip: Option<f64>,
    samples: &[PriceSample],
) -> ScoreBreakdown {
    let regime_score = regime_component(regime);
    let proximity = proximity_component(spot, gamma_flip);
    let velocity = velocity_component(samples);
    let volume = volume_component(samples);
    let total = (regime_score + proximity + velocity + volume).clamp(0.0, 100.0);
    ScoreBreakdown {
        regime: regime_score,
        proximity,
        velocity,
        volume,
        total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn short_gamma(confidence: f64) -> RegimeClassification {
        RegimeClassification {
            label: RegimeLabel::ShortGamma,
            confidence,
            net_gex: -5e8,
        }
    }

    fn flat_samples(n: usize, close: f64, volume: f64) -> Vec<PriceSample> {
        (0..n)
            .map(|_| PriceSample {
                high: close,
                low: close,
                close,
                volume,
            })
            .collect()
    }

    #[test]
    fn regime_component_by_label() {
        assert_relative_eq!(regime_component(&short_gamma(1.0)), 50.0);
        assert_relative_eq!(regime_component(&short_gamma(0.6)), 30.0);

        let long = RegimeClassification {
            label: RegimeLabel::LongGamma,
            confidence: 1.0,
            net_gex: 5e8,
        };
        assert_eq!(regime_component(&long), 0.0);

        let mixed = RegimeClassification {
            label: RegimeLabel::MixedUncertain,
            confidence: 0.9,
            net_gex: 1e8,
        };
        // 50 x 0.9 = 45 would exceed the mixed cap.
        assert_relative_eq!(regime_component(&mixed), MIXED_REGIME_CAP);

        let weak_mixed = RegimeClassification {
            label: RegimeLabel::MixedUncertain,
            confidence: 0.2,
            net_gex: 1e8,
        };
        assert_relative_eq!(regime_component(&weak_mixed), 10.0);
    }

    #[test]
    fn proximity_decays_linearly_to_five_percent() {
        assert_relative_eq!(proximity_component(600.0, Some(600.0)), 25.0);
        // 2.5% away = half score.
        assert_relative_eq!(proximity_component(600.0, Some(615.0)), 12.5);
        // Past 5% it floors at zero.
        assert_relative_eq!(proximity_component(600.0, Some(660.0)), 0.0);
        assert_eq!(proximity_component(600.0, None), 0.0);
    }

    #[test]
    fn velocity_needs_five_samples_and_saturates() {
        assert_eq!(velocity_component(&flat_samples(4, 100.0, 1e6)), 0.0);

        // 5% range over the window earns the full component.
        let mut samples = flat_samples(5, 100.0, 1e6);
        samples[4].high = 102.5;
        samples[4].low = 97.5;
        assert_relative_eq!(velocity_component(&samples), 15.0);

        // 1% range earns a fifth of it.
        let mut samples = flat_samples(5, 100.0, 1e6);
        samples[4].high = 100.5;
        samples[4].low = 99.5;
        assert_relative_eq!(velocity_component(&samples), 3.0, epsilon = 1e-9);
    }

    #[test]
    fn volume_surge_gated_at_floor_and_capped() {
        // Below the 1.5x floor: nothing.
        let mut samples = flat_samples(10, 100.0, 1e6);
        for s in samples.iter_mut().skip(7) {
            s.volume = 1.4e6;
        }
        assert_eq!(volume_component(&samples), 0.0);

        // 2.25x sits halfway between floor and full.
        let mut samples = flat_samples(10, 100.0, 1e6);
        for s in samples.iter_mut().skip(7) {
            s.volume = 2.25e6;
        }
        assert_relative_eq!(volume_component(&samples), 5.0, epsilon = 1e-9);

        // 4x caps at the ceiling.
        let mut samples = flat_samples(10, 100.0, 1e6);
        for s in samples.iter_mut().skip(7) {
            s.volume = 4e6;
        }
        assert_relative_eq!(volume_component(&samples), 10.0);

        // Nine samples are not enough history.
        assert_eq!(volume_component(&flat_samples(9, 100.0, 1e6)), 0.0);
    }

    #[test]
    fn composite_sums_components_and_stays_bounded() {
        let mut samples = flat_samples(10, 600.0, 1e6);
        for s in samples.iter_mut().skip(7) {
            s.volume = 4e6;
        }
        samples[9].high = 615.0;
        samples[9].low = 585.0;

        let breakdown = composite_score(&short_gamma(1.0), 600.0, Some(600.0), &samples);
        assert_relative_eq!(breakdown.regime, 50.0);
        assert_relative_eq!(breakdown.proximity, 25.0);
        assert_relative_eq!(breakdown.velocity, 15.0);
        assert_relative_eq!(breakdown.volume, 10.0);
        assert_relative_eq!(breakdown.total, 100.0);
    }
}
