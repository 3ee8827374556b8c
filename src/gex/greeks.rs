//! Black-Scholes gamma fallback.
//!
//! Used only when a vendor snapshot carries implied volatility but no gamma.
//! No dividend or early-exercise modeling; a fixed short rate is supplied by
//! `GexConfig`.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use statrs::distribution::{Continuous, Normal};

/// Floor on time-to-expiry so same-day contracts keep a finite gamma
/// through the session (one hour, in years).
pub const MIN_TIME_TO_EXPIRY_YEARS: f64 = 1.0 / (365.0 * 24.0);

/// Options on US equities stop trading at 16:00 ET; approximated as 20:00 UTC.
const EXPIRY_CLOSE_HOUR_UTC: u32 = 20;

fn std_normal() -> Normal {
    // Parameters are constant and valid, construction cannot fail.
    Normal::new(0.0, 1.0).unwrap()
}

/// Standard normal PDF φ(x).
fn norm_pdf(x: f64) -> f64 {
    std_normal().pdf(x)
}

/// Calendar time from `now` to the expiration close, in years, floored.
pub fn time_to_expiry_years(expiration: NaiveDate, now: DateTime<Utc>) -> f64 {
    let close = expiration
        .and_hms_opt(EXPIRY_CLOSE_HOUR_UTC, 0, 0)
        .unwrap_or_else(|| expiration.and_time(NaiveTime::MIN))
        .and_utc();
    let seconds = (close - now).num_seconds() as f64;
    let years = seconds / (365.0 * 24.0 * 3600.0);
    years.max(MIN_TIME_TO_EXPIRY_YEARS)
}

/// Black-Scholes gamma: φ(d1) / (S·σ·√T).
///
/// Returns `None` when the inputs cannot produce a meaningful value
/// (non-positive spot, strike, vol, or time).
pub fn bs_gamma(spot: f64, strike: f64, iv: f64, t_years: f64, rate: f64) -> Option<f64> {
    if spot <= 0.0 || strike <= 0.0 || iv <= 0.0 || t_years <= 0.0 {
        return None;
    }

    let sqrt_t = t_years.sqrt();
    let d1 = ((spot / strike).ln() + (rate + 0.5 * iv * iv) * t_years) / (iv * sqrt_t);
    let gamma = norm_pdf(d1) / (spot * iv * sqrt_t);

    gamma.is_finite().then_some(gamma)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::TimeZone;

    #[test]
    fn atm_gamma_matches_closed_form() {
        // S=K=100, T=0.25y, r=5%, sigma=20%:
        // d1 = 0.175, phi(d1) ~ 0.39289, gamma ~ 0.039289
        let gamma = bs_gamma(100.0, 100.0, 0.20, 0.25, 0.05).unwrap();
        assert_relative_eq!(gamma, 0.039289, epsilon = 1e-4);
    }

    #[test]
    fn gamma_is_strike_symmetric_in_kind() {
        // Gamma is identical for calls and puts, so the fallback only
        // depends on the strike.
        let itm = bs_gamma(110.0, 100.0, 0.20, 0.25, 0.05).unwrap();
        let otm = bs_gamma(90.0, 100.0, 0.20, 0.25, 0.05).unwrap();
        let atm = bs_gamma(100.0, 100.0, 0.20, 0.25, 0.05).unwrap();
        assert!(atm > itm);
        assert!(atm > otm);
    }

    #[test]
    fn degenerate_inputs_yield_none() {
        assert!(bs_gamma(0.0, 100.0, 0.2, 0.25, 0.05).is_none());
        assert!(bs_gamma(100.0, 0.0, 0.2, 0.25, 0.05).is_none());
        assert!(bs_gamma(100.0, 100.0, 0.0, 0.25, 0.05).is_none());
        assert!(bs_gamma(100.0, 100.0, 0.2, 0.0, 0.05).is_none());
    }

    #[test]
    fn same_day_expiry_is_floored_not_zero() {
        let now = Utc.with_ymd_and_hms(2025, 6, 20, 21, 30, 0).unwrap();
        let expiry = NaiveDate::from_ymd_opt(2025, 6, 20).unwrap();
        // Past the close: the floor keeps T at one hour.
        let t = time_to_expiry_years(expiry, now);
        assert_relative_eq!(t, MIN_TIME_TO_EXPIRY_YEARS, epsilon = 1e-12);

        let gamma = bs_gamma(600.0, 600.0, 0.25, t, 0.05).unwrap();
        assert!(gamma.is_finite());
        assert!(gamma > 0.0);
    }

    #[test]
    fn far_expiry_time_is_roughly_calendar() {
        let now = Utc.with_ymd_and_hms(2025, 6, 20, 20, 0, 0).unwrap();
        let expiry = NaiveDate::from_ymd_opt(2026, 6, 20).unwrap();
        let t = time_to_expiry_years(expiry, now);
        assert_relative_eq!(t, 1.0, epsilon = 1e-2);
    }
}
