//! OCC option symbol handling
//!
//! Polygon names contracts `O:SPY240823C00450000`: an `O:` prefix, the
//! underlying, a YYMMDD expiration, C or P, and the strike in thousandths
//! of a dollar, zero-padded to eight digits. Alpaca takes the same symbol
//! without the prefix.

use chrono::NaiveDate;

use crate::gex::types::OptionKind;

/// A decoded OCC option ticker.
#[derive(Debug, Clone, PartialEq)]
pub struct OccSymbol {
    pub underlying: String,
    pub expiration: NaiveDate,
    pub kind: OptionKind,
    pub strike: f64,
}

/// Parse an OCC ticker, with or without the `O:` prefix. Returns `None`
/// for anything that does not fit the fixed layout.
pub fn parse_occ(ticker: &str) -> Option<OccSymbol> {
    let body = ticker.strip_prefix("O:").unwrap_or(ticker);
    // underlying (>= 1 char) + 6 date digits + side + 8 strike digits
    if body.len() < 16 || !body.is_ascii() {
        return None;
    }

    let (rest, strike_digits) = body.split_at(body.len() - 8);
    let (rest, side) = rest.split_at(rest.len() - 1);
    let (underlying, date_digits) = rest.split_at(rest.len() - 6);

    if underlying.is_empty() || !strike_digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let kind = match side {
        "C" => OptionKind::Call,
        "P" => OptionKind::Put,
        _ => return None,
    };

    let yy: i32 = date_digits.get(0..2)?.parse().ok()?;
    let mm: u32 = date_digits.get(2..4)?.parse().ok()?;
    let dd: u32 = date_digits.get(4..6)?.parse().ok()?;
    let expiration = NaiveDate::from_ymd_opt(2000 + yy, mm, dd)?;

    let strike_milli: u64 = strike_digits.parse().ok()?;
    let strike = strike_milli as f64 / 1000.0;

    Some(OccSymbol {
        underlying: underlying.to_string(),
        expiration,
        kind,
        strike,
    })
}

/// Build the prefix-free OCC symbol Alpaca expects for order submission.
pub fn occ_for_alpaca(
    underlying: &str,
    expiration: NaiveDate,
    kind: OptionKind,
    strike: f64,
) -> String {
    let side = match kind {
        OptionKind::Call => 'C',
        OptionKind::Put => 'P',
    };
    format!(
        "{}{}{}{:08}",
        underlying.to_uppercase(),
        expiration.format("%y%m%d"),
        side,
        (strike * 1000.0).round() as u64
    )
}

/// Strip Polygon's `O:` prefix so a chain ticker can go straight to the
/// broker.
pub fn strip_occ_prefix(ticker: &str) -> &str {
    ticker.strip_prefix("O:").unwrap_or(ticker)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_standard_ticker() {
        let parsed = parse_occ("O:SPY240823C00450000").unwrap();
        assert_eq!(parsed.underlying, "SPY");
        assert_eq!(parsed.expiration, "2024-08-23".parse::<NaiveDate>().unwrap());
        assert_eq!(parsed.kind, OptionKind::Call);
        assert_eq!(parsed.strike, 450.0);
    }

    #[test]
    fn parses_fractional_strikes_and_puts() {
        let parsed = parse_occ("O:QQQ250620P00501500").unwrap();
        assert_eq!(parsed.kind, OptionKind::Put);
        assert_eq!(parsed.strike, 501.5);
    }

    #[test]
    fn prefix_is_optional() {
        let with = parse_occ("O:AAPL250117C00200000").unwrap();
        let without = parse_occ("AAPL250117C00200000").unwrap();
        assert_eq!(with, without);
        assert_eq!(with.underlying, "AAPL");
    }

    #[test]
    fn rejects_malformed_tickers() {
        assert!(parse_occ("O:SPY").is_none());
        assert!(parse_occ("O:SPY240823X00450000").is_none());
        assert!(parse_occ("O:SPY241345C00450000").is_none());
        assert!(parse_occ("O:SPY240823C0045000x").is_none());
        assert!(parse_occ("").is_none());
    }

    #[test]
    fn builds_the_alpaca_symbol() {
        let expiration: NaiveDate = "2025-08-25".parse().unwrap();
        let symbol = occ_for_alpaca("spy", expiration, OptionKind::Call, 600.0);
        assert_eq!(symbol, "SPY250825C00600000");

        // Round trip through the parser.
        let parsed = parse_occ(&symbol).unwrap();
        assert_eq!(parsed.strike, 600.0);
        assert_eq!(parsed.expiration, expiration);
    }

    #[test]
    fn strips_prefix_only_when_present() {
        assert_eq!(strip_occ_prefix("O:SPY240823C00450000"), "SPY240823C00450000");
        assert_eq!(strip_occ_prefix("SPY240823C00450000"), "SPY240823C00450000");
    }
}
