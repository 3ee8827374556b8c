//! Indicator engine
//!
//! `TechnicalsPort` implementation computed locally from daily bars:
//! Wilder RSI-14, SMA-50/200, and MACD(12,26,9). Indicators whose window
//! exceeds the available history come back `None` rather than padded.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::ports::market_data::MarketDataPort;
use crate::ports::technicals::{
    MacdValue, TechnicalSnapshot, TechnicalsError, TechnicalsPort, TrendDirection,
};

/// Bars fetched per snapshot; enough for SMA-200 with room to spare.
const BAR_FETCH_LIMIT: usize = 250;

/// Minimum history to produce any snapshot at all.
const MIN_BARS: usize = 30;

const RSI_PERIOD: usize = 14;

/// Wilder-smoothed RSI over the last value of the series.
pub fn rsi_14(closes: &[f64]) -> Option<f64> {
    if closes.len() < RSI_PERIOD + 1 {
        return None;
    }

    let mut gains = 0.0;
    let mut losses = 0.0;
    for w in closes[..=RSI_PERIOD].windows(2) {
        let change = w[1] - w[0];
        if change >= 0.0 {
            gains += change;
        } else {
            losses -= change;
        }
    }
    let mut avg_gain = gains / RSI_PERIOD as f64;
    let mut avg_loss = losses / RSI_PERIOD as f64;

    for w in closes[RSI_PERIOD..].windows(2) {
        let change = w[1] - w[0];
        let (gain, loss) = if change >= 0.0 {
            (change, 0.0)
        } else {
            (0.0, -change)
        };
        avg_gain = (avg_gain * (RSI_PERIOD as f64 - 1.0) + gain) / RSI_PERIOD as f64;
        avg_loss = (avg_loss * (RSI_PERIOD as f64 - 1.0) + loss) / RSI_PERIOD as f64;
    }

    if avg_loss == 0.0 && avg_gain == 0.0 {
        // Dead-flat series reads neutral.
        return Some(50.0);
    }
    if avg_loss == 0.0 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// Simple moving average over the trailing `period` values.
pub fn sma(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period {
        return None;
    }
    Some(closes[closes.len() - period..].iter().sum::<f64>() / period as f64)
}

/// EMA seeded with the SMA of the first `period` values. The returned
/// series starts at input index `period - 1`.
fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }
    let k = 2.0 / (period as f64 + 1.0);
    let mut ema = values[..period].iter().sum::<f64>() / period as f64;
    let mut out = Vec::with_capacity(values.len() - period + 1);
    out.push(ema);
    for v in &values[period..] {
        ema = v * k + ema * (1.0 - k);
        out.push(ema);
    }
    out
}

/// MACD(12,26,9). Needs at least 34 closes for the signal line.
pub fn macd_12_26_9(closes: &[f64]) -> Option<MacdValue> {
    let e12 = ema_series(closes, 12);
    let e26 = ema_series(closes, 26);
    if e26.is_empty() {
        return None;
    }

    // e12[j + 14] and e26[j] both sit at close index j + 25.
    let offset = 26 - 12;
    let macd_line: Vec<f64> = e26
        .iter()
        .enumerate()
        .map(|(j, e26v)| e12[j + offset] - e26v)
        .collect();

    let signal = *ema_series(&macd_line, 9).last()?;
    let macd = *macd_line.last()?;
    Some(MacdValue {
        macd,
        signal,
        histogram: macd - signal,
    })
}

/// Trend from price/SMA alignment. With both averages present the full
/// alignment must agree; with only the 50-day, price position decides.
pub fn trend_from(price: f64, sma_50: Option<f64>, sma_200: Option<f64>) -> TrendDirection {
    match (sma_50, sma_200) {
        (Some(s50), Some(s200)) => {
            if price > s50 && s50 > s200 {
                TrendDirection::Bullish
            } else if price < s50 && s50 < s200 {
                TrendDirection::Bearish
            } else {
                TrendDirection::Sideways
            }
        }
        (Some(s50), None) => {
            if price > s50 {
                TrendDirection::Bullish
            } else if price < s50 {
                TrendDirection::Bearish
            } else {
                TrendDirection::Sideways
            }
        }
        _ => TrendDirection::Sideways,
    }
}

/// Bar-driven technicals engine
pub struct TechnicalsEngine {
    market_data: Arc<dyn MarketDataPort>,
}

impl TechnicalsEngine {
    pub fn new(market_data: Arc<dyn MarketDataPort>) -> Self {
        Self { market_data }
    }
}

#[async_trait]
impl TechnicalsPort for TechnicalsEngine {
    async fn snapshot(&self, symbol: &str) -> Result<TechnicalSnapshot, TechnicalsError> {
        let bars = self.market_data.daily_bars(symbol, BAR_FETCH_LIMIT).await?;
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();

        if closes.len() < MIN_BARS {
            return Err(TechnicalsError::InsufficientHistory {
                symbol: symbol.to_string(),
                got: closes.len(),
            });
        }

        // Live quote when available, last close otherwise.
        let price = match self.market_data.latest_price(symbol).await {
            Ok(p) if p > 0.0 => p,
            _ => *closes.last().unwrap_or(&0.0),
        };

        let sma_50 = sma(&closes, 50);
        let sma_200 = sma(&closes, 200);
        let snapshot = TechnicalSnapshot {
            symbol: symbol.to_string(),
            price,
            rsi_14: rsi_14(&closes),
            sma_50,
            sma_200,
            macd: macd_12_26_9(&closes),
            trend: trend_from(price, sma_50, sma_200),
        };
        debug!(
            symbol,
            price,
            rsi = ?snapshot.rsi_14,
            trend = %snapshot.trend,
            bars = closes.len(),
            "technicals computed"
        );
        Ok(snapshot)
    }
}
