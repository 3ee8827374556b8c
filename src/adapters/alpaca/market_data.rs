//! Alpaca Market Data API
//!
//! `MarketDataPort` implementation over the Alpaca v2 stock data
//! endpoints (latest trade, daily bars).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::ports::market_data::{MarketDataError, MarketDataPort};
use crate::ports::models::PriceBar;

use super::client::{AlpacaApiError, AlpacaClient, Host};

impl From<AlpacaApiError> for MarketDataError {
    fn from(err: AlpacaApiError) -> Self {
        match err {
            AlpacaApiError::Http(msg) => MarketDataError::Request(msg),
            AlpacaApiError::Status { status, body } => {
                MarketDataError::Request(format!("{status}: {body}"))
            }
            AlpacaApiError::Parse(msg) => MarketDataError::Malformed(msg),
        }
    }
}

#[derive(Debug, Deserialize)]
struct LatestTradeResponse {
    trade: LatestTrade,
}

#[derive(Debug, Deserialize)]
struct LatestTrade {
    /// Trade price
    p: f64,
}

#[derive(Debug, Deserialize)]
struct BarsResponse {
    bars: Option<Vec<AlpacaBar>>,
}

#[derive(Debug, Deserialize)]
struct AlpacaBar {
    t: DateTime<Utc>,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    v: u64,
}

impl From<AlpacaBar> for PriceBar {
    fn from(b: AlpacaBar) -> Self {
        PriceBar {
            timestamp: b.t,
            open: b.o,
            high: b.h,
            low: b.l,
            close: b.c,
            volume: b.v,
        }
    }
}

/// Alpaca-backed market data feed
#[derive(Debug, Clone)]
pub struct AlpacaMarketData {
    client: AlpacaClient,
}

impl AlpacaMarketData {
    pub fn new(client: AlpacaClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MarketDataPort for AlpacaMarketData {
    async fn latest_price(&self, symbol: &str) -> Result<f64, MarketDataError> {
        let path = format!("/v2/stocks/{symbol}/trades/latest");
        let response: LatestTradeResponse = self.client.get_json(Host::Data, &path, &[]).await?;
        if response.trade.p <= 0.0 {
            return Err(MarketDataError::NoData(symbol.to_string()));
        }
        Ok(response.trade.p)
    }

    async fn daily_bars(
        &self,
        symbol: &str,
        limit: usize,
    ) -> Result<Vec<PriceBar>, MarketDataError> {
        let path = format!("/v2/stocks/{symbol}/bars");
        let query = [
            ("timeframe", "1Day".to_string()),
            ("limit", limit.to_string()),
            ("adjustment", "split".to_string()),
        ];
        let response: BarsResponse = self.client.get_json(Host::Data, &path, &query).await?;
        Ok(response
            .bars
            .unwrap_or_default()
            .into_iter()
            .map(PriceBar::from)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bars_decode_alpaca_shape() {
        let json = r#"{
            "bars": [
                {"t": "2025-06-18T04:00:00Z", "o": 597.1, "h": 601.4, "l": 595.2, "c": 600.3, "v": 61200345, "n": 12, "vw": 598.8},
                {"t": "2025-06-20T04:00:00Z", "o": 600.5, "h": 603.0, "l": 598.7, "c": 602.1, "v": 58830122, "n": 10, "vw": 601.2}
            ],
            "symbol": "SPY",
            "next_page_token": null
        }"#;
        let response: BarsResponse = serde_json::from_str(json).unwrap();
        let bars: Vec<PriceBar> = response
            .bars
            .unwrap()
            .into_iter()
            .map(PriceBar::from)
            .collect();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[1].close, 602.1);
        assert_eq!(bars[0].volume, 61_200_345);
    }

    #[test]
    fn empty_bars_field_is_tolerated() {
        let json = r#"{"bars": null, "symbol": "NEWIPO", "next_page_token": null}"#;
        let response: BarsResponse = serde_json::from_str(json).unwrap();
        assert!(response.bars.is_none());
    }

    #[test]
    fn latest_trade_decodes() {
        let json = r#"{"symbol": "SPY", "trade": {"t": "2025-06-20T19:59:59Z", "p": 601.42, "s": 100}}"#;
        let response: LatestTradeResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.trade.p, 601.42);
    }
}
