//! Polygon options chain adapter
//!
//! `OptionsDataPort` implementation over the v3 options snapshot and
//! reference endpoints. Snapshot pages are followed through `next_url`
//! up to a fixed bound; vendor greeks and open interest are passed
//! through as-is and resolved downstream.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::debug;

use crate::gex::types::{OptionContract, OptionKind};
use crate::ports::options_data::{ChainSnapshot, OptionsDataError, OptionsDataPort};

use super::client::{PolygonApiError, PolygonClient};

/// Contracts per snapshot page (Polygon maximum).
const PAGE_LIMIT: usize = 250;

/// Hard bound on pagination so one fat chain cannot stall a scan cycle.
const MAX_CHAIN_PAGES: usize = 10;

impl From<PolygonApiError> for OptionsDataError {
    fn from(err: PolygonApiError) -> Self {
        match err {
            PolygonApiError::Http(msg) => OptionsDataError::Request(msg),
            PolygonApiError::Status { status, body } => {
                OptionsDataError::Request(format!("{status}: {body}"))
            }
            PolygonApiError::Parse(msg) => OptionsDataError::Malformed(msg),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SnapshotPage {
    results: Option<Vec<SnapshotContract>>,
    next_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SnapshotContract {
    details: ContractDetails,
    greeks: Option<Greeks>,
    implied_volatility: Option<f64>,
    open_interest: Option<u64>,
    day: Option<DayStats>,
    last_quote: Option<LastQuote>,
    underlying_asset: Option<UnderlyingAsset>,
}

#[derive(Debug, Deserialize)]
struct ContractDetails {
    strike_price: f64,
    contract_type: OptionKind,
    expiration_date: NaiveDate,
}

#[derive(Debug, Deserialize)]
struct Greeks {
    gamma: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct DayStats {
    volume: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct LastQuote {
    ask: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct UnderlyingAsset {
    price: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ReferencePage {
    results: Option<Vec<ReferenceContract>>,
}

#[derive(Debug, Deserialize)]
struct ReferenceContract {
    expiration_date: NaiveDate,
}

#[derive(Debug, Deserialize)]
struct PrevAggResponse {
    results: Option<Vec<PrevAgg>>,
}

#[derive(Debug, Deserialize)]
struct PrevAgg {
    /// Close price
    c: f64,
}

fn to_contract(snapshot: SnapshotContract) -> OptionContract {
    OptionContract {
        strike: snapshot.details.strike_price,
        kind: snapshot.details.contract_type,
        open_interest: snapshot.open_interest.unwrap_or(0),
        volume: snapshot.day.and_then(|d| d.volume).unwrap_or(0),
        gamma: snapshot.greeks.and_then(|g| g.gamma),
        implied_vol: snapshot.implied_volatility,
        ask: snapshot.last_quote.and_then(|q| q.ask),
        expiration: snapshot.details.expiration_date,
    }
}

/// Polygon-backed options chain feed
#[derive(Debug, Clone)]
pub struct PolygonOptionsData {
    client: PolygonClient,
}

impl PolygonOptionsData {
    pub fn new(client: PolygonClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl OptionsDataPort for PolygonOptionsData {
    async fn expirations(&self, ticker: &str) -> Result<Vec<NaiveDate>, OptionsDataError> {
        let query = [
            ("underlying_ticker", ticker.to_string()),
            ("expired", "false".to_string()),
            ("order", "asc".to_string()),
            ("sort", "expiration_date".to_string()),
            ("limit", "1000".to_string()),
        ];
        let page: ReferencePage = self
            .client
            .get_json("/v3/reference/options/contracts", &query)
            .await?;

        let mut dates: Vec<NaiveDate> = Vec::new();
        for contract in page.results.unwrap_or_default() {
            if dates.last() != Some(&contract.expiration_date) {
                dates.push(contract.expiration_date);
            }
        }
        if dates.is_empty() {
            return Err(OptionsDataError::NoData(format!(
                "no listed expirations for {ticker}"
            )));
        }
        Ok(dates)
    }

    async fn chain(
        &self,
        ticker: &str,
        expiration: NaiveDate,
    ) -> Result<ChainSnapshot, OptionsDataError> {
        let path = format!("/v3/snapshot/options/{ticker}");
        let query = [
            ("expiration_date", expiration.format("%Y-%m-%d").to_string()),
            ("limit", PAGE_LIMIT.to_string()),
        ];

        let mut page: SnapshotPage = self.client.get_json(&path, &query).await?;
        let mut underlying_price = None;
        let mut contracts = Vec::new();
        let mut pages = 1;

        loop {
            for snapshot in page.results.take().unwrap_or_default() {
                if snapshot.details.expiration_date != expiration {
                    continue;
                }
                if underlying_price.is_none() {
                    underlying_price = snapshot
                        .underlying_asset
                        .as_ref()
                        .and_then(|u| u.price)
                        .filter(|p| *p > 0.0);
                }
                contracts.push(to_contract(snapshot));
            }

            let next = match page.next_url.take() {
                Some(url) if pages < MAX_CHAIN_PAGES => url,
                Some(_) => {
                    debug!(ticker, %expiration, pages, "chain pagination bound hit");
                    break;
                }
                None => break,
            };
            page = self.client.get_absolute(&next, &[]).await?;
            pages += 1;
        }

        if contracts.is_empty() {
            return Err(OptionsDataError::NoData(format!(
                "empty chain for {ticker} {expiration}"
            )));
        }

        debug!(ticker, %expiration, contracts = contracts.len(), pages, "chain fetched");
        Ok(ChainSnapshot {
            underlying_price,
            contracts,
        })
    }

    async fn spot_price(&self, ticker: &str) -> Result<f64, OptionsDataError> {
        let path = format!("/v2/aggs/ticker/{ticker}/prev");
        let response: PrevAggResponse = self
            .client
            .get_json(&path, &[("adjusted", "true".to_string())])
            .await?;
        response
            .results
            .unwrap_or_default()
            .first()
            .map(|agg| agg.c)
            .filter(|c| *c > 0.0)
            .ok_or_else(|| OptionsDataError::NoData(format!("no prior close for {ticker}")))
    }
}
