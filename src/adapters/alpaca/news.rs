//! Alpaca News API
//!
//! `SentimentPort` implementation: recent headlines from the v1beta1 news
//! endpoint, scored with a small keyword vocabulary. The score is one
//! prompt ingredient, never a gate by itself.

use async_trait::async_trait;
use serde::Deserialize;

use crate::ports::sentiment::{SentimentError, SentimentPort, SentimentSnapshot};

use super::client::{AlpacaApiError, AlpacaClient, Host};

/// Headlines fetched per symbol.
const NEWS_LIMIT: usize = 50;

/// Headlines carried into the oracle prompt.
const SAMPLE_HEADLINES: usize = 3;

const BULLISH_WORDS: &[&str] = &[
    "surge", "soar", "beat", "record", "upgrade", "rally", "gain", "jump", "strong", "growth",
    "bullish", "outperform", "raise",
];

const BEARISH_WORDS: &[&str] = &[
    "plunge", "fall", "miss", "downgrade", "lawsuit", "drop", "weak", "cut", "slump", "fear",
    "bearish", "recall", "probe", "layoff", "warn",
];

impl From<AlpacaApiError> for SentimentError {
    fn from(err: AlpacaApiError) -> Self {
        match err {
            AlpacaApiError::Http(msg) => SentimentError::Request(msg),
            AlpacaApiError::Status { status, body } => {
                SentimentError::Request(format!("{status}: {body}"))
            }
            AlpacaApiError::Parse(msg) => SentimentError::Malformed(msg),
        }
    }
}

#[derive(Debug, Deserialize)]
struct NewsResponse {
    news: Vec<NewsItem>,
}

#[derive(Debug, Deserialize)]
struct NewsItem {
    headline: String,
}

/// -1, 0, or +1 for one headline. A headline hitting both vocabularies
/// reads as neutral.
fn classify_headline(headline: &str) -> i32 {
    let lower = headline.to_lowercase();
    let bullish = BULLISH_WORDS.iter().any(|w| lower.contains(w));
    let bearish = BEARISH_WORDS.iter().any(|w| lower.contains(w));
    match (bullish, bearish) {
        (true, false) => 1,
        (false, true) => -1,
        _ => 0,
    }
}

/// Score a batch of headlines for one symbol.
fn score_headlines(symbol: &str, headlines: &[String]) -> SentimentSnapshot {
    let mut bullish = 0u32;
    let mut bearish = 0u32;
    let mut neutral = 0u32;

    for headline in headlines {
        match classify_headline(headline) {
            1 => bullish += 1,
            -1 => bearish += 1,
            _ => neutral += 1,
        }
    }

    let count = headlines.len();
    let score = if count > 0 {
        (bullish as f64 - bearish as f64) / count as f64
    } else {
        0.0
    };

    SentimentSnapshot {
        symbol: symbol.to_string(),
        headline_count: count,
        bullish,
        bearish,
        neutral,
        score,
        sample_headlines: headlines.iter().take(SAMPLE_HEADLINES).cloned().collect(),
    }
}

/// Alpaca-backed news sentiment
#[derive(Debug, Clone)]
pub struct AlpacaNews {
    client: AlpacaClient,
}

impl AlpacaNews {
    pub fn new(client: AlpacaClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SentimentPort for AlpacaNews {
    async fn snapshot(&self, symbol: &str) -> Result<SentimentSnapshot, SentimentError> {
        let query = [
            ("symbols", symbol.to_string()),
            ("limit", NEWS_LIMIT.to_string()),
        ];
        let response: NewsResponse = self
            .client
            .get_json(Host::Data, "/v1beta1/news", &query)
            .await?;
        let headlines: Vec<String> = response.news.into_iter().map(|n| n.headline).collect();
        Ok(score_headlines(symbol, &headlines))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_is_case_insensitive() {
        assert_eq!(classify_headline("Shares SURGE on earnings beat"), 1);
        assert_eq!(classify_headline("Stock plunges after downgrade"), -1);
        assert_eq!(classify_headline("Company announces annual meeting"), 0);
    }

    #[test]
    fn mixed_signals_read_neutral() {
        assert_eq!(classify_headline("Rally fades as shares drop at close"), 0);
    }

    #[test]
    fn score_is_net_fraction_of_all_headlines() {
        let headlines = vec![
            "Shares surge to record".to_string(),
            "Analysts see strong growth".to_string(),
            "Lawsuit filed over recall".to_string(),
            "Quarterly report due Tuesday".to_string(),
        ];
        let snap = score_headlines("AAPL", &headlines);
        assert_eq!(snap.bullish, 2);
        assert_eq!(snap.bearish, 1);
        assert_eq!(snap.neutral, 1);
        assert!((snap.score - 0.25).abs() < 1e-12);
        assert_eq!(snap.sample_headlines.len(), 3);
        assert_eq!(snap.label(), "bullish");
    }

    #[test]
    fn no_news_scores_zero() {
        let snap = score_headlines("XYZ", &[]);
        assert_eq!(snap.headline_count, 0);
        assert_eq!(snap.score, 0.0);
        assert_eq!(snap.label(), "no coverage");
    }

    #[test]
    fn news_response_decodes() {
        let json = r#"{
            "news": [
                {"id": 1, "headline": "Chipmaker beats estimates", "created_at": "2025-06-20T12:00:00Z", "symbols": ["NVDA"]},
                {"id": 2, "headline": "Sector outlook weak", "created_at": "2025-06-20T11:00:00Z", "symbols": ["NVDA"]}
            ],
            "next_page_token": null
        }"#;
        let response: NewsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.news.len(), 2);
        assert_eq!(response.news[0].headline, "Chipmaker beats estimates");
    }
}
