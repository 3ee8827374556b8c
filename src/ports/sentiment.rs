//! News sentiment port

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sentiment error type
#[derive(Error, Debug, Clone)]
pub enum SentimentError {
    #[error("news request failed: {0}")]
    Request(String),

    #[error("news response malformed: {0}")]
    Malformed(String),
}

/// Keyword-scored headline sentiment for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentSnapshot {
    pub symbol: String,
    pub headline_count: usize,
    pub bullish: u32,
    pub bearish: u32,
    pub neutral: u32,

    /// Net score in [-1, 1]: (bullish - bearish) / scored headlines.
    pub score: f64,

    /// A few recent headlines verbatim, for the oracle prompt.
    pub sample_headlines: Vec<String>,
}

impl SentimentSnapshot {
    /// Empty-but-valid snapshot when a symbol has no recent news.
    pub fn empty(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            headline_count: 0,
            bullish: 0,
            bearish: 0,
            neutral: 0,
            score: 0.0,
            sample_headlines: Vec::new(),
        }
    }

    pub fn label(&self) -> &'static str {
        if self.headline_count == 0 {
            "no coverage"
        } else if self.score > 0.2 {
            "bullish"
        } else if self.score < -0.2 {
            "bearish"
        } else {
            "mixed"
        }
    }
}

/// Sentiment port trait
#[async_trait]
pub trait SentimentPort: Send + Sync {
    /// Score recent headlines for a symbol.
    async fn snapshot(&self, symbol: &str) -> Result<SentimentSnapshot, SentimentError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_follow_score() {
        let mut snap = SentimentSnapshot::empty("AAPL");
        assert_eq!(snap.label(), "no coverage");

        snap.headline_count = 10;
        snap.score = 0.5;
        assert_eq!(snap.label(), "bullish");
        snap.score = -0.5;
        assert_eq!(snap.label(), "bearish");
        snap.score = 0.1;
        assert_eq!(snap.label(), "mixed");
    }
}
