//! Decision oracle port
//!
//! The oracle is a chat-completion model asked to turn a market briefing
//! into a buy/sell/hold call. The port returns the raw completion text;
//! extracting a `OracleDecision` from it is the application's job, so the
//! tolerant-parse path stays testable without a live endpoint.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Oracle error type
#[derive(Error, Debug, Clone)]
pub enum OracleError {
    #[error("oracle request failed: {0}")]
    Request(String),

    #[error("oracle response malformed: {0}")]
    Malformed(String),
}

/// What the oracle wants done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OracleAction {
    Buy,
    Sell,
    #[serde(alias = "skip")]
    Hold,
}

impl std::fmt::Display for OracleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OracleAction::Buy => "buy",
            OracleAction::Sell => "sell",
            OracleAction::Hold => "hold",
        };
        write!(f, "{s}")
    }
}

/// Parsed oracle verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleDecision {
    pub action: OracleAction,

    /// Self-reported confidence in [0, 1].
    pub confidence: f64,

    #[serde(default)]
    pub reasoning: String,
}

impl OracleDecision {
    /// The do-nothing verdict used whenever a completion cannot be parsed.
    pub fn hold() -> Self {
        Self {
            action: OracleAction::Hold,
            confidence: 0.0,
            reasoning: String::new(),
        }
    }
}

/// Contract direction for the zero-DTE variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionsAction {
    Call,
    Put,
    #[serde(alias = "hold")]
    Skip,
}

impl std::fmt::Display for OptionsAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OptionsAction::Call => "call",
            OptionsAction::Put => "put",
            OptionsAction::Skip => "skip",
        };
        write!(f, "{s}")
    }
}

/// Parsed oracle verdict for the zero-DTE variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionsDecision {
    pub action: OptionsAction,

    /// Self-reported confidence in [0, 1].
    pub confidence: f64,

    #[serde(default)]
    pub reasoning: String,
}

impl OptionsDecision {
    /// The do-nothing verdict used whenever a completion cannot be parsed.
    pub fn skip() -> Self {
        Self {
            action: OptionsAction::Skip,
            confidence: 0.0,
            reasoning: String::new(),
        }
    }
}

/// Decision oracle port trait
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DecisionOraclePort: Send + Sync {
    /// One-shot completion: system prompt plus user briefing in, text out.
    async fn complete(&self, system: &str, user: &str) -> Result<String, OracleError>;
}
