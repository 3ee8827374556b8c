//! Configuration Loading
//!
//! Parses the optional TOML config file and resolves API credentials
//! from the environment. Every section has usable defaults, so a
//! missing file still yields a paper-trading config; credentials are
//! checked when the adapter configs are built so the error names the
//! exact missing variable.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::adapters::{AlpacaConfig, OpenAiConfig, PolygonConfig};

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Runtime settings
    #[serde(default)]
    pub general: GeneralSection,

    /// Alpaca brokerage and stock data
    #[serde(default)]
    pub alpaca: AlpacaSection,

    /// Polygon options data
    #[serde(default)]
    pub polygon: PolygonSection,

    /// OpenAI decision oracle
    #[serde(default)]
    pub openai: OpenAiSection,
}

/// General runtime settings
#[derive(Debug, Clone, Deserialize)]
pub struct GeneralSection {
    /// Directory for the state file and snapshots; tilde is expanded
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Route orders to Alpaca's paper-trading host
    #[serde(default = "default_paper_mode")]
    pub paper_mode: bool,

    /// Equity universe scanned each cycle, merged with the policy watchlist
    #[serde(default = "default_universe")]
    pub universe: Vec<String>,

    /// Tickers eligible for the zero-DTE options loop
    #[serde(default = "default_zero_dte_universe")]
    pub zero_dte_universe: Vec<String>,
}

impl Default for GeneralSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            paper_mode: default_paper_mode(),
            universe: default_universe(),
            zero_dte_universe: default_zero_dte_universe(),
        }
    }
}

/// Alpaca settings. Credentials prefer the `ALPACA_KEY_ID` and
/// `ALPACA_SECRET_KEY` environment variables over the file.
#[derive(Debug, Clone, Deserialize)]
pub struct AlpacaSection {
    #[serde(default)]
    pub key_id: String,

    #[serde(default)]
    pub secret_key: String,

    /// Market data host; the trading host follows `general.paper_mode`
    #[serde(default = "default_alpaca_data_url")]
    pub data_url: String,
}

impl Default for AlpacaSection {
    fn default() -> Self {
        Self {
            key_id: String::new(),
            secret_key: String::new(),
            data_url: default_alpaca_data_url(),
        }
    }
}

impl AlpacaSection {
    /// Key ID with environment override
    pub fn get_key_id(&self) -> String {
        std::env::var("ALPACA_KEY_ID").unwrap_or_else(|_| self.key_id.clone())
    }

    /// Secret key with environment override
    pub fn get_secret_key(&self) -> String {
        std::env::var("ALPACA_SECRET_KEY").unwrap_or_else(|_| self.secret_key.clone())
    }
}

/// Polygon settings. The API key prefers the `POLYGON_API_KEY`
/// environment variable over the file.
#[derive(Debug, Clone, Deserialize)]
pub struct PolygonSection {
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_polygon_base_url")]
    pub base_url: String,
}

impl Default for PolygonSection {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_polygon_base_url(),
        }
    }
}

impl PolygonSection {
    /// API key with environment override
    pub fn get_api_key(&self) -> String {
        std::env::var("POLYGON_API_KEY").unwrap_or_else(|_| self.api_key.clone())
    }
}

/// OpenAI settings. The API key prefers the `OPENAI_API_KEY`
/// environment variable over the file.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiSection {
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    #[serde(default = "default_openai_model")]
    pub model: String,
}

impl Default for OpenAiSection {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_openai_base_url(),
            model: default_openai_model(),
        }
    }
}

impl OpenAiSection {
    /// API key with environment override
    pub fn get_api_key(&self) -> String {
        std::env::var("OPENAI_API_KEY").unwrap_or_else(|_| self.api_key.clone())
    }
}

fn default_data_dir() -> String {
    "~/.gexbot".to_string()
}

fn default_paper_mode() -> bool {
    true
}

fn default_universe() -> Vec<String> {
    ["SPY", "QQQ", "AAPL", "MSFT", "NVDA", "TSLA", "AMZN", "META"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_zero_dte_universe() -> Vec<String> {
    ["SPY", "QQQ"].iter().map(|s| s.to_string()).collect()
}

fn default_alpaca_data_url() -> String {
    "https://data.alpaca.markets".to_string()
}

fn default_polygon_base_url() -> String {
    "https://api.polygon.io".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation failed: {0}")]
    ValidationError(String),
}

impl Config {
    /// Validate structural settings. Credential checks live in the
    /// adapter-config builders, not here.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.general.data_dir.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "general.data_dir must not be empty".to_string(),
            ));
        }

        if self.general.universe.iter().all(|t| t.trim().is_empty()) {
            return Err(ConfigError::ValidationError(
                "general.universe must list at least one ticker".to_string(),
            ));
        }

        if self
            .general
            .zero_dte_universe
            .iter()
            .all(|t| t.trim().is_empty())
        {
            return Err(ConfigError::ValidationError(
                "general.zero_dte_universe must list at least one ticker".to_string(),
            ));
        }

        for (name, url) in [
            ("alpaca.data_url", &self.alpaca.data_url),
            ("polygon.base_url", &self.polygon.base_url),
            ("openai.base_url", &self.openai.base_url),
        ] {
            if !url.starts_with("http") {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be an http(s) URL, got '{}'",
                    name, url
                )));
            }
        }

        if self.openai.model.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "openai.model must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Data directory with the tilde expanded
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.general.data_dir).into_owned())
    }

    /// Build the Alpaca client config. Picks the trading host from
    /// `paper_mode` and requires credentials.
    pub fn alpaca_config(&self) -> Result<AlpacaConfig, ConfigError> {
        let key_id = self.alpaca.get_key_id();
        let secret_key = self.alpaca.get_secret_key();
        if key_id.is_empty() || secret_key.is_empty() {
            return Err(ConfigError::ValidationError(
                "Alpaca credentials missing: set ALPACA_KEY_ID and ALPACA_SECRET_KEY \
                 or fill in the [alpaca] section"
                    .to_string(),
            ));
        }

        let trading_host = if self.general.paper_mode {
            AlpacaConfig::PAPER_TRADING_HOST.to_string()
        } else {
            AlpacaConfig::LIVE_TRADING_HOST.to_string()
        };

        Ok(AlpacaConfig {
            trading_host,
            data_host: self.alpaca.data_url.clone(),
            key_id,
            secret_key,
            ..AlpacaConfig::default()
        })
    }

    /// Build the Polygon client config, requiring an API key.
    pub fn polygon_config(&self) -> Result<PolygonConfig, ConfigError> {
        let api_key = self.polygon.get_api_key();
        if api_key.is_empty() {
            return Err(ConfigError::ValidationError(
                "Polygon API key missing: set POLYGON_API_KEY or fill in the [polygon] section"
                    .to_string(),
            ));
        }

        Ok(PolygonConfig {
            base_url: self.polygon.base_url.clone(),
            api_key,
            ..PolygonConfig::default()
        })
    }

    /// Build the OpenAI client config, requiring an API key.
    pub fn openai_config(&self) -> Result<OpenAiConfig, ConfigError> {
        let api_key = self.openai.get_api_key();
        if api_key.is_empty() {
            return Err(ConfigError::ValidationError(
                "OpenAI API key missing: set OPENAI_API_KEY or fill in the [openai] section"
                    .to_string(),
            ));
        }

        Ok(OpenAiConfig {
            base_url: self.openai.base_url.clone(),
            api_key,
            model: self.openai.model.clone(),
            ..OpenAiConfig::default()
        })
    }
}

/// Load and validate configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

/// Resolve the effective config. An explicit path must exist; with no
/// path, the default location is used when present and built-in
/// defaults otherwise.
pub fn load_or_default(path: Option<&Path>) -> Result<Config, ConfigError> {
    match path {
        Some(p) => load_config(p),
        None => {
            let fallback = default_config_path();
            if fallback.is_file() {
                load_config(fallback)
            } else {
                Ok(Config::default())
            }
        }
    }
}

/// Default config file location, alongside the default data dir
pub fn default_config_path() -> PathBuf {
    PathBuf::from(shellexpand::tilde("~/.gexbot/config.toml").into_owned())
}
