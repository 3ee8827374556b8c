//! Trading Policy
//!
//! Runtime-adjustable risk and execution limits, plus the dangerous-mode
//! switch that swaps the whole set for looser overrides and restores the
//! operator's own values on the way back.
//!
//! Values set through `set_key` are validated and normalized here so every
//! caller (CLI, control loop, status rendering) sees the same sanitized
//! policy. Percent-style keys accept either a fraction or a human percent:
//! `0.05` and `5` both mean five percent.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug, Clone)]
pub enum PolicyError {
    #[error("unknown config key '{key}' (see `config list` for valid keys)")]
    UnknownKey { key: String },
    #[error("invalid value '{value}' for {key}: {hint}")]
    InvalidValue {
        key: String,
        value: String,
        hint: String,
    },
}

/// The full adjustable policy. Fields are plain so the loops can read them
/// without accessor ceremony; all writes go through `PolicyEngine::set_key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingPolicy {
    /// Fraction of cash committed per equity entry.
    pub position_size_percent: f64,
    pub max_trade_dollar_amount: f64,
    pub min_trade_dollar_amount: f64,
    pub stop_loss_percent: f64,
    pub take_profit_percent: f64,
    /// Daily drawdown (vs prior close equity) that halts new entries.
    pub daily_loss_limit_percent: f64,
    /// Floor on oracle confidence before an entry is considered.
    pub min_confidence: f64,
    pub max_positions: u32,
    pub cooldown_minutes: u32,
    pub scan_interval_seconds: u64,
    /// Per-trade contract budget for the zero-DTE loop, in dollars.
    pub max_premium_budget: f64,
    pub allow_shorting: bool,
    pub crypto_enabled: bool,
    pub autonomous_enabled: bool,
    /// When the daily-loss check itself errors, trade anyway (true) or halt.
    pub fail_open_daily_loss: bool,
    pub watchlist: Vec<String>,
}

impl Default for TradingPolicy {
    fn default() -> Self {
        Self {
            position_size_percent: 0.05,
            max_trade_dollar_amount: 5_000.0,
            min_trade_dollar_amount: 100.0,
            stop_loss_percent: 0.05,
            take_profit_percent: 0.10,
            daily_loss_limit_percent: 0.03,
            min_confidence: 0.6,
            max_positions: 5,
            cooldown_minutes: 60,
            scan_interval_seconds: 300,
            max_premium_budget: 500.0,
            allow_shorting: false,
            crypto_enabled: false,
            autonomous_enabled: false,
            fail_open_daily_loss: true,
            watchlist: Vec::new(),
        }
    }
}

impl TradingPolicy {
    /// The loosened set applied when dangerous mode turns on. Keys it does
    /// not name keep their current values.
    fn apply_dangerous_overrides(&mut self) {
        self.position_size_percent = 0.10;
        self.max_trade_dollar_amount = 10_000.0;
        self.stop_loss_percent = 0.10;
        self.take_profit_percent = 0.20;
        self.daily_loss_limit_percent = 0.06;
        self.min_confidence = 0.5;
        self.max_positions = 10;
        self.cooldown_minutes = 15;
        self.scan_interval_seconds = 60;
        self.max_premium_budget = 1_000.0;
        self.allow_shorting = true;
        self.crypto_enabled = true;
    }
}

/// Result of a successful `set_key`, for CLI echo.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyChange {
    pub key: String,
    pub previous: String,
    pub current: String,
    /// True when a human percent (e.g. `5`) was converted to a fraction.
    pub auto_converted: bool,
}

/// Persisted engine state, written through the state store so dangerous
/// mode and the restore snapshot survive restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyState {
    pub policy: TradingPolicy,
    pub dangerous_mode: bool,
    pub pre_dangerous_snapshot: Option<TradingPolicy>,
}

/// All keys `set_key` accepts, in display order.
pub const POLICY_KEYS: &[&str] = &[
    "position_size_percent",
    "max_trade_dollar_amount",
    "min_trade_dollar_amount",
    "stop_loss_percent",
    "take_profit_percent",
    "daily_loss_limit_percent",
    "min_confidence",
    "max_positions",
    "cooldown_minutes",
    "scan_interval_seconds",
    "max_premium_budget",
    "allow_shorting",
    "crypto_enabled",
    "autonomous_enabled",
    "fail_open_daily_loss",
    "watchlist",
];

#[derive(Debug, Clone)]
pub struct PolicyEngine {
    policy: TradingPolicy,
    dangerous_mode: bool,
    /// Taken once when dangerous mode first turns on, untouched until the
    /// mode turns off again.
    pre_dangerous_snapshot: Option<TradingPolicy>,
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self {
            policy: TradingPolicy::default(),
            dangerous_mode: false,
            pre_dangerous_snapshot: None,
        }
    }
}

impl PolicyEngine {
    pub fn policy(&self) -> &TradingPolicy {
        &self.policy
    }

    pub fn is_dangerous(&self) -> bool {
        self.dangerous_mode
    }

    /// Set one key from operator input. Validation and normalization happen
    /// here so a bad value never lands in the live policy.
    pub fn set_key(&mut self, key: &str, raw: &str) -> Result<KeyChange, PolicyError> {
        let key = key.trim().to_lowercase();
        let raw = raw.trim();
        let previous = self.render_key(&key)?;
        let mut auto_converted = false;

        match key.as_str() {
            "position_size_percent" => {
                self.policy.position_size_percent =
                    parse_percent(&key, raw, &mut auto_converted)?;
            }
            "stop_loss_percent" => {
                self.policy.stop_loss_percent = parse_percent(&key, raw, &mut auto_converted)?;
            }
            "take_profit_percent" => {
                self.policy.take_profit_percent = parse_percent(&key, raw, &mut auto_converted)?;
            }
            "daily_loss_limit_percent" => {
                self.policy.daily_loss_limit_percent =
                    parse_percent(&key, raw, &mut auto_converted)?;
            }
            "min_confidence" => {
                let v = parse_number(&key, raw)?;
                if !(0.0..=1.0).contains(&v) {
                    return Err(invalid(&key, raw, "must be between 0 and 1"));
                }
                self.policy.min_confidence = v;
            }
            "max_trade_dollar_amount" => {
                self.policy.max_trade_dollar_amount = parse_positive(&key, raw)?;
            }
            "min_trade_dollar_amount" => {
                self.policy.min_trade_dollar_amount = parse_positive(&key, raw)?;
            }
            "max_premium_budget" => {
                self.policy.max_premium_budget = parse_positive(&key, raw)?;
            }
            "max_positions" => {
                self.policy.max_positions = parse_positive_int(&key, raw)? as u32;
            }
            "cooldown_minutes" => {
                self.policy.cooldown_minutes = parse_positive_int(&key, raw)? as u32;
            }
            "scan_interval_seconds" => {
                self.policy.scan_interval_seconds = parse_positive_int(&key, raw)?;
            }
            "allow_shorting" => {
                self.policy.allow_shorting = parse_bool(&key, raw)?;
            }
            "crypto_enabled" => {
                self.policy.crypto_enabled = parse_bool(&key, raw)?;
            }
            "autonomous_enabled" => {
                self.policy.autonomous_enabled = parse_bool(&key, raw)?;
            }
            "fail_open_daily_loss" => {
                self.policy.fail_open_daily_loss = parse_bool(&key, raw)?;
            }
            "watchlist" => {
                self.policy.watchlist = parse_watchlist(raw);
            }
            _ => return Err(PolicyError::UnknownKey { key }),
        }

        let current = self.render_key(&key)?;
        info!(%key, %previous, %current, "policy key updated");
        Ok(KeyChange {
            key,
            previous,
            current,
            auto_converted,
        })
    }

    /// Render one key's current value for `config get`.
    pub fn render_key(&self, key: &str) -> Result<String, PolicyError> {
        let p = &self.policy;
        let value = match key {
            "position_size_percent" => p.position_size_percent.to_string(),
            "max_trade_dollar_amount" => p.max_trade_dollar_amount.to_string(),
            "min_trade_dollar_amount" => p.min_trade_dollar_amount.to_string(),
            "stop_loss_percent" => p.stop_loss_percent.to_string(),
            "take_profit_percent" => p.take_profit_percent.to_string(),
            "daily_loss_limit_percent" => p.daily_loss_limit_percent.to_string(),
            "min_confidence" => p.min_confidence.to_string(),
            "max_positions" => p.max_positions.to_string(),
            "cooldown_minutes" => p.cooldown_minutes.to_string(),
            "scan_interval_seconds" => p.scan_interval_seconds.to_string(),
            "max_premium_budget" => p.max_premium_budget.to_string(),
            "allow_shorting" => p.allow_shorting.to_string(),
            "crypto_enabled" => p.crypto_enabled.to_string(),
            "autonomous_enabled" => p.autonomous_enabled.to_string(),
            "fail_open_daily_loss" => p.fail_open_daily_loss.to_string(),
            "watchlist" => p.watchlist.join(","),
            _ => {
                return Err(PolicyError::UnknownKey {
                    key: key.to_string(),
                })
            }
        };
        Ok(value)
    }

    /// Every key and its rendered value, for `config list` and status output.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        POLICY_KEYS
            .iter()
            .map(|k| (*k, self.render_key(k).unwrap_or_default()))
            .collect()
    }

    /// Turn dangerous mode on. Snapshots the current policy exactly once,
    /// then applies the loosened overrides. Returns false if already on.
    pub fn enable_dangerous(&mut self) -> bool {
        if self.dangerous_mode {
            return false;
        }
        self.pre_dangerous_snapshot = Some(self.policy.clone());
        self.policy.apply_dangerous_overrides();
        self.dangerous_mode = true;
        warn!("dangerous mode ENABLED, risk limits loosened");
        true
    }

    /// Turn dangerous mode off, restoring the pre-dangerous policy. Falls
    /// back to hard defaults when no snapshot exists (e.g. state restored
    /// from a partially written file). Flag and snapshot are cleared
    /// unconditionally. Returns false if already off.
    pub fn disable_dangerous(&mut self) -> bool {
        let was_on = self.dangerous_mode;
        if was_on {
            self.policy = self
                .pre_dangerous_snapshot
                .take()
                .unwrap_or_default();
            info!("dangerous mode disabled, prior policy restored");
        }
        self.dangerous_mode = false;
        self.pre_dangerous_snapshot = None;
        was_on
    }

    pub fn state(&self) -> PolicyState {
        PolicyState {
            policy: self.policy.clone(),
            dangerous_mode: self.dangerous_mode,
            pre_dangerous_snapshot: self.pre_dangerous_snapshot.clone(),
        }
    }

    pub fn from_state(state: PolicyState) -> Self {
        Self {
            policy: state.policy,
            dangerous_mode: state.dangerous_mode,
            pre_dangerous_snapshot: state.pre_dangerous_snapshot,
        }
    }
}

fn invalid(key: &str, value: &str, hint: &str) -> PolicyError {
    PolicyError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        hint: hint.to_string(),
    }
}

fn parse_number(key: &str, raw: &str) -> Result<f64, PolicyError> {
    let v: f64 = raw
        .parse()
        .map_err(|_| invalid(key, raw, "not a number"))?;
    if !v.is_finite() {
        return Err(invalid(key, raw, "not a finite number"));
    }
    Ok(v)
}

fn parse_positive(key: &str, raw: &str) -> Result<f64, PolicyError> {
    let v = parse_number(key, raw)?;
    if v <= 0.0 {
        return Err(invalid(key, raw, "must be positive"));
    }
    Ok(v)
}

fn parse_positive_int(key: &str, raw: &str) -> Result<u64, PolicyError> {
    let v: u64 = raw
        .parse()
        .map_err(|_| invalid(key, raw, "not a whole number"))?;
    if v == 0 {
        return Err(invalid(key, raw, "must be at least 1"));
    }
    Ok(v)
}

/// Percent-named keys store fractions. `(0, 1]` passes through, `(1, 100]`
/// is treated as a human percent and divided by 100, anything else rejects.
fn parse_percent(key: &str, raw: &str, auto_converted: &mut bool) -> Result<f64, PolicyError> {
    let v = parse_number(key, raw)?;
    if v <= 0.0 {
        return Err(invalid(key, raw, "must be positive"));
    }
    if v <= 1.0 {
        return Ok(v);
    }
    if v <= 100.0 {
        *auto_converted = true;
        return Ok(v / 100.0);
    }
    Err(invalid(key, raw, "percent cannot exceed 100"))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, PolicyError> {
    match raw.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(invalid(key, raw, "expected true/false, yes/no, or 1/0")),
    }
}

fn parse_watchlist(raw: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    raw.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.clone()))
        .collect()
}
