//! Symbol Cooldowns
//!
//! After a position in a symbol closes, re-entry is blocked for a
//! policy-controlled window so the loop does not churn the same name.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

/// Per-symbol re-entry locks, keyed by uppercase symbol.
#[derive(Debug, Clone, Default)]
pub struct CooldownMap {
    until: HashMap<String, DateTime<Utc>>,
}

impl CooldownMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or extend) a cooldown ending `minutes` from now.
    pub fn start(&mut self, symbol: &str, minutes: u32) {
        self.start_until(symbol, Utc::now() + Duration::minutes(i64::from(minutes)));
    }

    /// Start a cooldown with an explicit end instant. Restores and tests go
    /// through here.
    pub fn start_until(&mut self, symbol: &str, until: DateTime<Utc>) {
        self.until.insert(symbol.to_uppercase(), until);
    }

    pub fn is_active(&self, symbol: &str) -> bool {
        self.is_active_at(symbol, Utc::now())
    }

    pub fn is_active_at(&self, symbol: &str, now: DateTime<Utc>) -> bool {
        self.until
            .get(&symbol.to_uppercase())
            .is_some_and(|until| *until > now)
    }

    /// Time left on a symbol's cooldown, if one is running.
    pub fn remaining(&self, symbol: &str) -> Option<Duration> {
        let now = Utc::now();
        self.until
            .get(&symbol.to_uppercase())
            .and_then(|until| (*until > now).then(|| *until - now))
    }

    /// Drop expired entries. Called opportunistically at the top of a scan
    /// cycle; correctness never depends on it since `is_active` checks the
    /// clock itself.
    pub fn prune(&mut self) {
        self.prune_at(Utc::now());
    }

    pub fn prune_at(&mut self, now: DateTime<Utc>) {
        self.until.retain(|_, until| *until > now);
    }

    /// Active cooldowns sorted by symbol, for status output.
    pub fn active(&self) -> Vec<(String, DateTime<Utc>)> {
        let now = Utc::now();
        let mut entries: Vec<_> = self
            .until
            .iter()
            .filter(|(_, until)| **until > now)
            .map(|(s, u)| (s.clone(), *u))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn state(&self) -> HashMap<String, DateTime<Utc>> {
        self.until.clone()
    }

    pub fn from_state(until: HashMap<String, DateTime<Utc>>) -> Self {
        Self { until }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_cooldown_is_active() {
        let mut map = CooldownMap::new();
        map.start("AAPL", 60);
        assert!(map.is_active("AAPL"));
        assert!(map.remaining("AAPL").unwrap().num_minutes() >= 59);
        assert!(!map.is_active("MSFT"));
    }

    #[test]
    fn symbols_are_case_insensitive() {
        let mut map = CooldownMap::new();
        map.start("aapl", 60);
        assert!(map.is_active("AAPL"));
        assert!(map.is_active("aapl"));
    }

    #[test]
    fn expired_cooldown_is_inactive_even_before_pruning() {
        let mut map = CooldownMap::new();
        let past = Utc::now() - Duration::minutes(5);
        map.start_until("TSLA", past);
        assert!(!map.is_active("TSLA"));
        assert!(map.remaining("TSLA").is_none());
    }

    #[test]
    fn prune_drops_only_expired_entries() {
        let mut map = CooldownMap::new();
        let now = Utc::now();
        map.start_until("OLD", now - Duration::minutes(1));
        map.start_until("NEW", now + Duration::minutes(30));

        map.prune_at(now);
        let state = map.state();
        assert!(!state.contains_key("OLD"));
        assert!(state.contains_key("NEW"));
    }

    #[test]
    fn restart_restores_running_cooldowns() {
        let mut map = CooldownMap::new();
        map.start("NVDA", 45);
        let restored = CooldownMap::from_state(map.state());
        assert!(restored.is_active("NVDA"));
    }

    #[test]
    fn active_listing_is_sorted() {
        let mut map = CooldownMap::new();
        map.start("QQQ", 10);
        map.start("AAPL", 10);
        map.start("MSFT", 10);
        let symbols: Vec<_> = map.active().into_iter().map(|(s, _)| s).collect();
        assert_eq!(symbols, vec!["AAPL", "MSFT", "QQQ"]);
    }
}
