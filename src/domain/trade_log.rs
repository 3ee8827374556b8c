//! Trade Journal
//!
//! Bounded in-memory record of what the execution funnel did and why,
//! including candidates it refused to trade. The journal also derives an
//! advisory "mood" from recent closed outcomes; mood is display-only and
//! never gates an order.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Journal entries kept before the oldest fall off.
pub const MAX_JOURNAL_ENTRIES: usize = 200;

/// Closed outcomes considered when deriving mood.
const MOOD_WINDOW: usize = 10;

/// What happened to a candidate or position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JournalEvent {
    /// An order went out.
    Submitted {
        side: String,
        qty: f64,
        notional: f64,
    },
    /// A candidate was refused before any order.
    Blocked { reason: String },
    /// A position was flattened.
    Closed { pnl_percent: f64, reason: String },
    /// An order was attempted and the broker said no.
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub event: JournalEvent,
}

impl fmt::Display for JournalEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ts = self.timestamp.format("%Y-%m-%d %H:%M:%S");
        match &self.event {
            JournalEvent::Submitted {
                side,
                qty,
                notional,
            } => write!(
                f,
                "{ts} {} SUBMITTED {side} {qty} (${notional:.2})",
                self.symbol
            ),
            JournalEvent::Blocked { reason } => {
                write!(f, "{ts} {} BLOCKED: {reason}", self.symbol)
            }
            JournalEvent::Closed {
                pnl_percent,
                reason,
            } => write!(
                f,
                "{ts} {} CLOSED {pnl_percent:+.2}% ({reason})",
                self.symbol
            ),
            JournalEvent::Failed { error } => {
                write!(f, "{ts} {} FAILED: {error}", self.symbol)
            }
        }
    }
}

/// Advisory read on recent performance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mood {
    Confident,
    Steady,
    Cautious,
    Defensive,
}

impl fmt::Display for Mood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Mood::Confident => "confident",
            Mood::Steady => "steady",
            Mood::Cautious => "cautious",
            Mood::Defensive => "defensive",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradeJournal {
    entries: VecDeque<JournalEntry>,
    total_closed: u32,
    total_wins: u32,
}

impl TradeJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, symbol: &str, event: JournalEvent) {
        if let JournalEvent::Closed { pnl_percent, .. } = &event {
            self.total_closed += 1;
            if *pnl_percent >= 0.0 {
                self.total_wins += 1;
            }
        }
        self.entries.push_back(JournalEntry {
            timestamp: Utc::now(),
            symbol: symbol.to_uppercase(),
            event,
        });
        while self.entries.len() > MAX_JOURNAL_ENTRIES {
            self.entries.pop_front();
        }
    }

    pub fn submitted(&mut self, symbol: &str, side: &str, qty: f64, notional: f64) {
        self.record(
            symbol,
            JournalEvent::Submitted {
                side: side.to_string(),
                qty,
                notional,
            },
        );
    }

    pub fn blocked(&mut self, symbol: &str, reason: impl Into<String>) {
        self.record(
            symbol,
            JournalEvent::Blocked {
                reason: reason.into(),
            },
        );
    }

    pub fn closed(&mut self, symbol: &str, pnl_percent: f64, reason: impl Into<String>) {
        self.record(
            symbol,
            JournalEvent::Closed {
                pnl_percent,
                reason: reason.into(),
            },
        );
    }

    pub fn failed(&mut self, symbol: &str, error: impl Into<String>) {
        self.record(
            symbol,
            JournalEvent::Failed {
                error: error.into(),
            },
        );
    }

    /// Newest-last view of the latest `n` entries.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &JournalEntry> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_closed(&self) -> u32 {
        self.total_closed
    }

    pub fn win_rate(&self) -> Option<f64> {
        (self.total_closed > 0).then(|| f64::from(self.total_wins) / f64::from(self.total_closed))
    }

    /// Mood over the last `MOOD_WINDOW` closed outcomes still in the ring.
    /// With nothing closed yet the journal reads steady.
    pub fn mood(&self) -> Mood {
        let recent_closed: Vec<f64> = self
            .entries
            .iter()
            .rev()
            .filter_map(|e| match &e.event {
                JournalEvent::Closed { pnl_percent, .. } => Some(*pnl_percent),
                _ => None,
            })
            .take(MOOD_WINDOW)
            .collect();

        if recent_closed.is_empty() {
            return Mood::Steady;
        }
        let wins = recent_closed.iter().filter(|p| **p >= 0.0).count();
        let rate = wins as f64 / recent_closed.len() as f64;
        if rate >= 0.6 {
            Mood::Confident
        } else if rate >= 0.4 {
            Mood::Steady
        } else if rate >= 0.2 {
            Mood::Cautious
        } else {
            Mood::Defensive
        }
    }
}
