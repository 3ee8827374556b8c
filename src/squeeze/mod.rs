//! Gamma squeeze detection.
//!
//! - `score`: the composite 0-100 score and its four bounded components
//! - `tracker`: per-symbol state machine, bounded history, and the registry

pub mod score;
pub mod tracker;

pub use score::{composite_score, PriceSample, ScoreBreakdown};
pub use tracker::{
    next_state, ScoreSnapshot, SqueezeRegistry, SqueezeState, SqueezeTracker, SqueezeUpdate,
};
