//! Polygon adapters: options chain snapshots and OCC symbol handling.

pub mod chain;
pub mod client;
pub mod symbols;

pub use chain::PolygonOptionsData;
pub use client::{PolygonApiError, PolygonClient, PolygonConfig};
pub use symbols::{occ_for_alpaca, parse_occ, strip_occ_prefix, OccSymbol};
