//! Up-or-Down Collector Library
//!
//! Collects Polymarket "Bitcoin up or down" price exports and normalizes them
//! to the 16:00 UTC to 16:00 UTC settlement window of each daily market.

pub mod collector;
pub mod config;
pub mod exporter;
pub mod market;
pub mod normalizer;
pub mod oracle;
pub mod persistence;
pub mod types;

pub use collector::{default_target_date, CollectionReport, DailyCollector};
pub use normalizer::{NormalizeError, WindowNormalizer};
pub use types::{CanonicalPriceRow, NormalizationResult, RawPriceRow, SettlementWindow};
