//! histsync core: daily price history from a market-data source into a warehouse table.
//!
//! - Sources of raw daily history (Yahoo Finance chart API, CSV export)
//! - Normalization into ordered, integer-valued `(date, price, volume)` records
//! - Full-replace loading into BigQuery
//! - Layered run configuration
//! - The `HistoricalDataSync` orchestrator that ties them together

pub mod config;
pub mod data;
pub mod fingerprint;
pub mod load;
pub mod sync;

pub use config::{ConfigError, ConfigOverrides, SyncConfig};
pub use sync::{HistoricalDataSync, RunOutcome, RunReport, SyncError, SyncJob};
