//! Historical data source trait and structured fetch errors.
//!
//! The HistoricalSource trait abstracts over where raw daily observations come
//! from (Yahoo Finance, a CSV export) so the sync pipeline can swap
//! implementations and mock them in tests.

use super::frame::RawFrame;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// One daily observation as reported by the upstream source.
///
/// The timestamp may carry a time-of-day component; prices are NaN where
/// the source reported null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Date range requested from the source: `start` inclusive, `end` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl FetchWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// Whether a date falls inside the window.
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date < self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

impl fmt::Display for FetchWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

/// Structured error types for fetch operations.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The source answered but had no rows for the window. Not a failure.
    #[error("no data for '{instrument}' in window {window}")]
    EmptyResult {
        instrument: String,
        window: FetchWindow,
    },

    #[error("data source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),
}

impl FetchError {
    pub fn is_empty_result(&self) -> bool {
        matches!(self, FetchError::EmptyResult { .. })
    }
}

/// Where the data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataSource {
    YahooFinance,
    CsvImport,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::YahooFinance => write!(f, "yahoo_finance"),
            DataSource::CsvImport => write!(f, "csv_import"),
        }
    }
}

/// Trait for sources of daily history.
///
/// Implementations return the raw table exactly as the source shapes it,
/// flat or grouped by instrument. Reshaping is the normalizer's job.
pub trait HistoricalSource: Send + Sync {
    /// Which kind of source this is.
    fn source(&self) -> DataSource;

    /// Fetch daily observations for an instrument over a window.
    ///
    /// Nothing in the window should be reported as `FetchError::EmptyResult`.
    /// A zero-row `Ok` frame is still accepted and treated the same way: the
    /// run ends with no data and the destination is never loaded.
    fn fetch(&self, instrument: &str, window: FetchWindow) -> Result<RawFrame, FetchError>;
}
