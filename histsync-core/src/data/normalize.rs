//! Raw frame → normalized records.
//!
//! Every step is a hard contract:
//! 1. flatten a per-instrument grouping so rows are keyed by date alone
//! 2. select `Date`, `Close`, `Volume` (all three must be present)
//! 3. rename to `date`, `price`, `volume`
//! 4. reduce the date to a calendar date
//! 5. sort ascending by date, rejecting duplicates
//! 6. truncate price and volume toward zero into integers

use super::frame::{RawFrame, CLOSE, DATE, VOLUME};
use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Field names of the normalized shape.
pub const DATE_FIELD: &str = "date";
pub const PRICE_FIELD: &str = "price";
pub const VOLUME_FIELD: &str = "volume";

/// Raw columns the normalizer needs after flattening.
pub const REQUIRED_RAW_COLUMNS: [&str; 3] = [DATE, CLOSE, VOLUME];

/// One output row: a calendar date with whole-unit closing price and volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub date: NaiveDate,
    pub price: i64,
    pub volume: i64,
}

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("raw data is grouped under several instruments ({}); expected at most one", .0.join(", "))]
    AmbiguousGrouping(Vec<String>),

    #[error("raw data is missing required field(s) {missing:?}; columns found: {found:?}")]
    SchemaMismatch {
        missing: Vec<String>,
        found: Vec<String>,
    },

    #[error("date {0} appears more than once")]
    DuplicateDate(NaiveDate),

    #[error("null {field} at {at}")]
    MissingValue { field: String, at: String },

    #[error("frame operation failed: {0}")]
    Frame(#[from] PolarsError),
}

/// Turns raw frames into ordered, integer-valued records.
pub struct Normalizer;

impl Normalizer {
    /// Step 1: unnest the instrument grouping, if any.
    pub fn flatten(frame: RawFrame) -> Result<DataFrame, NormalizeError> {
        let groups = frame.groups();
        match groups.len() {
            0 => Ok(frame.into_dataframe()),
            1 => Ok(frame.into_dataframe().unnest([groups[0].as_str()])?),
            _ => Err(NormalizeError::AmbiguousGrouping(groups)),
        }
    }

    /// Run every step and collect the records.
    pub fn normalize(frame: RawFrame) -> Result<Vec<NormalizedRecord>, NormalizeError> {
        let flat = Self::flatten(frame)?;

        let found: Vec<String> = flat
            .get_column_names()
            .into_iter()
            .map(|name| name.to_string())
            .collect();
        debug!(columns = ?found, "columns after flattening");

        let missing: Vec<String> = REQUIRED_RAW_COLUMNS
            .iter()
            .filter(|required| !found.iter().any(|name| name == *required))
            .map(|required| required.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(NormalizeError::SchemaMismatch { missing, found });
        }

        // Float first, then Int64: the cast drops the fractional part.
        // NaN and out-of-range values become null and are rejected below.
        let out = flat
            .lazy()
            .select([
                col(DATE).cast(DataType::Date).alias(DATE_FIELD),
                col(CLOSE)
                    .cast(DataType::Float64)
                    .cast(DataType::Int64)
                    .alias(PRICE_FIELD),
                col(VOLUME)
                    .cast(DataType::Float64)
                    .cast(DataType::Int64)
                    .alias(VOLUME_FIELD),
            ])
            .sort(
                [DATE_FIELD],
                SortMultipleOptions::default().with_maintain_order(true),
            )
            .collect()?;

        Self::collect_records(&out)
    }

    fn collect_records(df: &DataFrame) -> Result<Vec<NormalizedRecord>, NormalizeError> {
        let date_ca = df.column(DATE_FIELD)?.date()?;
        let price_ca = df.column(PRICE_FIELD)?.i64()?;
        let volume_ca = df.column(VOLUME_FIELD)?.i64()?;

        let epoch = NaiveDate::default(); // 1970-01-01
        let mut records: Vec<NormalizedRecord> = Vec::with_capacity(df.height());

        for i in 0..df.height() {
            let days = date_ca.get(i).ok_or_else(|| NormalizeError::MissingValue {
                field: DATE_FIELD.into(),
                at: format!("row {i}"),
            })?;
            let date = epoch + chrono::Duration::days(days as i64);

            if let Some(prev) = records.last() {
                if prev.date == date {
                    return Err(NormalizeError::DuplicateDate(date));
                }
            }

            let price = price_ca.get(i).ok_or_else(|| NormalizeError::MissingValue {
                field: PRICE_FIELD.into(),
                at: date.to_string(),
            })?;
            let volume = volume_ca.get(i).ok_or_else(|| NormalizeError::MissingValue {
                field: VOLUME_FIELD.into(),
                at: date.to_string(),
            })?;

            records.push(NormalizedRecord {
                date,
                price,
                volume,
            });
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::provider::RawObservation;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn obs(date: NaiveDate, hour: u32, close: f64, volume: f64) -> RawObservation {
        RawObservation {
            timestamp: date.and_hms_opt(hour, 30, 0).unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume,
        }
    }

    #[test]
    fn grouped_scenario_truncates_and_orders() {
        let frame = RawFrame::grouped(
            "BTC-USD",
            &[
                obs(d(2024, 8, 2), 0, 63500.9, 980000000.1),
                obs(d(2024, 8, 1), 0, 64000.2, 1200000000.7),
            ],
        )
        .unwrap();

        let records = Normalizer::normalize(frame).unwrap();

        assert_eq!(
            records,
            vec![
                NormalizedRecord {
                    date: d(2024, 8, 1),
                    price: 64000,
                    volume: 1200000000,
                },
                NormalizedRecord {
                    date: d(2024, 8, 2),
                    price: 63500,
                    volume: 980000000,
                },
            ]
        );
    }

    #[test]
    fn flat_frames_pass_through_flatten() {
        let frame = RawFrame::flat(&[obs(d(2024, 8, 1), 0, 10.9, 5.5)]).unwrap();
        let flat = Normalizer::flatten(frame).unwrap();
        assert_eq!(flat.width(), 6);
    }

    #[test]
    fn time_of_day_is_dropped() {
        let frame = RawFrame::flat(&[obs(d(2024, 8, 1), 13, 10.0, 1.0)]).unwrap();
        let records = Normalizer::normalize(frame).unwrap();
        assert_eq!(records[0].date, d(2024, 8, 1));
    }

    #[test]
    fn truncates_toward_zero() {
        let frame = RawFrame::flat(&[
            obs(d(2024, 8, 1), 0, -0.0, 0.99),
            obs(d(2024, 8, 2), 0, -1.7, 2.0),
            obs(d(2024, 8, 3), 0, 64021.87, 7.999),
        ])
        .unwrap();

        let records = Normalizer::normalize(frame).unwrap();
        let prices: Vec<i64> = records.iter().map(|r| r.price).collect();
        let volumes: Vec<i64> = records.iter().map(|r| r.volume).collect();

        assert_eq!(prices, vec![0, -1, 64021]);
        assert_eq!(volumes, vec![0, 2, 7]);
    }

    #[test]
    fn names_every_missing_field() {
        let df = df!(
            "Date" => &[1i64],
            "Open" => &[1.0],
        )
        .unwrap();

        let err = Normalizer::normalize(RawFrame::from_dataframe(df)).unwrap_err();
        match err {
            NormalizeError::SchemaMismatch { missing, found } => {
                assert_eq!(missing, vec!["Close".to_string(), "Volume".to_string()]);
                assert_eq!(found, vec!["Date".to_string(), "Open".to_string()]);
            }
            other => panic!("expected SchemaMismatch, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_dates_are_rejected() {
        let frame = RawFrame::flat(&[
            obs(d(2024, 8, 1), 0, 1.0, 1.0),
            obs(d(2024, 8, 1), 12, 2.0, 2.0),
        ])
        .unwrap();

        let err = Normalizer::normalize(frame).unwrap_err();
        assert!(matches!(err, NormalizeError::DuplicateDate(date) if date == d(2024, 8, 1)));
    }

    #[test]
    fn nan_close_is_missing_value() {
        let frame = RawFrame::flat(&[obs(d(2024, 8, 1), 0, f64::NAN, 1.0)]).unwrap();

        let err = Normalizer::normalize(frame).unwrap_err();
        match err {
            NormalizeError::MissingValue { field, at } => {
                assert_eq!(field, "price");
                assert_eq!(at, "2024-08-01");
            }
            other => panic!("expected MissingValue, got {other:?}"),
        }
    }

    #[test]
    fn several_groupings_are_ambiguous() {
        let a = RawFrame::grouped("AAA", &[obs(d(2024, 8, 1), 0, 1.0, 1.0)]).unwrap();
        let b = RawFrame::grouped("BBB", &[obs(d(2024, 8, 1), 0, 1.0, 1.0)]).unwrap();
        let b_col = b.dataframe().column("BBB").unwrap().clone();
        let mut df = a.into_dataframe();
        df.with_column(b_col).unwrap();

        let err = Normalizer::normalize(RawFrame::from_dataframe(df)).unwrap_err();
        assert!(matches!(err, NormalizeError::AmbiguousGrouping(groups) if groups.len() == 2));
    }
}
