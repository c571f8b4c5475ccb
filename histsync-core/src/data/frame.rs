//! Raw tables as sources hand them to the normalizer.
//!
//! A raw frame comes in one of two layouts:
//! - flat: `Date, Open, High, Low, Close, Volume` (extra columns allowed)
//! - grouped: `Date` plus one struct column per instrument holding the OHLCV fields

use super::provider::RawObservation;
use polars::prelude::*;

pub const DATE: &str = "Date";
pub const OPEN: &str = "Open";
pub const HIGH: &str = "High";
pub const LOW: &str = "Low";
pub const CLOSE: &str = "Close";
pub const VOLUME: &str = "Volume";

/// Raw observations for one fetch, flat or grouped by instrument.
#[derive(Debug, Clone)]
pub struct RawFrame {
    df: DataFrame,
}

impl RawFrame {
    pub fn from_dataframe(df: DataFrame) -> Self {
        Self { df }
    }

    /// Build a flat frame, one row per observation in input order.
    pub fn flat(observations: &[RawObservation]) -> PolarsResult<Self> {
        let timestamps: Vec<i64> = observations
            .iter()
            .map(|o| o.timestamp.and_utc().timestamp_millis())
            .collect();
        let opens: Vec<f64> = observations.iter().map(|o| o.open).collect();
        let highs: Vec<f64> = observations.iter().map(|o| o.high).collect();
        let lows: Vec<f64> = observations.iter().map(|o| o.low).collect();
        let closes: Vec<f64> = observations.iter().map(|o| o.close).collect();
        let volumes: Vec<f64> = observations.iter().map(|o| o.volume).collect();

        let df = DataFrame::new(vec![
            Column::new(DATE.into(), timestamps)
                .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?,
            Column::new(OPEN.into(), opens),
            Column::new(HIGH.into(), highs),
            Column::new(LOW.into(), lows),
            Column::new(CLOSE.into(), closes),
            Column::new(VOLUME.into(), volumes),
        ])?;

        Ok(Self { df })
    }

    /// Build a frame whose OHLCV columns are nested under `instrument`.
    pub fn grouped(instrument: &str, observations: &[RawObservation]) -> PolarsResult<Self> {
        let flat = Self::flat(observations)?;
        let df = flat
            .df
            .lazy()
            .select([
                col(DATE),
                as_struct(vec![
                    col(OPEN),
                    col(HIGH),
                    col(LOW),
                    col(CLOSE),
                    col(VOLUME),
                ])
                .alias(instrument),
            ])
            .collect()?;

        Ok(Self { df })
    }

    pub fn height(&self) -> usize {
        self.df.height()
    }

    pub fn is_empty(&self) -> bool {
        self.df.height() == 0
    }

    /// Top-level column names, in order.
    pub fn column_names(&self) -> Vec<String> {
        self.df
            .get_column_names()
            .into_iter()
            .map(|name| name.to_string())
            .collect()
    }

    /// Names of the per-instrument groupings (struct columns).
    pub fn groups(&self) -> Vec<String> {
        self.df
            .get_columns()
            .iter()
            .filter(|c| matches!(c.dtype(), DataType::Struct(_)))
            .map(|c| c.name().to_string())
            .collect()
    }

    pub fn is_grouped(&self) -> bool {
        !self.groups().is_empty()
    }

    pub fn dataframe(&self) -> &DataFrame {
        &self.df
    }

    pub fn into_dataframe(self) -> DataFrame {
        self.df
    }
}
