//! CSV import source.
//!
//! Reads a flat daily-history export (`Date,Open,High,Low,Close,Volume`, any
//! extra columns ignored) and serves the rows inside the requested window.
//! This is the fallback when the online provider is unreachable.

use super::frame::{RawFrame, DATE};
use super::provider::{DataSource, FetchError, FetchWindow, HistoricalSource};
use polars::prelude::*;
use std::path::{Path, PathBuf};
use tracing::info;

/// Source backed by a local CSV file.
pub struct CsvSource {
    path: PathBuf,
}

impl CsvSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self, window: FetchWindow) -> Result<DataFrame, FetchError> {
        let lf = LazyCsvReader::new(&self.path)
            .with_has_header(true)
            .with_try_parse_dates(true)
            .finish()
            .map_err(|e| FetchError::SourceUnavailable(format!("{}: {e}", self.path.display())))?;

        let schema = lf
            .clone()
            .collect_schema()
            .map_err(|e| FetchError::ResponseFormatChanged(format!("reading header: {e}")))?;

        // Without a date column there is nothing to window on; the normalizer
        // reports the missing field.
        let lf = if let Some(dtype) = schema.get(DATE) {
            // An unparsed date would cast to null and empty the window.
            if !matches!(dtype, DataType::Date | DataType::Datetime(_, _)) {
                return Err(FetchError::ResponseFormatChanged(format!(
                    "column '{DATE}' is not a YYYY-MM-DD date (read as {dtype})"
                )));
            }
            let day = col(DATE).cast(DataType::Date);
            lf.filter(
                day.clone()
                    .gt_eq(lit(window.start))
                    .and(day.lt(lit(window.end))),
            )
        } else {
            lf
        };

        lf.collect()
            .map_err(|e| FetchError::ResponseFormatChanged(format!("parsing CSV: {e}")))
    }
}

impl HistoricalSource for CsvSource {
    fn source(&self) -> DataSource {
        DataSource::CsvImport
    }

    fn fetch(&self, instrument: &str, window: FetchWindow) -> Result<RawFrame, FetchError> {
        if !self.path.exists() {
            return Err(FetchError::SourceUnavailable(format!(
                "CSV file not found: {}",
                self.path.display()
            )));
        }

        let df = self.read(window)?;
        if df.height() == 0 {
            return Err(FetchError::EmptyResult {
                instrument: instrument.to_string(),
                window,
            });
        }

        info!(rows = df.height(), path = %self.path.display(), "read {instrument} from CSV");
        Ok(RawFrame::from_dataframe(df))
    }
}
