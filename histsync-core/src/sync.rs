//! The sync pipeline: fetch → normalize → full-replace load.
//!
//! `HistoricalDataSync::run` is the only error boundary. Every stage returns a
//! typed error; `run` turns them into a `RunOutcome` and logs remediation
//! hints, so nothing propagates out of a run.

use crate::config::{ConfigError, SyncConfig};
use crate::data::{
    CsvSource, DataSource, FetchError, FetchWindow, HistoricalSource, NormalizeError,
    NormalizedRecord, Normalizer, YahooProvider,
};
use crate::fingerprint::RecordFingerprint;
use crate::load::{BigQueryLoader, DeferredAuth, LoadError, TableRef, TableSchema, TableSink};
use chrono::NaiveDate;
use std::fmt;
use thiserror::Error;
use tracing::{error, info, warn};

/// Number of trailing records shown before upload.
pub const PREVIEW_ROWS: usize = 5;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
    #[error(transparent)]
    Load(#[from] LoadError),
}

impl SyncError {
    /// Pipeline stage the error came from.
    pub fn stage(&self) -> &'static str {
        match self {
            SyncError::Config(_) => "config",
            SyncError::Fetch(_) => "fetch",
            SyncError::Normalize(_) => "normalize",
            SyncError::Load(_) => "load",
        }
    }
}

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// The table now holds exactly the fetched records.
    Loaded { rows_written: u64 },
    /// The source had nothing for the window; the table was not touched.
    NoData,
    /// Fetched and normalized, upload skipped.
    DryRun { rows: usize },
    /// A stage failed; the table was not modified by this run.
    Failed(SyncError),
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Loaded { .. } | RunOutcome::DryRun { .. })
    }

    /// Process exit code: 0 loaded or dry run, 2 no data, 1 failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            RunOutcome::Loaded { .. } | RunOutcome::DryRun { .. } => 0,
            RunOutcome::NoData => 2,
            RunOutcome::Failed(_) => 1,
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Loaded { rows_written } => write!(f, "loaded {rows_written} rows"),
            RunOutcome::NoData => write!(f, "no data"),
            RunOutcome::DryRun { rows } => write!(f, "dry run, {rows} rows not uploaded"),
            RunOutcome::Failed(err) => write!(f, "failed in {} stage: {err}", err.stage()),
        }
    }
}

/// What one run did.
#[derive(Debug)]
pub struct RunReport {
    pub instrument: String,
    pub window: FetchWindow,
    pub table: TableRef,
    pub source: DataSource,
    /// Normalized record count; zero when the run stopped before normalizing.
    pub records: usize,
    pub fingerprint: Option<RecordFingerprint>,
    /// The last `PREVIEW_ROWS` records.
    pub preview: Vec<NormalizedRecord>,
    pub outcome: RunOutcome,
}

/// Resolved parameters of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncJob {
    pub instrument: String,
    pub window: FetchWindow,
    pub table: TableRef,
    pub schema: TableSchema,
    pub dry_run: bool,
}

impl SyncJob {
    /// Resolve a config into a job; an unset end date becomes `today`.
    pub fn from_config(config: &SyncConfig, today: NaiveDate) -> Result<Self, ConfigError> {
        config.validate(today)?;
        Ok(Self {
            instrument: config.instrument.trim().to_string(),
            window: config.window(today)?,
            table: config.table_ref()?,
            schema: config.schema(),
            dry_run: config.dry_run,
        })
    }
}

/// Drives one fetch → normalize → load run.
pub struct HistoricalDataSync {
    job: SyncJob,
    source: Box<dyn HistoricalSource>,
    sink: Box<dyn TableSink>,
}

impl HistoricalDataSync {
    pub fn new(job: SyncJob, source: Box<dyn HistoricalSource>, sink: Box<dyn TableSink>) -> Self {
        Self { job, source, sink }
    }

    /// Wire the production source and loader from a config.
    ///
    /// Credentials are resolved when the loader asks for a token, so a
    /// credential problem shows up as a failed run rather than here.
    pub fn from_config(config: &SyncConfig, today: NaiveDate) -> Result<Self, SyncError> {
        let job = SyncJob::from_config(config, today)?;

        let source: Box<dyn HistoricalSource> = match &config.csv {
            Some(path) => Box::new(CsvSource::new(path)),
            None => Box::new(YahooProvider::new()?),
        };

        let sink = BigQueryLoader::new(Box::new(DeferredAuth::new(config.credentials.clone())))?
            .with_location(config.location.clone())
            .with_poll_interval(config.poll_interval());

        Ok(Self::new(job, source, Box::new(sink)))
    }

    pub fn job(&self) -> &SyncJob {
        &self.job
    }

    /// Run the pipeline once. Never panics on stage errors and never returns one.
    pub fn run(&self) -> RunReport {
        let job = &self.job;
        let mut report = RunReport {
            instrument: job.instrument.clone(),
            window: job.window,
            table: job.table.clone(),
            source: self.source.source(),
            records: 0,
            fingerprint: None,
            preview: Vec::new(),
            outcome: RunOutcome::NoData,
        };

        info!(
            instrument = %job.instrument,
            source = %report.source,
            "starting sync of {} into {}",
            job.instrument,
            job.table
        );
        info!("fetching data from {}", job.window);

        let records = match self.fetch_and_normalize() {
            Ok(records) => records,
            Err(SyncError::Fetch(err)) if err.is_empty_result() => {
                info!("{err}; check the instrument symbol and date range. Table left unchanged.");
                return report;
            }
            Err(err) => {
                self.log_failure(&err);
                report.outcome = RunOutcome::Failed(err);
                return report;
            }
        };

        // A zero-row frame must never reach a truncating load.
        if records.is_empty() {
            let err = FetchError::EmptyResult {
                instrument: job.instrument.clone(),
                window: job.window,
            };
            info!("{err}; check the instrument symbol and date range. Table left unchanged.");
            return report;
        }

        let fingerprint = RecordFingerprint::of(&records);
        report.records = records.len();
        report.preview = records[records.len().saturating_sub(PREVIEW_ROWS)..].to_vec();

        info!(
            rows = records.len(),
            fingerprint = fingerprint.short(),
            "normalized {} rows of {} history",
            records.len(),
            job.instrument
        );
        info!(columns = ?job.schema.field_names(), "destination columns");
        self.log_preview(&report.preview);
        report.fingerprint = Some(fingerprint);

        if job.dry_run {
            info!("dry run: skipping upload to {}", job.table);
            report.outcome = RunOutcome::DryRun {
                rows: records.len(),
            };
            return report;
        }

        info!("uploading to {}", job.table);
        match self.sink.load(&records, &job.table, &job.schema) {
            Ok(rows_written) => {
                info!("loaded {rows_written} rows into {}", job.table);
                report.outcome = RunOutcome::Loaded { rows_written };
            }
            Err(err) => {
                let err = SyncError::from(err);
                self.log_failure(&err);
                report.outcome = RunOutcome::Failed(err);
            }
        }

        report
    }

    fn fetch_and_normalize(&self) -> Result<Vec<NormalizedRecord>, SyncError> {
        let frame = self.source.fetch(&self.job.instrument, self.job.window)?;
        info!(
            rows = frame.height(),
            columns = ?frame.column_names(),
            "fetched raw frame"
        );
        Ok(Normalizer::normalize(frame)?)
    }

    fn log_preview(&self, preview: &[NormalizedRecord]) {
        let columns = self.job.schema.columns();
        info!(
            "last {} rows to upload: {} | {} | {}",
            preview.len(),
            columns.date,
            columns.price,
            columns.volume
        );
        for record in preview {
            info!("  {} | {} | {}", record.date, record.price, record.volume);
        }
    }

    fn log_failure(&self, err: &SyncError) {
        let table = &self.job.table;
        error!(stage = err.stage(), "sync failed: {err}");
        warn!("please check:");
        warn!("1. network access to the market data source and the BigQuery API");
        warn!("2. the histsync binary is a complete, current build");
        warn!(
            "3. project '{}', dataset '{}' and table '{}' are correct",
            table.project, table.dataset, table.table
        );
        warn!("4. credentials are configured and the identity holds BigQuery Data Editor and Job User");
    }
}
