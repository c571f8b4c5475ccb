//! End-to-end runs of the sync pipeline against in-memory sources and tables.

use chrono::NaiveDate;
use histsync_core::data::{
    DataSource, FetchError, FetchWindow, HistoricalSource, NormalizedRecord, RawFrame,
    RawObservation,
};
use histsync_core::load::{LoadError, TableRef, TableSchema, TableSink};
use histsync_core::{HistoricalDataSync, RunOutcome, SyncError, SyncJob};
use polars::prelude::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

// ── Fixtures ─────────────────────────────────────────────────────────

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn obs(date: NaiveDate, close: f64, volume: f64) -> RawObservation {
    RawObservation {
        timestamp: date.and_hms_opt(0, 0, 0).unwrap(),
        open: close,
        high: close,
        low: close,
        close,
        volume,
    }
}

fn job(dry_run: bool) -> SyncJob {
    SyncJob {
        instrument: "BTC-USD".into(),
        window: FetchWindow::new(d(2024, 8, 1), d(2024, 8, 3)),
        table: TableRef::new("proj", "btc_investments", "historical_btc_prices"),
        schema: TableSchema::default(),
        dry_run,
    }
}

/// Source that hands out a prepared frame, or an error.
enum StubSource {
    Frame(DataFrame),
    Empty,
    Unavailable,
}

impl HistoricalSource for StubSource {
    fn source(&self) -> DataSource {
        DataSource::YahooFinance
    }

    fn fetch(&self, instrument: &str, window: FetchWindow) -> Result<RawFrame, FetchError> {
        match self {
            StubSource::Frame(df) => Ok(RawFrame::from_dataframe(df.clone())),
            StubSource::Empty => Err(FetchError::EmptyResult {
                instrument: instrument.to_string(),
                window,
            }),
            StubSource::Unavailable => Err(FetchError::SourceUnavailable("connection reset".into())),
        }
    }
}

fn grouped(observations: &[RawObservation]) -> StubSource {
    StubSource::Frame(
        RawFrame::grouped("BTC-USD", observations)
            .unwrap()
            .into_dataframe(),
    )
}

/// In-memory warehouse: table path → rows, plus a call counter.
#[derive(Clone, Default)]
struct MemoryWarehouse {
    tables: Arc<Mutex<HashMap<String, Vec<NormalizedRecord>>>>,
    calls: Arc<Mutex<usize>>,
    reject_with: Option<&'static str>,
}

impl MemoryWarehouse {
    fn rows(&self, table: &TableRef) -> Option<Vec<NormalizedRecord>> {
        self.tables.lock().unwrap().get(&table.to_string()).cloned()
    }

    fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }

    fn seed(&self, table: &TableRef, rows: Vec<NormalizedRecord>) {
        self.tables.lock().unwrap().insert(table.to_string(), rows);
    }
}

impl TableSink for MemoryWarehouse {
    fn load(
        &self,
        records: &[NormalizedRecord],
        table: &TableRef,
        schema: &TableSchema,
    ) -> Result<u64, LoadError> {
        *self.calls.lock().unwrap() += 1;
        schema.validate(records)?;
        if let Some(reason) = self.reject_with {
            return Err(LoadError::LoadJob(reason.into()));
        }
        self.tables
            .lock()
            .unwrap()
            .insert(table.to_string(), records.to_vec());
        Ok(records.len() as u64)
    }
}

fn sync(source: StubSource, warehouse: &MemoryWarehouse, dry_run: bool) -> HistoricalDataSync {
    HistoricalDataSync::new(job(dry_run), Box::new(source), Box::new(warehouse.clone()))
}

fn scenario() -> Vec<RawObservation> {
    vec![
        obs(d(2024, 8, 1), 64000.2, 1200000000.7),
        obs(d(2024, 8, 2), 63500.9, 980000000.1),
    ]
}

fn scenario_records() -> Vec<NormalizedRecord> {
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
}

// ── Runs ─────────────────────────────────────────────────────────────

#[test]
fn grouped_history_replaces_table() {
    let warehouse = MemoryWarehouse::default();
    let table = job(false).table;
    warehouse.seed(
        &table,
        vec![NormalizedRecord {
            date: d(2020, 1, 1),
            price: 7200,
            volume: 1,
        }],
    );

    let report = sync(grouped(&scenario()), &warehouse, false).run();

    assert!(matches!(report.outcome, RunOutcome::Loaded { rows_written: 2 }));
    assert_eq!(report.records, 2);
    assert_eq!(warehouse.rows(&table), Some(scenario_records()));
    assert_eq!(report.source, DataSource::YahooFinance);
}

#[test]
fn empty_fetch_never_touches_the_table() {
    let warehouse = MemoryWarehouse::default();
    let report = sync(StubSource::Empty, &warehouse, false).run();

    assert!(matches!(report.outcome, RunOutcome::NoData));
    assert_eq!(report.outcome.exit_code(), 2);
    assert_eq!(warehouse.calls(), 0);
    assert!(report.fingerprint.is_none());
}

#[test]
fn zero_row_frame_never_truncates_the_table() {
    let warehouse = MemoryWarehouse::default();
    let table = job(false).table;
    warehouse.seed(&table, scenario_records());
    let empty = RawFrame::flat(&[]).unwrap().into_dataframe();

    let report = sync(StubSource::Frame(empty), &warehouse, false).run();

    assert!(matches!(report.outcome, RunOutcome::NoData));
    assert_eq!(report.outcome.exit_code(), 2);
    assert_eq!(warehouse.calls(), 0);
    assert_eq!(warehouse.rows(&table), Some(scenario_records()));
}

#[test]
fn missing_volume_fails_before_upload() {
    let df = RawFrame::flat(&scenario())
        .unwrap()
        .into_dataframe()
        .drop("Volume")
        .unwrap();
    let warehouse = MemoryWarehouse::default();

    let report = sync(StubSource::Frame(df), &warehouse, false).run();

    match &report.outcome {
        RunOutcome::Failed(SyncError::Normalize(err)) => {
            assert!(err.to_string().contains("Volume"));
        }
        other => panic!("expected normalize failure, got {other:?}"),
    }
    assert_eq!(warehouse.calls(), 0);
}

#[test]
fn source_failure_is_reported_not_raised() {
    let warehouse = MemoryWarehouse::default();
    let report = sync(StubSource::Unavailable, &warehouse, false).run();

    assert!(matches!(
        report.outcome,
        RunOutcome::Failed(SyncError::Fetch(FetchError::SourceUnavailable(_)))
    ));
    assert_eq!(report.outcome.exit_code(), 1);
    assert_eq!(warehouse.calls(), 0);
}

#[test]
fn rejected_load_leaves_previous_contents() {
    let warehouse = MemoryWarehouse {
        reject_with: Some("quota exceeded"),
        ..Default::default()
    };
    let table = job(false).table;
    let previous = vec![NormalizedRecord {
        date: d(2020, 1, 1),
        price: 7200,
        volume: 1,
    }];
    warehouse.seed(&table, previous.clone());

    let report = sync(grouped(&scenario()), &warehouse, false).run();

    assert!(matches!(
        report.outcome,
        RunOutcome::Failed(SyncError::Load(LoadError::LoadJob(_)))
    ));
    assert_eq!(warehouse.rows(&table), Some(previous));
}

#[test]
fn negative_price_is_a_schema_violation() {
    let warehouse = MemoryWarehouse::default();
    let report = sync(
        grouped(&[obs(d(2024, 8, 1), -3.5, 10.0)]),
        &warehouse,
        false,
    )
    .run();

    assert!(matches!(
        report.outcome,
        RunOutcome::Failed(SyncError::Load(LoadError::SchemaViolation(_)))
    ));
    assert!(warehouse.rows(&job(false).table).is_none());
}

#[test]
fn dry_run_normalizes_without_uploading() {
    let warehouse = MemoryWarehouse::default();
    let report = sync(grouped(&scenario()), &warehouse, true).run();

    assert!(matches!(report.outcome, RunOutcome::DryRun { rows: 2 }));
    assert_eq!(report.outcome.exit_code(), 0);
    assert_eq!(warehouse.calls(), 0);
    assert_eq!(report.preview, scenario_records());
}

#[test]
fn rerun_over_unchanged_data_is_idempotent() {
    let warehouse = MemoryWarehouse::default();
    let table = job(false).table;

    let first = sync(grouped(&scenario()), &warehouse, false).run();
    let after_first = warehouse.rows(&table);
    let second = sync(grouped(&scenario()), &warehouse, false).run();

    assert_eq!(first.fingerprint, second.fingerprint);
    assert!(first.fingerprint.is_some());
    assert_eq!(warehouse.rows(&table), after_first);
    assert_eq!(warehouse.calls(), 2);
}

#[test]
fn preview_holds_the_last_five_records() {
    let observations: Vec<RawObservation> = (1..=9)
        .map(|day| obs(d(2024, 8, day), 60000.0 + day as f64, 1e9))
        .collect();
    let warehouse = MemoryWarehouse::default();

    let report = sync(grouped(&observations), &warehouse, true).run();

    let dates: Vec<NaiveDate> = report.preview.iter().map(|r| r.date).collect();
    assert_eq!(dates, (5..=9).map(|day| d(2024, 8, day)).collect::<Vec<_>>());
}
