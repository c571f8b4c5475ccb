//! Criterion benchmarks for the per-run hot paths.
//!
//! Benchmarks:
//! 1. Normalization of a grouped raw frame (unnest, cast, sort, collect)
//! 2. Parquet encoding of the normalized records

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use histsync_core::data::{Normalizer, RawFrame, RawObservation};
use histsync_core::load::encode::encode_parquet;
use histsync_core::load::TableSchema;

// ── Helpers ──────────────────────────────────────────────────────────

fn make_observations(n: usize) -> Vec<RawObservation> {
    let base = chrono::NaiveDate::from_ymd_opt(2015, 1, 1).unwrap();
    (0..n)
        .map(|i| {
            let close = 30_000.0 + (i as f64 * 0.1).sin() * 5_000.0;
            RawObservation {
                timestamp: (base + chrono::Duration::days(i as i64))
                    .and_hms_opt(0, 0, 0)
                    .unwrap(),
                open: close - 120.5,
                high: close + 800.25,
                low: close - 900.75,
                close,
                volume: 1.5e10 + (i % 1_000) as f64 * 1e6,
            }
        })
        .collect()
}

// ── Benchmarks ───────────────────────────────────────────────────────

fn bench_normalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("normalize");

    for &days in &[365, 3650] {
        let observations = make_observations(days);
        group.bench_with_input(BenchmarkId::new("grouped", days), &days, |b, _| {
            b.iter(|| {
                let frame = RawFrame::grouped("BTC-USD", black_box(&observations)).unwrap();
                Normalizer::normalize(frame).unwrap()
            });
        });
    }

    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_parquet");
    let schema = TableSchema::default();

    for &days in &[365, 3650] {
        let frame = RawFrame::flat(&make_observations(days)).unwrap();
        let records = Normalizer::normalize(frame).unwrap();
        group.bench_with_input(BenchmarkId::new("records", days), &days, |b, _| {
            b.iter(|| encode_parquet(black_box(&records), &schema).unwrap());
        });
    }

    group.finish();
}

criterion_group!(benches, bench_normalize, bench_encode);
criterion_main!(benches);
