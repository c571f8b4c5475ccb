//! In-memory Parquet encoding of normalized records.

use super::schema::TableSchema;
use super::LoadError;
use crate::data::NormalizedRecord;
use polars::prelude::*;

/// Records as a DataFrame with the destination column names.
pub fn records_to_dataframe(
    records: &[NormalizedRecord],
    schema: &TableSchema,
) -> PolarsResult<DataFrame> {
    let epoch = chrono::NaiveDate::default(); // 1970-01-01
    let dates: Vec<i32> = records
        .iter()
        .map(|r| (r.date - epoch).num_days() as i32)
        .collect();
    let prices: Vec<i64> = records.iter().map(|r| r.price).collect();
    let volumes: Vec<i64> = records.iter().map(|r| r.volume).collect();

    let columns = schema.columns();
    DataFrame::new(vec![
        Column::new(columns.date.as_str().into(), dates).cast(&DataType::Date)?,
        Column::new(columns.price.as_str().into(), prices),
        Column::new(columns.volume.as_str().into(), volumes),
    ])
}

/// Encode records as a Parquet file held in memory.
pub fn encode_parquet(
    records: &[NormalizedRecord],
    schema: &TableSchema,
) -> Result<Vec<u8>, LoadError> {
    let mut df = records_to_dataframe(records, schema)
        .map_err(|e| LoadError::LoadJob(format!("building upload frame: {e}")))?;

    let mut buf: Vec<u8> = Vec::new();
    ParquetWriter::new(&mut buf)
        .finish(&mut df)
        .map_err(|e| LoadError::LoadJob(format!("encoding parquet: {e}")))?;
    Ok(buf)
}
