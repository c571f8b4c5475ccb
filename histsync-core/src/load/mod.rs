//! Full-replace loading of normalized records into the warehouse.

pub mod auth;
pub mod bigquery;
pub mod encode;
pub mod schema;

pub use auth::{CredentialSource, DeferredAuth, GoogleAuth, TokenProvider};
pub use bigquery::BigQueryLoader;
pub use schema::{ColumnNames, TableRef, TableSchema};

use crate::data::NormalizedRecord;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("schema violation: {0}")]
    SchemaViolation(String),

    #[error("load job failed: {0}")]
    LoadJob(String),
}

/// A destination that replaces a table's contents with a record set.
///
/// The replace is all-or-nothing from the caller's side: on error the table
/// keeps its previous contents.
pub trait TableSink: Send + Sync {
    /// Overwrite `table` with `records`; returns the number of rows written.
    fn load(
        &self,
        records: &[NormalizedRecord],
        table: &TableRef,
        schema: &TableSchema,
    ) -> Result<u64, LoadError>;
}
