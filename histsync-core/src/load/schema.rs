//! Destination table identity and its fixed three-column schema.

use super::LoadError;
use crate::data::NormalizedRecord;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Fully qualified destination table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRef {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    pub fn new(
        project: impl Into<String>,
        dataset: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            dataset: dataset.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

/// Destination column names for the date, price and volume fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnNames {
    pub date: String,
    pub price: String,
    pub volume: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            date: "date".into(),
            price: "price".into(),
            volume: "volume".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldType {
    Date,
    Integer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldMode {
    Required,
    Nullable,
}

/// One column of the destination schema, in the warehouse's JSON shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub mode: FieldMode,
}

impl FieldSpec {
    fn required(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            mode: FieldMode::Required,
        }
    }
}

/// The destination schema: `(date DATE, price INTEGER, volume INTEGER)`, all REQUIRED.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    columns: ColumnNames,
    fields: Vec<FieldSpec>,
}

impl TableSchema {
    pub fn daily_history(columns: ColumnNames) -> Self {
        let fields = vec![
            FieldSpec::required(&columns.date, FieldType::Date),
            FieldSpec::required(&columns.price, FieldType::Integer),
            FieldSpec::required(&columns.volume, FieldType::Integer),
        ];
        Self { columns, fields }
    }

    pub fn columns(&self) -> &ColumnNames {
        &self.columns
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Check the schema itself and every record against it.
    ///
    /// Records can't carry nulls, so the remaining constraint is that price
    /// and volume are whole non-negative numbers.
    pub fn validate(&self, records: &[NormalizedRecord]) -> Result<(), LoadError> {
        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.name.trim().is_empty() {
                return Err(LoadError::SchemaViolation(
                    "column names must not be empty".into(),
                ));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(LoadError::SchemaViolation(format!(
                    "column '{}' is declared more than once",
                    field.name
                )));
            }
        }

        for record in records {
            if record.price < 0 {
                return Err(LoadError::SchemaViolation(format!(
                    "{} is negative ({}) on {}",
                    self.columns.price, record.price, record.date
                )));
            }
            if record.volume < 0 {
                return Err(LoadError::SchemaViolation(format!(
                    "{} is negative ({}) on {}",
                    self.columns.volume, record.volume, record.date
                )));
            }
        }

        Ok(())
    }
}

impl Default for TableSchema {
    fn default() -> Self {
        Self::daily_history(ColumnNames::default())
    }
}
