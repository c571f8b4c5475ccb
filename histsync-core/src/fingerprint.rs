//! Record-set fingerprinting.
//!
//! Two runs over unchanged upstream data normalize to the same records and so
//! produce the same fingerprint, which makes a re-run's effect on the table
//! checkable without reading the table back.

use crate::data::NormalizedRecord;
use serde::{Deserialize, Serialize};
use std::fmt;

/// BLAKE3 hash of an ordered record set, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordFingerprint(pub String);

impl RecordFingerprint {
    /// Hash `records` in order. Each record contributes its ISO date and the
    /// little-endian bytes of price and volume.
    pub fn of(records: &[NormalizedRecord]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&(records.len() as u64).to_le_bytes());
        for record in records {
            hasher.update(record.date.to_string().as_bytes());
            hasher.update(&record.price.to_le_bytes());
            hasher.update(&record.volume.to_le_bytes());
        }
        Self(hasher.finalize().to_hex().to_string())
    }

    /// First 12 hex characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for RecordFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
