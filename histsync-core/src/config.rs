//! Run configuration.
//!
//! Values are layered, later layers winning: built-in defaults, a TOML file,
//! environment variables, then explicit overrides (the CLI flags).

use crate::data::FetchWindow;
use crate::load::{ColumnNames, TableRef, TableSchema};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// File read when no `--config` path is given, if it exists.
pub const DEFAULT_CONFIG_FILE: &str = "histsync.toml";

pub const DEFAULT_INSTRUMENT: &str = "BTC-USD";
pub const DEFAULT_DATASET: &str = "btc_investments";
pub const DEFAULT_TABLE: &str = "historical_btc_prices";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 1;

pub const ENV_INSTRUMENT: &str = "HISTSYNC_INSTRUMENT";
pub const ENV_START: &str = "HISTSYNC_START";
pub const ENV_END: &str = "HISTSYNC_END";
pub const ENV_PROJECT: &str = "HISTSYNC_PROJECT";
pub const ENV_CLOUD_PROJECT: &str = "GOOGLE_CLOUD_PROJECT";
pub const ENV_DATASET: &str = "HISTSYNC_DATASET";
pub const ENV_TABLE: &str = "HISTSYNC_TABLE";
pub const ENV_CREDENTIALS: &str = "HISTSYNC_CREDENTIALS";
pub const ENV_LOCATION: &str = "HISTSYNC_LOCATION";

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("serializing config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid {key} '{value}': {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("no project id configured (set --project, HISTSYNC_PROJECT or GOOGLE_CLOUD_PROJECT)")]
    MissingProject,

    #[error("empty date window: start {start} is not before end {end}")]
    EmptyWindow { start: NaiveDate, end: NaiveDate },
}

/// Everything one run needs to know.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    pub instrument: String,
    pub start: NaiveDate,
    /// Exclusive end of the window; today when unset.
    pub end: Option<NaiveDate>,
    pub project: Option<String>,
    pub dataset: String,
    pub table: String,
    pub credentials: Option<PathBuf>,
    pub location: Option<String>,
    pub poll_interval_secs: u64,
    /// Read history from this CSV file instead of the online provider.
    pub csv: Option<PathBuf>,
    pub dry_run: bool,
    pub columns: ColumnNames,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            instrument: DEFAULT_INSTRUMENT.to_string(),
            start: NaiveDate::from_ymd_opt(2024, 8, 1).unwrap_or_default(),
            end: None,
            project: None,
            dataset: DEFAULT_DATASET.to_string(),
            table: DEFAULT_TABLE.to_string(),
            credentials: None,
            location: None,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            csv: None,
            dry_run: false,
            columns: ColumnNames::default(),
        }
    }
}

/// Values given explicitly on the command line.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub instrument: Option<String>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub project: Option<String>,
    pub dataset: Option<String>,
    pub table: Option<String>,
    pub credentials: Option<PathBuf>,
    pub location: Option<String>,
    pub csv: Option<PathBuf>,
    pub dry_run: bool,
}

/// Parse a `YYYY-MM-DD` date, naming the setting on failure.
pub fn parse_date(key: &str, value: &str) -> Result<NaiveDate, ConfigError> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

impl SyncConfig {
    /// Load a config from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse a config from a TOML string; missing keys keep their defaults.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Defaults overlaid with `path`, or with `histsync.toml` when it exists.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_FILE);
                if fallback.is_file() {
                    Self::from_file(fallback)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Overlay the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Overlay values from `lookup`; empty values count as unset.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get(ENV_INSTRUMENT) {
            self.instrument = v;
        }
        if let Some(v) = get(ENV_START) {
            self.start = parse_date(ENV_START, &v)?;
        }
        if let Some(v) = get(ENV_END) {
            self.end = Some(parse_date(ENV_END, &v)?);
        }
        if let Some(v) = get(ENV_PROJECT).or_else(|| get(ENV_CLOUD_PROJECT)) {
            self.project = Some(v);
        }
        if let Some(v) = get(ENV_DATASET) {
            self.dataset = v;
        }
        if let Some(v) = get(ENV_TABLE) {
            self.table = v;
        }
        if let Some(v) = get(ENV_CREDENTIALS) {
            self.credentials = Some(PathBuf::from(v));
        }
        if let Some(v) = get(ENV_LOCATION) {
            self.location = Some(v);
        }
        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(v) = overrides.instrument {
            self.instrument = v;
        }
        if let Some(v) = overrides.start {
            self.start = v;
        }
        if let Some(v) = overrides.end {
            self.end = Some(v);
        }
        if let Some(v) = overrides.project {
            self.project = Some(v);
        }
        if let Some(v) = overrides.dataset {
            self.dataset = v;
        }
        if let Some(v) = overrides.table {
            self.table = v;
        }
        if let Some(v) = overrides.credentials {
            self.credentials = Some(v);
        }
        if let Some(v) = overrides.location {
            self.location = Some(v);
        }
        if let Some(v) = overrides.csv {
            self.csv = Some(v);
        }
        if overrides.dry_run {
            self.dry_run = true;
        }
    }

    /// The fetch window; an unset end means `today`.
    pub fn window(&self, today: NaiveDate) -> Result<FetchWindow, ConfigError> {
        let end = self.end.unwrap_or(today);
        if self.start >= end {
            return Err(ConfigError::EmptyWindow {
                start: self.start,
                end,
            });
        }
        Ok(FetchWindow::new(self.start, end))
    }

    pub fn table_ref(&self) -> Result<TableRef, ConfigError> {
        let project = self
            .project
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or(ConfigError::MissingProject)?;

        for (key, value) in [("dataset", &self.dataset), ("table", &self.table)] {
            if value.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: key.into(),
                    value: value.clone(),
                    reason: "must not be empty".into(),
                });
            }
        }

        Ok(TableRef::new(project, self.dataset.trim(), self.table.trim()))
    }

    pub fn schema(&self) -> TableSchema {
        TableSchema::daily_history(self.columns.clone())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Check everything a run needs, resolving the window against `today`.
    pub fn validate(&self, today: NaiveDate) -> Result<(), ConfigError> {
        if self.instrument.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "instrument".into(),
                value: self.instrument.clone(),
                reason: "must not be empty".into(),
            });
        }
        self.window(today)?;
        self.table_ref()?;
        Ok(())
    }
}
