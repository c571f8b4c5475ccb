//! histsync CLI: load daily price history into a BigQuery table.
//!
//! Commands:
//! - `sync`: fetch, normalize and full-replace load one instrument's history
//! - `config`: print the effective configuration as TOML

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use histsync_core::config::parse_date;
use histsync_core::{ConfigOverrides, HistoricalDataSync, SyncConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "histsync",
    version,
    about = "histsync: daily price history into a BigQuery table"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug, Clone, Default)]
struct RunArgs {
    /// Path to a TOML config file. Defaults to ./histsync.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Instrument symbol (e.g., BTC-USD).
    #[arg(long)]
    instrument: Option<String>,

    /// Start date (YYYY-MM-DD), inclusive. Defaults to 2024-08-01.
    #[arg(long, value_parser = parse_start)]
    start: Option<NaiveDate>,

    /// End date (YYYY-MM-DD), exclusive. Defaults to today.
    #[arg(long, value_parser = parse_end)]
    end: Option<NaiveDate>,

    /// Google Cloud project id.
    #[arg(long)]
    project: Option<String>,

    /// BigQuery dataset.
    #[arg(long)]
    dataset: Option<String>,

    /// BigQuery table; its contents are replaced on success.
    #[arg(long)]
    table: Option<String>,

    /// Credentials JSON file (service account key or authorized user).
    #[arg(long)]
    credentials: Option<PathBuf>,

    /// BigQuery dataset location (e.g., US, EU).
    #[arg(long)]
    location: Option<String>,

    /// Read history from a CSV export instead of Yahoo Finance.
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Fetch and normalize, but skip the upload.
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, normalize and load one instrument's daily history.
    Sync {
        #[command(flatten)]
        args: RunArgs,
    },
    /// Print the effective configuration as TOML.
    Config {
        #[command(flatten)]
        args: RunArgs,
    },
}

fn parse_start(value: &str) -> Result<NaiveDate, String> {
    parse_date("--start", value).map_err(|e| e.to_string())
}

fn parse_end(value: &str) -> Result<NaiveDate, String> {
    parse_date("--end", value).map_err(|e| e.to_string())
}

impl RunArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            instrument: self.instrument.clone(),
            start: self.start,
            end: self.end,
            project: self.project.clone(),
            dataset: self.dataset.clone(),
            table: self.table.clone(),
            credentials: self.credentials.clone(),
            location: self.location.clone(),
            csv: self.csv.clone(),
            dry_run: self.dry_run,
        }
    }

    /// Defaults < file < environment < flags.
    fn resolve(&self) -> Result<SyncConfig> {
        let mut config = SyncConfig::load(self.config.as_deref()).context("loading config file")?;
        config.apply_env().context("reading environment")?;
        config.apply_overrides(self.overrides());
        Ok(config)
    }
}

fn init_logging() {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    // a missing .env is normal
    let _ = dotenvy::dotenv();
    init_logging();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Sync { args } => run_sync(&args),
        Commands::Config { args } => run_config(&args),
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run_sync(args: &RunArgs) -> Result<ExitCode> {
    let config = args.resolve()?;
    let today = chrono::Local::now().date_naive();
    let sync = HistoricalDataSync::from_config(&config, today).context("preparing sync")?;

    let report = sync.run();
    info!(
        outcome = %report.outcome,
        rows = report.records,
        fingerprint = report.fingerprint.as_ref().map(|f| f.short()).unwrap_or("-"),
        "sync of {} finished",
        report.instrument
    );

    Ok(ExitCode::from(report.outcome.exit_code()))
}

fn run_config(args: &RunArgs) -> Result<ExitCode> {
    let config = args.resolve()?;
    print!("{}", config.to_toml()?);
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn sync_flags_become_overrides() {
        let cli = Cli::parse_from([
            "histsync",
            "sync",
            "--instrument",
            "ETH-USD",
            "--start",
            "2024-01-01",
            "--project",
            "proj",
            "--dry-run",
        ]);
        let Commands::Sync { args } = cli.command else {
            panic!("expected sync");
        };
        let overrides = args.overrides();

        assert_eq!(overrides.instrument.as_deref(), Some("ETH-USD"));
        assert_eq!(overrides.start, NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(overrides.project.as_deref(), Some("proj"));
        assert!(overrides.dry_run);
        assert!(overrides.end.is_none());
    }

    #[test]
    fn malformed_date_is_rejected() {
        assert!(Cli::try_parse_from(["histsync", "sync", "--end", "yesterday"]).is_err());
    }
}
