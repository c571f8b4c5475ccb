//! Yahoo Finance data source.
//!
//! Fetches daily bars from Yahoo's v8 chart API and returns them grouped under
//! the symbol the API echoes back, the way the chart endpoint keys its result.
//!
//! There is no retry: a transport failure surfaces as `SourceUnavailable` and
//! the run is repeated by hand.

use super::frame::RawFrame;
use super::provider::{DataSource, FetchError, FetchWindow, HistoricalSource, RawObservation};
use chrono::NaiveDate;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_BASE_URL: &str = "https://query2.finance.yahoo.com";

/// Yahoo Finance v8 chart API response.
#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    meta: Option<ChartMeta>,
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    symbol: Option<String>,
    #[serde(default)]
    gmtoffset: i64,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

/// Yahoo Finance data source.
pub struct YahooProvider {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl YahooProvider {
    pub fn new() -> Result<Self, FetchError> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Point the provider at another host (a mirror, or a mock server in tests).
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .map_err(|e| FetchError::SourceUnavailable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Chart API URL for a symbol. The window goes in the query string.
    fn chart_url(&self, symbol: &str) -> String {
        format!("{}/v8/finance/chart/{symbol}", self.base_url)
    }

    fn epoch_seconds(date: NaiveDate) -> i64 {
        date.and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp())
            .unwrap_or_default()
    }

    fn empty(symbol: &str, window: FetchWindow) -> FetchError {
        FetchError::EmptyResult {
            instrument: symbol.to_string(),
            window,
        }
    }

    /// Parse the chart API response into a grouped raw frame.
    fn parse_response(
        symbol: &str,
        window: FetchWindow,
        resp: ChartResponse,
    ) -> Result<RawFrame, FetchError> {
        let result = match (resp.chart.result, resp.chart.error) {
            (Some(result), _) => result,
            (None, Some(err)) if err.code == "Not Found" => {
                return Err(Self::empty(symbol, window));
            }
            (None, Some(err)) => {
                return Err(FetchError::SourceUnavailable(format!(
                    "{}: {}",
                    err.code, err.description
                )));
            }
            (None, None) => {
                return Err(FetchError::ResponseFormatChanged(
                    "empty result with no error".into(),
                ));
            }
        };

        let Some(data) = result.into_iter().next() else {
            return Err(Self::empty(symbol, window));
        };

        let (group, gmtoffset) = match data.meta {
            Some(meta) => (meta.symbol.unwrap_or_else(|| symbol.to_string()), meta.gmtoffset),
            None => (symbol.to_string(), 0),
        };

        // No timestamps is how the chart API reports an empty window
        let Some(timestamps) = data.timestamp else {
            return Err(Self::empty(symbol, window));
        };

        let quote = data
            .indicators
            .quote
            .into_iter()
            .next()
            .ok_or_else(|| FetchError::ResponseFormatChanged("no quote data".into()))?;

        let mut observations = Vec::with_capacity(timestamps.len());

        for (i, &ts) in timestamps.iter().enumerate() {
            // Exchange-local wall clock, so the calendar date matches the exchange's
            let local = chrono::DateTime::from_timestamp(ts + gmtoffset, 0)
                .map(|dt| dt.naive_utc())
                .ok_or_else(|| {
                    FetchError::ResponseFormatChanged(format!("invalid timestamp: {ts}"))
                })?;

            if !window.contains(local.date()) {
                continue;
            }

            let open = quote.open.get(i).copied().flatten();
            let high = quote.high.get(i).copied().flatten();
            let low = quote.low.get(i).copied().flatten();
            let close = quote.close.get(i).copied().flatten();
            let volume = quote.volume.get(i).copied().flatten();

            // Skip bars where all OHLCV are None (holidays/non-trading days)
            if open.is_none()
                && high.is_none()
                && low.is_none()
                && close.is_none()
                && volume.is_none()
            {
                continue;
            }

            observations.push(RawObservation {
                timestamp: local,
                open: open.unwrap_or(f64::NAN),
                high: high.unwrap_or(f64::NAN),
                low: low.unwrap_or(f64::NAN),
                close: close.unwrap_or(f64::NAN),
                volume: volume.unwrap_or(f64::NAN),
            });
        }

        if observations.is_empty() {
            return Err(Self::empty(symbol, window));
        }

        RawFrame::grouped(&group, &observations)
            .map_err(|e| FetchError::ResponseFormatChanged(format!("building frame: {e}")))
    }
}

impl HistoricalSource for YahooProvider {
    fn source(&self) -> DataSource {
        DataSource::YahooFinance
    }

    fn fetch(&self, instrument: &str, window: FetchWindow) -> Result<RawFrame, FetchError> {
        if window.is_empty() {
            return Err(Self::empty(instrument, window));
        }

        let url = self.chart_url(instrument);
        debug!(%url, %window, "requesting chart");

        let resp = self
            .client
            .get(&url)
            .query(&[
                ("period1", Self::epoch_seconds(window.start).to_string()),
                ("period2", Self::epoch_seconds(window.end).to_string()),
                ("interval", "1d".to_string()),
            ])
            .send()
            .map_err(|e| FetchError::SourceUnavailable(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .map_err(|e| FetchError::SourceUnavailable(format!("reading response: {e}")))?;

        if !status.is_success() {
            // Unknown symbols come back as 404 with a regular chart error body
            if let Ok(chart) = serde_json::from_str::<ChartResponse>(&body) {
                if chart.chart.error.is_some() {
                    return Self::parse_response(instrument, window, chart);
                }
            }
            return Err(FetchError::SourceUnavailable(format!(
                "HTTP {status} for {instrument}"
            )));
        }

        let chart: ChartResponse = serde_json::from_str(&body).map_err(|e| {
            FetchError::ResponseFormatChanged(format!(
                "failed to parse response for {instrument}: {e}"
            ))
        })?;

        let frame = Self::parse_response(instrument, window, chart)?;
        info!(rows = frame.height(), source = %self.source(), "fetched {instrument}");
        Ok(frame)
    }
}
