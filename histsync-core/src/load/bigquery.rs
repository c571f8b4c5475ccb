//! BigQuery full-replace loader.
//!
//! One load job per run: the records go up as a Parquet payload in a
//! multipart upload with `WRITE_TRUNCATE`, then the job is polled until it
//! reports `DONE`. BigQuery commits the job atomically, so a failed job leaves
//! the previous table contents in place.

use super::auth::TokenProvider;
use super::encode::encode_parquet;
use super::schema::{TableRef, TableSchema};
use super::{LoadError, TableSink};
use crate::data::NormalizedRecord;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_API_BASE: &str = "https://bigquery.googleapis.com";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

const BOUNDARY: &str = "histsync_load_boundary_7f3a9c";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Job {
    job_reference: JobReference,
    status: Option<JobStatus>,
    statistics: Option<JobStatistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    state: String,
    error_result: Option<ErrorProto>,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    reason: Option<String>,
    message: Option<String>,
}

impl ErrorProto {
    fn describe(&self) -> String {
        match (&self.reason, &self.message) {
            (Some(reason), Some(message)) => format!("{reason}: {message}"),
            (None, Some(message)) => message.clone(),
            (Some(reason), None) => reason.clone(),
            (None, None) => "unknown error".into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct JobStatistics {
    load: Option<LoadStatistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadStatistics {
    // int64 values arrive as JSON strings
    output_rows: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

/// Loader that replaces a BigQuery table through a load job.
pub struct BigQueryLoader {
    client: reqwest::blocking::Client,
    auth: Box<dyn TokenProvider>,
    api_base: String,
    location: Option<String>,
    poll_interval: Duration,
}

impl BigQueryLoader {
    pub fn new(auth: Box<dyn TokenProvider>) -> Result<Self, LoadError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| LoadError::LoadJob(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            auth,
            api_base: DEFAULT_API_BASE.to_string(),
            location: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Dataset location (e.g. `US`, `EU`); needed to poll jobs outside the default region.
    pub fn with_location(mut self, location: Option<String>) -> Self {
        self.location = location;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Load job configuration: explicit schema, truncate-then-write.
    fn job_config(&self, table: &TableRef, schema: &TableSchema) -> serde_json::Value {
        let mut reference = json!({ "projectId": table.project });
        if let Some(location) = &self.location {
            reference["location"] = json!(location);
        }

        json!({
            "jobReference": reference,
            "configuration": {
                "load": {
                    "destinationTable": {
                        "projectId": table.project,
                        "datasetId": table.dataset,
                        "tableId": table.table,
                    },
                    "schema": { "fields": schema.fields() },
                    "sourceFormat": "PARQUET",
                    "writeDisposition": "WRITE_TRUNCATE",
                    "createDisposition": "CREATE_IF_NEEDED",
                }
            }
        })
    }

    /// `multipart/related` body: job metadata, then the Parquet payload.
    fn multipart_body(metadata: &serde_json::Value, payload: &[u8]) -> Vec<u8> {
        let metadata = metadata.to_string();
        let mut body = Vec::with_capacity(metadata.len() + payload.len() + 256);
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
        body.extend_from_slice(metadata.as_bytes());
        body.extend_from_slice(format!("\r\n--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(payload);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn check_response(
        resp: reqwest::blocking::Response,
        action: &str,
    ) -> Result<Job, LoadError> {
        let status = resp.status();
        if status.is_success() {
            return resp
                .json::<Job>()
                .map_err(|e| LoadError::LoadJob(format!("{action}: malformed job resource: {e}")));
        }

        let body = resp.text().unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .map(|b| b.error.message)
            .unwrap_or_else(|_| body.trim().to_string());

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(LoadError::Authentication(
                format!("{action} rejected (HTTP {status}): {message}"),
            )),
            _ => Err(LoadError::LoadJob(format!(
                "{action} failed (HTTP {status}): {message}"
            ))),
        }
    }

    fn submit(
        &self,
        token: &str,
        table: &TableRef,
        schema: &TableSchema,
        payload: &[u8],
    ) -> Result<Job, LoadError> {
        let url = format!(
            "{}/upload/bigquery/v2/projects/{}/jobs",
            self.api_base, table.project
        );
        let body = Self::multipart_body(&self.job_config(table, schema), payload);

        let resp = self
            .client
            .post(&url)
            .query(&[("uploadType", "multipart")])
            .bearer_auth(token)
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={BOUNDARY}"),
            )
            .body(body)
            .send()
            .map_err(|e| LoadError::LoadJob(format!("submitting load job: {e}")))?;

        Self::check_response(resp, "submitting load job")
    }

    /// One status request, with a token fetched for this request.
    fn poll(&self, project: &str, reference: &JobReference) -> Result<Job, LoadError> {
        let url = format!(
            "{}/bigquery/v2/projects/{project}/jobs/{}",
            self.api_base, reference.job_id
        );
        let token = self.auth.access_token()?;
        let mut req = self.client.get(&url).bearer_auth(token);
        if let Some(location) = reference.location.as_ref().or(self.location.as_ref()) {
            req = req.query(&[("location", location)]);
        }

        let resp = req
            .send()
            .map_err(|e| LoadError::LoadJob(format!("polling job {}: {e}", reference.job_id)))?;
        Self::check_response(resp, "polling load job")
    }

    /// Block until the job is done; no timeout.
    fn wait(&self, project: &str, mut job: Job) -> Result<Job, LoadError> {
        loop {
            let state = job.status.as_ref().map(|s| s.state.as_str()).unwrap_or("PENDING");
            if state == "DONE" {
                return Ok(job);
            }
            debug!(job_id = %job.job_reference.job_id, state, "waiting for load job");
            thread::sleep(self.poll_interval);
            job = self.poll(project, &job.job_reference)?;
        }
    }
}

impl TableSink for BigQueryLoader {
    fn load(
        &self,
        records: &[NormalizedRecord],
        table: &TableRef,
        schema: &TableSchema,
    ) -> Result<u64, LoadError> {
        schema.validate(records)?;
        let payload = encode_parquet(records, schema)?;
        let token = self.auth.access_token()?;

        info!(%table, rows = records.len(), bytes = payload.len(), "submitting load job");
        let job = self.submit(&token, table, schema, &payload)?;
        let job_id = job.job_reference.job_id.clone();
        let job = self.wait(&table.project, job)?;

        if let Some(status) = &job.status {
            if let Some(err) = &status.error_result {
                let details: Vec<String> = status.errors.iter().map(ErrorProto::describe).collect();
                return Err(LoadError::LoadJob(if details.is_empty() {
                    format!("job {job_id}: {}", err.describe())
                } else {
                    format!("job {job_id}: {} ({})", err.describe(), details.join("; "))
                }));
            }
        }

        let written = job
            .statistics
            .and_then(|s| s.load)
            .and_then(|l| l.output_rows)
            .and_then(|rows| rows.parse::<u64>().ok())
            .unwrap_or(records.len() as u64);

        info!(%job_id, rows = written, "load job done");
        Ok(written)
    }
}
