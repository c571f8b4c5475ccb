//! Bearer tokens for the warehouse API.
//!
//! Credentials are looked up in this order:
//! 1. an explicit credentials file (must exist)
//! 2. the file named by `GOOGLE_APPLICATION_CREDENTIALS`
//! 3. gcloud's application-default credentials file
//! 4. the GCE metadata server
//!
//! Files may hold a service account key (signed JWT grant) or an
//! authorized user refresh token.

use super::LoadError;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const CREDENTIALS_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";
pub const METADATA_HOST_ENV: &str = "GCE_METADATA_HOST";
pub const DEFAULT_METADATA_HOST: &str = "metadata.google.internal";
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
pub const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Anything that can hand out a bearer token.
pub trait TokenProvider: Send + Sync {
    fn access_token(&self) -> Result<String, LoadError>;
}

/// Where credentials were found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    ExplicitFile(PathBuf),
    EnvironmentFile(PathBuf),
    GcloudDefault(PathBuf),
    MetadataServer { host: String },
}

impl CredentialSource {
    /// Resolve against the process environment.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, LoadError> {
        let env_file = std::env::var_os(CREDENTIALS_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        let gcloud_file = gcloud_default_path();
        let metadata_host = std::env::var(METADATA_HOST_ENV)
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_METADATA_HOST.to_string());

        Self::resolve_with(explicit, env_file, gcloud_file, metadata_host)
    }

    /// Resolution with every input passed in.
    pub fn resolve_with(
        explicit: Option<&Path>,
        env_file: Option<PathBuf>,
        gcloud_file: Option<PathBuf>,
        metadata_host: String,
    ) -> Result<Self, LoadError> {
        if let Some(path) = explicit {
            if path.is_file() {
                return Ok(CredentialSource::ExplicitFile(path.to_path_buf()));
            }
            warn!(
                "credentials file {} not found, falling back to default credentials",
                path.display()
            );
        }

        if let Some(path) = env_file {
            if !path.is_file() {
                return Err(LoadError::Authentication(format!(
                    "{CREDENTIALS_ENV} points to a missing file: {}",
                    path.display()
                )));
            }
            return Ok(CredentialSource::EnvironmentFile(path));
        }

        if let Some(path) = gcloud_file.filter(|p| p.is_file()) {
            return Ok(CredentialSource::GcloudDefault(path));
        }

        Ok(CredentialSource::MetadataServer {
            host: metadata_host,
        })
    }

    fn file(&self) -> Option<&Path> {
        match self {
            CredentialSource::ExplicitFile(p)
            | CredentialSource::EnvironmentFile(p)
            | CredentialSource::GcloudDefault(p) => Some(p.as_path()),
            CredentialSource::MetadataServer { .. } => None,
        }
    }
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::ExplicitFile(p) => write!(f, "credentials file {}", p.display()),
            CredentialSource::EnvironmentFile(p) => {
                write!(f, "{CREDENTIALS_ENV} ({})", p.display())
            }
            CredentialSource::GcloudDefault(p) => {
                write!(f, "gcloud application-default credentials ({})", p.display())
            }
            CredentialSource::MetadataServer { host } => write!(f, "metadata server at {host}"),
        }
    }
}

/// `<config dir>/gcloud/application_default_credentials.json`
pub fn gcloud_default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| {
        dir.join("gcloud")
            .join("application_default_credentials.json")
    })
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CredentialFile {
    ServiceAccount {
        client_email: String,
        private_key: String,
        #[serde(default = "default_token_uri")]
        token_uri: String,
    },
    AuthorizedUser {
        client_id: String,
        client_secret: String,
        refresh_token: String,
        #[serde(default = "default_token_uri")]
        token_uri: String,
    },
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Token provider for Google credentials.
pub struct GoogleAuth {
    source: CredentialSource,
    client: reqwest::blocking::Client,
}

impl GoogleAuth {
    pub fn new(source: CredentialSource) -> Result<Self, LoadError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| LoadError::Authentication(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { source, client })
    }

    pub fn source(&self) -> &CredentialSource {
        &self.source
    }

    fn read_file(path: &Path) -> Result<CredentialFile, LoadError> {
        let content = fs::read_to_string(path).map_err(|e| {
            LoadError::Authentication(format!("reading {}: {e}", path.display()))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            LoadError::Authentication(format!(
                "unsupported credentials file {}: {e}",
                path.display()
            ))
        })
    }

    fn service_account_token(
        &self,
        client_email: &str,
        private_key: &str,
        token_uri: &str,
    ) -> Result<String, LoadError> {
        let key = EncodingKey::from_rsa_pem(private_key.as_bytes())
            .map_err(|e| LoadError::Authentication(format!("invalid service account key: {e}")))?;

        let now = chrono::Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: client_email,
            scope: BIGQUERY_SCOPE,
            aud: token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| LoadError::Authentication(format!("signing assertion: {e}")))?;

        self.exchange(
            token_uri,
            &[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())],
        )
    }

    fn exchange(&self, token_uri: &str, form: &[(&str, &str)]) -> Result<String, LoadError> {
        let resp = self
            .client
            .post(token_uri)
            .form(form)
            .send()
            .map_err(|e| LoadError::Authentication(format!("token endpoint unreachable: {e}")))?;
        Self::parse_token(resp)
    }

    fn metadata_token(&self, host: &str) -> Result<String, LoadError> {
        let url =
            format!("http://{host}/computeMetadata/v1/instance/service-accounts/default/token");
        let resp = self
            .client
            .get(&url)
            .header("Metadata-Flavor", "Google")
            .send()
            .map_err(|e| {
                LoadError::Authentication(format!(
                    "no credentials file found and metadata server unreachable: {e}"
                ))
            })?;
        Self::parse_token(resp)
    }

    fn parse_token(resp: reqwest::blocking::Response) -> Result<String, LoadError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(LoadError::Authentication(format!(
                "token request rejected (HTTP {status}): {}",
                body.trim()
            )));
        }
        let token: TokenResponse = resp
            .json()
            .map_err(|e| LoadError::Authentication(format!("malformed token response: {e}")))?;
        Ok(token.access_token)
    }
}

impl TokenProvider for GoogleAuth {
    fn access_token(&self) -> Result<String, LoadError> {
        debug!(source = %self.source, "requesting access token");

        if let CredentialSource::MetadataServer { host } = &self.source {
            return self.metadata_token(host);
        }

        let Some(path) = self.source.file() else {
            return Err(LoadError::Authentication("no credentials available".into()));
        };

        match Self::read_file(path)? {
            CredentialFile::ServiceAccount {
                client_email,
                private_key,
                token_uri,
            } => self.service_account_token(&client_email, &private_key, &token_uri),
            CredentialFile::AuthorizedUser {
                client_id,
                client_secret,
                refresh_token,
                token_uri,
            } => self.exchange(
                &token_uri,
                &[
                    ("grant_type", "refresh_token"),
                    ("client_id", client_id.as_str()),
                    ("client_secret", client_secret.as_str()),
                    ("refresh_token", refresh_token.as_str()),
                ],
            ),
        }
    }
}

/// Resolves credentials on each token request.
///
/// Lets the loader be built before credentials exist; a missing or broken
/// credential then fails the load instead of the setup.
pub struct DeferredAuth {
    explicit: Option<PathBuf>,
}

impl DeferredAuth {
    pub fn new(explicit: Option<PathBuf>) -> Self {
        Self { explicit }
    }
}

impl TokenProvider for DeferredAuth {
    fn access_token(&self) -> Result<String, LoadError> {
        let source = CredentialSource::resolve(self.explicit.as_deref())?;
        info!(%source, "using credentials");
        GoogleAuth::new(source)?.access_token()
    }
}
