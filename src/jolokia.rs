//! Jolokia agent client
//!
//! Only the version query is needed by the exporter: it doubles as the
//! upstream health probe and as the poller's liveness check.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Default request timeout for Jolokia queries
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum JolokiaError {
    #[error("Jolokia HTTP error: {0}")]
    HttpError(String),

    #[error("Jolokia returned HTTP status {0}")]
    BadStatus(u16),

    #[error("Jolokia request failed with status {status}: {message}")]
    RequestFailed { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Free-form failure, used by alternative client implementations
    #[error("{0}")]
    Unavailable(String),
}

/// Capability for querying the upstream agent
#[async_trait]
pub trait JolokiaClient: Send + Sync {
    /// Version reported by the agent
    async fn version(&self) -> Result<String, JolokiaError>;
}

/// Jolokia `version` response body
#[derive(Debug, Deserialize)]
struct VersionResponse {
    status: u16,
    #[serde(default)]
    value: Option<VersionValue>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VersionValue {
    agent: String,
}

/// Parse the body of `GET /jolokia/version`
fn parse_version_response(body: &str) -> Result<String, JolokiaError> {
    let response: VersionResponse = serde_json::from_str(body)
        .map_err(|e| JolokiaError::ParseError(format!("Invalid JSON: {}", e)))?;

    if response.status != 200 {
        return Err(JolokiaError::RequestFailed {
            status: response.status,
            message: response.error.unwrap_or_else(|| "unknown error".to_string()),
        });
    }

    response
        .value
        .map(|v| v.agent)
        .ok_or_else(|| JolokiaError::ParseError("missing value.agent".to_string()))
}

/// Client talking to a Jolokia agent over HTTP
#[derive(Clone)]
pub struct HttpJolokiaClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpJolokiaClient {
    /// Create a client for the agent at `base_url` (e.g. `http://localhost:8778`)
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, JolokiaError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| JolokiaError::HttpError(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn version_url(&self) -> String {
        format!("{}/jolokia/version", self.base_url)
    }
}

#[async_trait]
impl JolokiaClient for HttpJolokiaClient {
    async fn version(&self) -> Result<String, JolokiaError> {
        let response = self
            .http
            .get(self.version_url())
            .send()
            .await
            .map_err(|e| JolokiaError::HttpError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(JolokiaError::BadStatus(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| JolokiaError::HttpError(e.to_string()))?;
        parse_version_response(&body)
    }
}
