//! Report transport to the collection endpoint.
//!
//! Reports are POSTed as JSON to `<base_url>/data_point` with HTTP Basic
//! auth. Only `201 Created` counts as accepted. There is exactly one attempt
//! per call; retrying is left to the next scheduled trigger.

use std::fmt;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use thiserror::Error;

use crate::report::Report;

/// Path appended to the configured base URL.
pub const DATA_POINT_PATH: &str = "data_point";

/// Status the endpoint returns when it stores a report.
pub const ACCEPTED_STATUS: u16 = 201;

/// Transport-level failures (no HTTP status was received).
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("http transport failure: {0}")]
    Http(String),

    #[error("failed to encode report: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Status received from the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
}

impl TransportResponse {
    pub fn is_accepted(&self) -> bool {
        self.status == ACCEPTED_STATUS
    }
}

/// Sends one report.
pub trait ReportTransport: Send + Sync {
    fn send(&self, report: &Report) -> Result<TransportResponse, TransportError>;
}

/// Basic auth credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// `Authorization` header value.
    pub fn basic_auth_header(&self) -> String {
        let token = STANDARD.encode(format!("{}:{}", self.username, self.password));
        format!("Basic {}", token)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Blocking HTTP transport.
pub struct HttpTransport {
    agent: ureq::Agent,
    url: String,
    authorization: String,
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    /// Transport for `<base_url>/data_point` with a per-request timeout.
    pub fn new(base_url: &str, credentials: &Credentials, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            agent,
            url: data_point_url(base_url),
            authorization: credentials.basic_auth_header(),
        }
    }

    /// Full endpoint URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl ReportTransport for HttpTransport {
    fn send(&self, report: &Report) -> Result<TransportResponse, TransportError> {
        let body = serde_json::to_string(report)?;
        let result = self
            .agent
            .post(&self.url)
            .set("Content-Type", "application/json")
            .set("Authorization", &self.authorization)
            .send_string(&body);

        match result {
            Ok(response) => Ok(TransportResponse {
                status: response.status(),
            }),
            Err(ureq::Error::Status(status, _)) => Ok(TransportResponse { status }),
            Err(ureq::Error::Transport(err)) => Err(TransportError::Http(err.to_string())),
        }
    }
}

/// Join the base URL and the data point path.
pub fn data_point_url(base_url: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), DATA_POINT_PATH)
}
