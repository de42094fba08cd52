//! Review backend and GitHub clients
//!
//! The backend analyses a pull request asynchronously: `start_review` returns
//! a review id together with its status, and the call facts and file contents
//! become available once the status is `ready`. Every backend response is
//! wrapped in a `{status, data | error}` envelope.

use crate::calls::{decode_calls, MethodCall};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("{url} returned HTTP {status}")]
    Http { url: String, status: i32 },
    #[error("unexpected response from {url}: {message}")]
    Decode { url: String, message: String },
    /// Logical error reported by the backend, message kept verbatim
    #[error("{0}")]
    Backend(String),
    #[error("review still processing after {attempts} attempts")]
    PollExhausted { attempts: u32 },
    #[error("cancelled")]
    Cancelled,
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// Review identifier assigned by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReviewId(pub i64);

impl fmt::Display for ReviewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewState {
    Processing,
    Ready,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReviewStatus {
    pub id: ReviewId,
    pub review_status: ReviewState,
}

/// A GitHub pull request, as identified by its web URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub owner: String,
    pub repo: String,
    pub number: u64,
    pub url: String,
}

impl PullRequest {
    pub fn parse(url: &str) -> Result<Self, ClientError> {
        static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
        let pattern = PATTERN
            .get_or_init(|| Regex::new(r"^https?://(?:www\.)?github\.com/(.+?)/(.+?)/pull/(\d+)$").ok())
            .as_ref()
            .ok_or_else(|| ClientError::InvalidUrl(url.to_string()))?;

        let url = url.trim();
        let caps = pattern
            .captures(url)
            .ok_or_else(|| ClientError::InvalidUrl(url.to_string()))?;
        let number = caps[3]
            .parse()
            .map_err(|_| ClientError::InvalidUrl(url.to_string()))?;

        Ok(Self {
            owner: caps[1].to_string(),
            repo: caps[2].to_string(),
            number,
            url: url.to_string(),
        })
    }
}

impl fmt::Display for PullRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.owner, self.repo, self.number)
    }
}

/// Asynchronous analysis service for pull requests
pub trait ReviewBackend: Send + Sync {
    /// Start (or look up) the review of a pull request
    fn start_review(&self, pr_url: &str) -> Result<ReviewStatus, ClientError>;

    fn method_calls(&self, review: ReviewId) -> Result<Vec<MethodCall>, ClientError>;

    /// Full source of a file at the pull request's head
    fn file_source(&self, review: ReviewId, path: &str) -> Result<String, ClientError>;

    /// Whole-file diff of a single file
    fn file_diff(&self, review: ReviewId, path: &str) -> Result<String, ClientError>;
}

/// Source of the unified diff of a pull request
pub trait DiffProvider: Send + Sync {
    fn pull_request_diff(&self, pr: &PullRequest) -> Result<String, ClientError>;
}

fn user_agent() -> String {
    format!("callmap/{}", env!("CARGO_PKG_VERSION"))
}

fn send(request: minreq::Request, url: &str) -> Result<String, ClientError> {
    let response = request.send().map_err(|e| ClientError::Transport {
        url: url.to_string(),
        message: e.to_string(),
    })?;

    if !(200..300).contains(&response.status_code) {
        return Err(ClientError::Http {
            url: url.to_string(),
            status: response.status_code,
        });
    }

    response
        .as_str()
        .map(str::to_string)
        .map_err(|e| ClientError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: String,
    data: Option<T>,
    error: Option<String>,
}

impl<T> Envelope<T> {
    fn into_result(self, url: &str) -> Result<T, ClientError> {
        match (self.status.as_str(), self.data) {
            ("ok", Some(data)) => Ok(data),
            ("error", _) => Err(ClientError::Backend(
                self.error.unwrap_or_else(|| "unknown backend error".to_string()),
            )),
            (status, _) => Err(ClientError::Decode {
                url: url.to_string(),
                message: format!("status {:?} without data", status),
            }),
        }
    }
}

fn decode_envelope<T: DeserializeOwned>(body: &str, url: &str) -> Result<T, ClientError> {
    let envelope: Envelope<T> = serde_json::from_str(body).map_err(|e| ClientError::Decode {
        url: url.to_string(),
        message: e.to_string(),
    })?;
    envelope.into_result(url)
}

/// HTTP client for the review backend
#[derive(Debug, Clone)]
pub struct HttpBackend {
    base_url: String,
    timeout_secs: u64,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_secs,
        }
    }

    fn endpoint(&self, path: &str, query: Option<(&str, &str)>) -> Result<String, ClientError> {
        let raw = format!("{}/{}", self.base_url.trim_end_matches('/'), path);
        let mut url = Url::parse(&raw).map_err(|e| ClientError::InvalidUrl(format!("{}: {}", raw, e)))?;
        if let Some((key, value)) = query {
            url.query_pairs_mut().append_pair(key, value);
        }
        Ok(url.into())
    }

    fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T, ClientError> {
        debug!(url, "backend request");
        let request = minreq::get(url)
            .with_header("User-Agent", user_agent())
            .with_timeout(self.timeout_secs);
        let body = send(request, url)?;
        decode_envelope(&body, url)
    }
}

impl ReviewBackend for HttpBackend {
    fn start_review(&self, pr_url: &str) -> Result<ReviewStatus, ClientError> {
        let url = self.endpoint("review/start", Some(("pr", pr_url)))?;
        self.get(&url)
    }

    fn method_calls(&self, review: ReviewId) -> Result<Vec<MethodCall>, ClientError> {
        let url = self.endpoint(&format!("review/{}/methodcalls", review), None)?;
        let records: Vec<serde_json::Value> = self.get(&url)?;
        Ok(decode_calls(records))
    }

    fn file_source(&self, review: ReviewId, path: &str) -> Result<String, ClientError> {
        let url = self.endpoint(&format!("review/{}/file", review), Some(("path", path)))?;
        self.get(&url)
    }

    fn file_diff(&self, review: ReviewId, path: &str) -> Result<String, ClientError> {
        let url = self.endpoint(&format!("review/{}/diff", review), Some(("path", path)))?;
        self.get(&url)
    }
}

/// Fetches pull request diffs from the GitHub REST API
#[derive(Debug, Clone)]
pub struct GitHubClient {
    api_url: String,
    timeout_secs: u64,
    token: Option<String>,
}

impl GitHubClient {
    pub fn new(api_url: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            api_url: api_url.into(),
            timeout_secs,
            token: None,
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    fn diff_url(&self, pr: &PullRequest) -> String {
        format!(
            "{}/repos/{}/{}/pulls/{}",
            self.api_url.trim_end_matches('/'),
            pr.owner,
            pr.repo,
            pr.number
        )
    }
}

impl DiffProvider for GitHubClient {
    fn pull_request_diff(&self, pr: &PullRequest) -> Result<String, ClientError> {
        let url = self.diff_url(pr);
        debug!(url = %url, "fetching pull request diff");

        let mut request = minreq::get(&url)
            .with_header("Accept", "application/vnd.github.v3.diff")
            .with_header("User-Agent", user_agent())
            .with_timeout(self.timeout_secs);
        if let Some(token) = &self.token {
            request = request.with_header("Authorization", format!("Bearer {}", token));
        }
        send(request, &url)
    }
}
