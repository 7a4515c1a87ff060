//! Error model for Jira API operations.

use reqwest::StatusCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, JiraError>;

#[derive(Debug, Error)]
pub enum JiraError {
  /// Connection, timeout or body-read failure that outlasted the retry budget.
  #[error("request failed after {attempts} attempts: {source}")]
  Transport {
    attempts: u32,
    #[source]
    source: reqwest::Error,
  },
  /// The request could not be built, e.g. from a malformed URL. Never retried.
  #[error("failed to create request: {0}")]
  Request(#[source] reqwest::Error),
  /// HTTP 429 on every attempt.
  #[error("rate limit max retries exceeded after {retries} retries: {body}")]
  RateLimited { retries: u32, body: String },
  /// Non-retryable status such as 400, 401 or 404.
  #[error("API returned status {status}: {body}")]
  Api { status: StatusCode, body: String },
  #[error("failed to parse {what}: {source}")]
  Parse {
    what: &'static str,
    #[source]
    source: serde_json::Error,
  },
  #[error("invalid client configuration: {0}")]
  Config(String),
}

impl JiraError {
  pub fn parse(what: &'static str, source: serde_json::Error) -> Self {
    JiraError::Parse { what, source }
  }

  /// HTTP status of the failing response, when there was one.
  pub fn status(&self) -> Option<StatusCode> {
    match self {
      JiraError::Api { status, .. } => Some(*status),
      JiraError::RateLimited { .. } => Some(StatusCode::TOO_MANY_REQUESTS),
      _ => None,
    }
  }
}
