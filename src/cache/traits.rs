//! Core traits and types for the caching system.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use super::error::Result;
use crate::jira::IssueWithHistory;

/// When and how an issue was fetched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
  #[serde(default)]
  pub fetched_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub fetched_by: String,
  #[serde(default)]
  pub api_call_duration_ms: u64,
}

impl CacheMetadata {
  pub fn new(fetched_by: impl Into<String>, duration: Duration) -> Self {
    Self {
      fetched_at: Some(Utc::now()),
      fetched_by: fetched_by.into(),
      api_call_duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
    }
  }

  /// Fetch time, unless missing or the year-1 zero value older writers used.
  pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
    self.fetched_at.filter(|t| t.year() > 1)
  }
}

/// The on-disk envelope. Metadata and payload are always written together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedIssue {
  #[serde(rename = "_cache_metadata", default)]
  pub cache_metadata: CacheMetadata,
  pub jira_data: IssueWithHistory,
}

/// Storage seam used by the scraper.
pub trait IssueStore {
  /// Whether `key` has a cache entry. Does not validate the content.
  fn exists(&self, key: &str) -> bool;

  /// Persist `issue`, replacing any previous envelope. Returns the primary path.
  fn write_issue(&self, issue: &IssueWithHistory, fetch_duration: Duration) -> Result<PathBuf>;

  fn get_issue(&self, key: &str) -> Result<CachedIssue>;

  /// All cached issue keys.
  fn list_issues(&self) -> Result<Vec<String>>;
}
