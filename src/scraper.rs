//! Project scrape orchestration: enumerate, plan against the cache, fetch, store.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::cache::{CacheError, IssueStore};
use crate::jira::client::DEFAULT_ORDER_BY;
use crate::jira::{IssueWithHistory, JiraClient, JiraError};

pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_FETCH_DELAY: Duration = Duration::from_millis(500);

/// Where the scraper gets issues from.
#[allow(async_fn_in_trait)]
pub trait IssueSource {
  /// Keys of every issue in `project`, most recently updated first.
  async fn project_issue_keys(
    &self,
    project: &str,
    limit: Option<usize>,
  ) -> Result<Vec<String>, JiraError>;

  /// One issue with its changelog, and how long fetching it took.
  async fn issue_with_history(
    &self,
    key: &str,
  ) -> Result<(IssueWithHistory, Duration), JiraError>;
}

impl IssueSource for JiraClient {
  async fn project_issue_keys(
    &self,
    project: &str,
    limit: Option<usize>,
  ) -> Result<Vec<String>, JiraError> {
    self
      .get_all_issues_in_project(project, Some(DEFAULT_ORDER_BY), limit)
      .await
  }

  async fn issue_with_history(
    &self,
    key: &str,
  ) -> Result<(IssueWithHistory, Duration), JiraError> {
    self.get_issue_with_history(key).await
  }
}

#[derive(Debug, Error)]
pub enum ScrapeError {
  #[error("failed to search issues in {project}: {source}")]
  Enumerate {
    project: String,
    #[source]
    source: JiraError,
  },
  #[error("failed to fetch {key}: {source}")]
  Fetch {
    key: String,
    #[source]
    source: JiraError,
  },
  #[error("failed to cache {key}: {source}")]
  Store {
    key: String,
    #[source]
    source: CacheError,
  },
  #[error("failed to list cached issues: {0}")]
  List(#[source] CacheError),
}

#[derive(Debug, Clone)]
pub struct ScrapeConfig {
  /// Reserved for parallel fetching; issues are currently fetched one at a time.
  pub workers: usize,
  /// Re-fetch every issue, ignoring what is already cached.
  pub full_sync: bool,
  /// Maximum number of issues to enumerate.
  pub limit: Option<usize>,
  /// Pause after every fetch attempt.
  pub fetch_delay: Duration,
}

impl Default for ScrapeConfig {
  fn default() -> Self {
    Self {
      workers: DEFAULT_WORKERS,
      full_sync: false,
      limit: None,
      fetch_delay: DEFAULT_FETCH_DELAY,
    }
  }
}

/// Summary of a project scrape.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScrapeResult {
  pub issues_processed: usize,
  pub api_calls: usize,
  pub cache_hits: usize,
  pub errors: usize,
  /// Keys whose fetch or write failed, in fetch order.
  pub failed_keys: Vec<String>,
  pub duration: Duration,
}

/// Which enumerated keys need a network fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
  pub to_fetch: Vec<String>,
  pub cache_hits: usize,
}

/// Split `keys` into fetches and cache hits.
///
/// Incremental mode only checks presence; a cached issue is never compared
/// against the remote `updated` time.
pub fn plan<S: IssueStore>(keys: &[String], full_sync: bool, store: &S) -> SyncPlan {
  let mut plan = SyncPlan::default();
  for key in keys {
    if full_sync || !store.exists(key) {
      plan.to_fetch.push(key.clone());
    } else {
      plan.cache_hits += 1;
    }
  }
  plan
}

/// Result of a read-only cache sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
  pub checked: usize,
  /// `(key, reason)` for every entry that failed to read or parse.
  pub failures: Vec<(String, String)>,
}

impl ValidationReport {
  pub fn is_ok(&self) -> bool {
    self.failures.is_empty()
  }
}

pub struct Scraper<C, S> {
  client: C,
  cache: S,
  config: ScrapeConfig,
}

impl<C: IssueSource, S: IssueStore> Scraper<C, S> {
  pub fn new(client: C, cache: S, mut config: ScrapeConfig) -> Self {
    if config.workers == 0 {
      config.workers = DEFAULT_WORKERS;
    }
    Self {
      client,
      cache,
      config,
    }
  }

  pub fn config(&self) -> &ScrapeConfig {
    &self.config
  }

  pub fn cache(&self) -> &S {
    &self.cache
  }

  /// Fetch every issue of `project` that the sync mode says is needed.
  ///
  /// Only enumeration failures abort. Per-issue failures are counted in the
  /// result and the run moves on to the next key.
  pub async fn scrape_project(&self, project: &str) -> Result<ScrapeResult, ScrapeError> {
    let start = Instant::now();
    let mut result = ScrapeResult::default();

    info!(project, full_sync = self.config.full_sync, "starting scrape");
    if self.config.workers > 1 {
      debug!(workers = self.config.workers, "fetching sequentially");
    }

    let keys = self
      .client
      .project_issue_keys(project, self.config.limit)
      .await
      .map_err(|source| ScrapeError::Enumerate {
        project: project.to_string(),
        source,
      })?;

    info!(project, count = keys.len(), "found issues");
    result.issues_processed = keys.len();

    let SyncPlan {
      to_fetch,
      cache_hits,
    } = plan(&keys, self.config.full_sync, &self.cache);
    result.cache_hits = cache_hits;
    info!(to_fetch = to_fetch.len(), cache_hits, "planned fetches");

    let total = to_fetch.len();
    for (i, key) in to_fetch.into_iter().enumerate() {
      info!(key = %key, "fetching {}/{}", i + 1, total);

      match self.client.issue_with_history(&key).await {
        Ok((issue, duration)) => {
          result.api_calls += 1;
          if let Err(err) = self.cache.write_issue(&issue, duration) {
            warn!(key = %key, error = %err, "error caching issue");
            result.errors += 1;
            result.failed_keys.push(key);
          }
        }
        Err(err) => {
          warn!(
            key = %key,
            status = err.status().map(|s| s.as_u16()),
            error = %err,
            "error fetching issue"
          );
          result.errors += 1;
          result.failed_keys.push(key);
        }
      }

      sleep(self.config.fetch_delay).await;
    }

    result.duration = start.elapsed();
    info!(
      issues = result.issues_processed,
      api_calls = result.api_calls,
      cache_hits = result.cache_hits,
      errors = result.errors,
      duration_ms = result.duration.as_millis() as u64,
      "scrape complete"
    );

    Ok(result)
  }

  /// Fetch and cache one issue regardless of cache state.
  pub async fn scrape_issue(&self, key: &str) -> Result<PathBuf, ScrapeError> {
    info!(key, "fetching issue");

    let (issue, duration) = self
      .client
      .issue_with_history(key)
      .await
      .map_err(|source| ScrapeError::Fetch {
        key: key.to_string(),
        source,
      })?;

    let path = self
      .cache
      .write_issue(&issue, duration)
      .map_err(|source| ScrapeError::Store {
        key: key.to_string(),
        source,
      })?;

    info!(key, path = %path.display(), "fetched and cached issue");
    Ok(path)
  }

  /// Read back every cached issue and report those that fail. Repairs nothing.
  pub fn validate_cache(&self) -> Result<ValidationReport, ScrapeError> {
    validate_cache(&self.cache)
  }
}

/// Read back every issue in `cache` and report those that fail to read or parse.
pub fn validate_cache<S: IssueStore>(cache: &S) -> Result<ValidationReport, ScrapeError> {
  info!("validating cache");

  let keys = cache.list_issues().map_err(ScrapeError::List)?;
  info!(count = keys.len(), "found cached issues");

  let mut report = ValidationReport {
    checked: keys.len(),
    failures: Vec::new(),
  };
  for key in keys {
    if let Err(err) = cache.get_issue(&key) {
      warn!(key = %key, error = %err, "error reading cached issue");
      report.failures.push((key, err.to_string()));
    }
  }

  if report.is_ok() {
    info!("cache validation passed");
  } else {
    warn!(errors = report.failures.len(), "cache validation found errors");
  }
  Ok(report)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::DiskCache;
  use crate::jira::{ClientConfig, Issue};
  use reqwest::StatusCode;
  use std::cell::RefCell;
  use std::collections::HashSet;
  use std::fs;
  use tempfile::TempDir;

  #[derive(Default)]
  struct FakeSource {
    keys: Vec<String>,
    failing: HashSet<String>,
    enumerate_fails: bool,
    fetched: RefCell<Vec<String>>,
  }

  impl FakeSource {
    fn with_keys(keys: &[&str]) -> Self {
      Self {
        keys: keys.iter().map(|k| k.to_string()).collect(),
        ..Default::default()
      }
    }

    fn failing_on(mut self, key: &str) -> Self {
      self.failing.insert(key.to_string());
      self
    }

    fn fetched(&self) -> Vec<String> {
      self.fetched.borrow().clone()
    }
  }

  fn issue_for(key: &str) -> IssueWithHistory {
    let number = key.rsplit('-').next().unwrap_or("0");
    IssueWithHistory {
      issue: Issue {
        id: format!("100{}", number),
        key: key.to_string(),
        ..Default::default()
      },
      changelog: None,
    }
  }

  impl IssueSource for FakeSource {
    async fn project_issue_keys(
      &self,
      _project: &str,
      limit: Option<usize>,
    ) -> Result<Vec<String>, JiraError> {
      if self.enumerate_fails {
        return Err(JiraError::Api {
          status: StatusCode::UNAUTHORIZED,
          body: "nope".to_string(),
        });
      }
      let n = limit.unwrap_or(self.keys.len()).min(self.keys.len());
      Ok(self.keys[..n].to_vec())
    }

    async fn issue_with_history(
      &self,
      key: &str,
    ) -> Result<(IssueWithHistory, Duration), JiraError> {
      self.fetched.borrow_mut().push(key.to_string());
      if self.failing.contains(key) {
        return Err(JiraError::Api {
          status: StatusCode::INTERNAL_SERVER_ERROR,
          body: "boom".to_string(),
        });
      }
      Ok((issue_for(key), Duration::from_millis(7)))
    }
  }

  fn quick_config(full_sync: bool) -> ScrapeConfig {
    ScrapeConfig {
      full_sync,
      fetch_delay: Duration::ZERO,
      ..Default::default()
    }
  }

  fn cache_in(dir: &TempDir) -> DiskCache {
    let cache = DiskCache::with_host(dir.path(), "https://issues.example.com");
    cache.initialize().unwrap();
    cache
  }

  fn by_id_count(cache: &DiskCache) -> usize {
    fs::read_dir(cache.data_dir().join("by_id")).unwrap().count()
  }

  #[test]
  fn test_plan_full_sync_fetches_everything() {
    let dir = TempDir::new().unwrap();
    let cache = cache_in(&dir);
    cache.write_issue(&issue_for("AAH-1"), Duration::ZERO).unwrap();
    let keys = vec!["AAH-1".to_string(), "AAH-2".to_string()];

    let full = plan(&keys, true, &cache);
    assert_eq!(full.to_fetch, keys);
    assert_eq!(full.cache_hits, 0);

    let incremental = plan(&keys, false, &cache);
    assert_eq!(incremental.to_fetch, vec!["AAH-2".to_string()]);
    assert_eq!(incremental.cache_hits, 1);
  }

  #[test]
  fn test_zero_workers_uses_default() {
    let dir = TempDir::new().unwrap();
    let config = ScrapeConfig {
      workers: 0,
      ..quick_config(false)
    };
    let scraper = Scraper::new(FakeSource::default(), cache_in(&dir), config);
    assert_eq!(scraper.config().workers, DEFAULT_WORKERS);
  }

  #[tokio::test]
  async fn test_empty_cache_incremental_fetches_all() {
    let dir = TempDir::new().unwrap();
    let source = FakeSource::with_keys(&["AAH-3", "AAH-2", "AAH-1"]);
    let scraper = Scraper::new(source, cache_in(&dir), quick_config(false));

    let result = scraper.scrape_project("AAH").await.unwrap();

    assert_eq!(result.issues_processed, 3);
    assert_eq!(result.api_calls, 3);
    assert_eq!(result.cache_hits, 0);
    assert_eq!(result.errors, 0);
    assert_eq!(by_id_count(scraper.cache()), 3);
    assert_eq!(scraper.client.fetched(), vec!["AAH-3", "AAH-2", "AAH-1"]);
  }

  #[tokio::test]
  async fn test_failed_fetch_is_counted_and_run_continues() {
    let dir = TempDir::new().unwrap();
    let source = FakeSource::with_keys(&["AAH-3", "AAH-2", "AAH-1"]).failing_on("AAH-2");
    let scraper = Scraper::new(source, cache_in(&dir), quick_config(false));

    let result = scraper.scrape_project("AAH").await.unwrap();

    assert_eq!(result.api_calls, 2);
    assert_eq!(result.errors, 1);
    assert_eq!(result.failed_keys, vec!["AAH-2"]);
    assert_eq!(by_id_count(scraper.cache()), 2);
    assert!(!scraper.cache().exists("AAH-2"));
    assert!(scraper.cache().exists("AAH-1"));
  }

  #[tokio::test]
  async fn test_incremental_skips_cached_issues() {
    let dir = TempDir::new().unwrap();
    let cache = cache_in(&dir);
    cache.write_issue(&issue_for("AAH-2"), Duration::ZERO).unwrap();
    let source = FakeSource::with_keys(&["AAH-3", "AAH-2", "AAH-1"]);
    let scraper = Scraper::new(source, cache, quick_config(false));

    let result = scraper.scrape_project("AAH").await.unwrap();

    assert_eq!(result.cache_hits, 1);
    assert_eq!(result.api_calls, 2);
    assert_eq!(scraper.client.fetched(), vec!["AAH-3", "AAH-1"]);
  }

  #[tokio::test]
  async fn test_full_sync_refetches_cached_issues() {
    let dir = TempDir::new().unwrap();
    let cache = cache_in(&dir);
    cache.write_issue(&issue_for("AAH-2"), Duration::ZERO).unwrap();
    let source = FakeSource::with_keys(&["AAH-3", "AAH-2", "AAH-1"]);
    let scraper = Scraper::new(source, cache, quick_config(true));

    let result = scraper.scrape_project("AAH").await.unwrap();

    assert_eq!(result.cache_hits, 0);
    assert_eq!(result.api_calls, 3);
    assert_eq!(scraper.client.fetched(), vec!["AAH-3", "AAH-2", "AAH-1"]);
  }

  #[tokio::test]
  async fn test_limit_is_passed_to_enumeration() {
    let dir = TempDir::new().unwrap();
    let source = FakeSource::with_keys(&["AAH-3", "AAH-2", "AAH-1"]);
    let config = ScrapeConfig {
      limit: Some(2),
      ..quick_config(false)
    };
    let scraper = Scraper::new(source, cache_in(&dir), config);

    let result = scraper.scrape_project("AAH").await.unwrap();
    assert_eq!(result.issues_processed, 2);
    assert_eq!(scraper.client.fetched(), vec!["AAH-3", "AAH-2"]);
  }

  #[tokio::test]
  async fn test_enumeration_failure_aborts() {
    let dir = TempDir::new().unwrap();
    let source = FakeSource {
      enumerate_fails: true,
      ..Default::default()
    };
    let scraper = Scraper::new(source, cache_in(&dir), quick_config(false));

    let err = scraper.scrape_project("AAH").await.unwrap_err();
    assert!(matches!(err, ScrapeError::Enumerate { .. }));
    assert!(scraper.client.fetched().is_empty());
  }

  #[tokio::test]
  async fn test_scrape_issue_writes_and_propagates_errors() {
    let dir = TempDir::new().unwrap();
    let source = FakeSource::default().failing_on("AAH-9");
    let scraper = Scraper::new(source, cache_in(&dir), quick_config(false));

    let path = scraper.scrape_issue("AAH-4").await.unwrap();
    assert_eq!(path, scraper.cache().id_path("1004"));
    assert!(scraper.cache().exists("AAH-4"));

    let err = scraper.scrape_issue("AAH-9").await.unwrap_err();
    assert!(matches!(err, ScrapeError::Fetch { ref key, .. } if key == "AAH-9"));
  }

  #[tokio::test]
  async fn test_validate_cache_reports_corrupt_entries() {
    let dir = TempDir::new().unwrap();
    let cache = cache_in(&dir);
    cache.write_issue(&issue_for("AAH-1"), Duration::ZERO).unwrap();
    fs::write(cache.key_path("AAH-2"), "{").unwrap();
    let scraper = Scraper::new(FakeSource::default(), cache, quick_config(false));

    let report = scraper.validate_cache().unwrap();
    assert_eq!(report.checked, 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].0, "AAH-2");
    assert!(!report.is_ok());
  }

  #[tokio::test]
  async fn test_scrape_against_http_server() {
    let mut server = mockito::Server::new_async().await;
    let _search = server
      .mock("GET", "/rest/api/2/search")
      .match_query(mockito::Matcher::Any)
      .with_status(200)
      .with_body(
        r#"{"startAt": 0, "maxResults": 10, "total": 3, "issues": [
          {"id": "3", "key": "AAH-3", "self": ""},
          {"id": "2", "key": "AAH-2", "self": ""},
          {"id": "1", "key": "AAH-1", "self": ""}]}"#,
      )
      .create_async()
      .await;
    let mut found = Vec::new();
    for (id, key) in [("3", "AAH-3"), ("1", "AAH-1")] {
      let mock = server
        .mock("GET", format!("/rest/api/2/issue/{}", key).as_str())
        .match_query(mockito::Matcher::UrlEncoded("expand".into(), "changelog".into()))
        .with_status(200)
        .with_body(format!(
          r#"{{"id": "{}", "key": "{}", "self": "", "changelog": {{"startAt": 0, "maxResults": 0, "total": 0, "histories": []}}}}"#,
          id, key
        ))
        .create_async()
        .await;
      found.push(mock);
    }
    let missing = server
      .mock("GET", "/rest/api/2/issue/AAH-2")
      .match_query(mockito::Matcher::Any)
      .with_status(404)
      .with_body(r#"{"errorMessages": ["Issue does not exist"]}"#)
      .expect(1)
      .create_async()
      .await;

    let config = ClientConfig::new(server.url(), "secret")
      .with_backoff_unit(Duration::from_millis(1))
      .with_page_delay(Duration::ZERO);
    let client = JiraClient::new(config).unwrap();
    let dir = TempDir::new().unwrap();
    let cache = DiskCache::with_host(dir.path(), &server.url());
    cache.initialize().unwrap();
    let scraper = Scraper::new(client, cache, quick_config(false));

    let result = scraper.scrape_project("AAH").await.unwrap();

    assert_eq!(result.issues_processed, 3);
    assert_eq!(result.api_calls, 2);
    assert_eq!(result.errors, 1);
    assert_eq!(by_id_count(scraper.cache()), 2);
    assert!(scraper.cache().exists("AAH-3"));
    assert!(!scraper.cache().exists("AAH-2"));
    missing.assert_async().await;
    for mock in found {
      mock.assert_async().await;
    }
  }
}
