use std::fmt;
use std::time::{Duration, Instant};

use reqwest::header::{
  HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER, USER_AGENT,
};
use reqwest::{Client as HttpClient, Method, StatusCode};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::api_types::{Issue, IssueWithHistory, SearchResult};
use super::error::{JiraError, Result};
use crate::FETCHER_ID;

pub const DEFAULT_BATCH_SIZE: u32 = 10;
pub const MAX_BATCH_SIZE: u32 = 100;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_BACKOFF_UNIT: Duration = Duration::from_secs(1);
pub const DEFAULT_PAGE_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_ORDER_BY: &str = "updated DESC";

const SEARCH_FIELDS: &str = "id,key,summary,updated";

/// Connection settings and retry tunables for [`JiraClient`].
#[derive(Clone)]
pub struct ClientConfig {
  pub base_url: String,
  pub token: String,
  pub timeout: Duration,
  pub max_retries: u32,
  /// Base of the exponential schedule: attempt `n` waits `unit * 2^(n+1)`.
  pub backoff_unit: Duration,
  /// Pause between consecutive search pages.
  pub page_delay: Duration,
}

impl ClientConfig {
  pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
    Self {
      base_url: base_url.into(),
      token: token.into(),
      timeout: DEFAULT_TIMEOUT,
      max_retries: DEFAULT_MAX_RETRIES,
      backoff_unit: DEFAULT_BACKOFF_UNIT,
      page_delay: DEFAULT_PAGE_DELAY,
    }
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn with_max_retries(mut self, max_retries: u32) -> Self {
    self.max_retries = max_retries;
    self
  }

  pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
    self.backoff_unit = unit;
    self
  }

  pub fn with_page_delay(mut self, delay: Duration) -> Self {
    self.page_delay = delay;
    self
  }
}

impl fmt::Debug for ClientConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ClientConfig")
      .field("base_url", &self.base_url)
      .field("token", &"<redacted>")
      .field("timeout", &self.timeout)
      .field("max_retries", &self.max_retries)
      .field("backoff_unit", &self.backoff_unit)
      .field("page_delay", &self.page_delay)
      .finish()
  }
}

/// Jira REST v2 client with bearer auth and retry on transient failures.
#[derive(Clone, Debug)]
pub struct JiraClient {
  http: HttpClient,
  base_url: String,
  batch_size: u32,
  max_retries: u32,
  backoff_unit: Duration,
  page_delay: Duration,
}

impl JiraClient {
  pub fn new(config: ClientConfig) -> Result<Self> {
    validate_base_url(&config.base_url)?;
    let http = build_http_client(&config)?;
    Ok(Self {
      http,
      base_url: config.base_url.trim_end_matches('/').to_string(),
      batch_size: DEFAULT_BATCH_SIZE,
      max_retries: config.max_retries,
      backoff_unit: config.backoff_unit,
      page_delay: config.page_delay,
    })
  }

  pub fn base_url(&self) -> &str {
    &self.base_url
  }

  pub fn batch_size(&self) -> u32 {
    self.batch_size
  }

  /// Set the page size used by [`Self::get_all_issues_in_project`].
  /// Values outside 1..=100 are ignored.
  pub fn set_batch_size(&mut self, size: u32) {
    if (1..=MAX_BATCH_SIZE).contains(&size) {
      self.batch_size = size;
    }
  }

  /// Perform an authenticated request and return the raw body of a 2xx response.
  ///
  /// Transport failures and 429s share one attempt counter. Any other non-2xx
  /// status fails at once.
  pub async fn request(
    &self,
    method: Method,
    path: &str,
    query: &[(&str, String)],
  ) -> Result<String> {
    let url = self.url_for(path);
    debug!(%method, %url, "request");

    let mut attempt = 0;
    loop {
      if attempt > 0 {
        debug!(attempt, max_retries = self.max_retries, "retry attempt");
      }

      let response = match self.http.request(method.clone(), &url).query(query).send().await {
        Ok(response) => response,
        Err(err) if err.is_builder() => return Err(JiraError::Request(err)),
        Err(err) => {
          self.wait_after_transport_error(attempt, err).await?;
          attempt += 1;
          continue;
        }
      };

      let status = response.status();
      let retry_after = parse_retry_after(response.headers());

      let body = match response.text().await {
        Ok(body) => body,
        Err(err) => {
          self.wait_after_transport_error(attempt, err).await?;
          attempt += 1;
          continue;
        }
      };

      if status.is_success() {
        debug!(status = status.as_u16(), "request successful");
        return Ok(body);
      }

      if status == StatusCode::TOO_MANY_REQUESTS {
        if attempt >= self.max_retries {
          warn!(
            max_retries = self.max_retries,
            "rate limit exceeded and max retries reached, giving up"
          );
          return Err(JiraError::RateLimited {
            retries: self.max_retries,
            body,
          });
        }
        let wait = retry_delay(attempt, retry_after, self.backoff_unit);
        warn!(wait_ms = wait.as_millis() as u64, "rate limited (429), waiting before retry");
        sleep(wait).await;
        attempt += 1;
        continue;
      }

      warn!(status = status.as_u16(), "API error");
      return Err(JiraError::Api { status, body });
    }
  }

  async fn wait_after_transport_error(&self, attempt: u32, err: reqwest::Error) -> Result<()> {
    if attempt >= self.max_retries {
      warn!(max_retries = self.max_retries, error = %err, "max retries exceeded");
      return Err(JiraError::Transport {
        attempts: attempt + 1,
        source: err,
      });
    }
    let wait = backoff(attempt, self.backoff_unit);
    warn!(error = %err, wait_ms = wait.as_millis() as u64, "request error, waiting before retry");
    sleep(wait).await;
    Ok(())
  }

  fn url_for(&self, path: &str) -> String {
    format!("{}/{}", self.base_url, path.trim_start_matches('/'))
  }

  /// Run one JQL search page.
  pub async fn search(&self, jql: &str, max_results: u32, start_at: u32) -> Result<SearchResult> {
    let query = [
      ("jql", jql.to_string()),
      ("maxResults", max_results.to_string()),
      ("startAt", start_at.to_string()),
      ("fields", SEARCH_FIELDS.to_string()),
    ];
    let body = self.request(Method::GET, "/rest/api/2/search", &query).await?;
    serde_json::from_str(&body).map_err(|e| JiraError::parse("search results", e))
  }

  /// Get a single issue without history.
  pub async fn get_issue(&self, key: &str) -> Result<Issue> {
    let path = format!("/rest/api/2/issue/{}", key);
    let body = self.request(Method::GET, &path, &[]).await?;
    serde_json::from_str(&body).map_err(|e| JiraError::parse("issue", e))
  }

  /// Get an issue with its complete changelog, and how long the call took.
  pub async fn get_issue_with_history(&self, key: &str) -> Result<(IssueWithHistory, Duration)> {
    let start = Instant::now();
    let path = format!("/rest/api/2/issue/{}", key);
    let body = self
      .request(Method::GET, &path, &[("expand", "changelog".to_string())])
      .await?;
    let issue = serde_json::from_str(&body).map_err(|e| JiraError::parse("issue", e))?;
    Ok((issue, start.elapsed()))
  }

  /// Collect the keys of every issue in `project`, paging through search results.
  ///
  /// Stops once `limit` keys have been collected (when given), or the server
  /// total is reached.
  pub async fn get_all_issues_in_project(
    &self,
    project: &str,
    order_by: Option<&str>,
    limit: Option<usize>,
  ) -> Result<Vec<String>> {
    let order_by = order_by.filter(|o| !o.is_empty()).unwrap_or(DEFAULT_ORDER_BY);
    let limit = limit.filter(|l| *l > 0);
    let jql = format!("project = {} ORDER BY {}", project, order_by);

    info!(batch_size = self.batch_size, "searching for issues");
    if let Some(limit) = limit {
      info!(limit, "limiting search");
    }

    let mut keys = Vec::new();
    let mut start_at = 0u32;

    loop {
      let page = self.search(&jql, self.batch_size, start_at).await?;
      let page_len = page.issues.len() as u32;

      for issue in page.issues {
        keys.push(issue.key);
        if limit.is_some_and(|l| keys.len() >= l) {
          info!(limit = keys.len(), "reached limit, stopping search");
          return Ok(keys);
        }
      }

      if page_len == 0 || start_at + page_len >= page.total {
        break;
      }
      start_at += page_len;

      sleep(self.page_delay).await;
    }

    Ok(keys)
  }

  /// Verify connectivity and credentials.
  pub async fn test_connection(&self) -> Result<()> {
    self.request(Method::GET, "/rest/api/2/myself", &[]).await?;
    Ok(())
  }
}

/// Only absolute http(s) URLs with a host can be requested.
fn validate_base_url(base_url: &str) -> Result<()> {
  let url = url::Url::parse(base_url)
    .map_err(|e| JiraError::Config(format!("invalid base URL {:?}: {}", base_url, e)))?;
  if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
    return Err(JiraError::Config(format!(
      "invalid base URL {:?}: expected http(s)://host",
      base_url
    )));
  }
  Ok(())
}

fn build_http_client(config: &ClientConfig) -> Result<HttpClient> {
  let mut headers = HeaderMap::new();

  let mut auth = HeaderValue::from_str(&format!("Bearer {}", config.token))
    .map_err(|e| JiraError::Config(format!("invalid token: {}", e)))?;
  auth.set_sensitive(true);
  headers.insert(AUTHORIZATION, auth);
  headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
  headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
  headers.insert(USER_AGENT, HeaderValue::from_static(FETCHER_ID));

  HttpClient::builder()
    .default_headers(headers)
    .timeout(config.timeout)
    .build()
    .map_err(|e| JiraError::Config(e.to_string()))
}

/// Exponential backoff: `unit * 2^(attempt+1)`.
fn backoff(attempt: u32, unit: Duration) -> Duration {
  unit.saturating_mul(1u32 << (attempt + 1).min(31))
}

/// Delay before retrying a 429. A positive `Retry-After` wins over the
/// exponential schedule.
pub fn retry_delay(attempt: u32, retry_after: Option<u64>, unit: Duration) -> Duration {
  match retry_after {
    Some(secs) if secs > 0 => Duration::from_secs(secs),
    _ => backoff(attempt, unit),
  }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
  headers
    .get(RETRY_AFTER)
    .and_then(|v| v.to_str().ok())
    .and_then(|v| v.trim().parse::<u64>().ok())
    .filter(|secs| *secs > 0)
}
