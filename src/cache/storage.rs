//! Disk storage for fetched issues.
//!
//! Layout under the data directory:
//!
//! ```text
//! by_id/<id>.json     envelope, authoritative
//! by_key/<key>.json   symlink to ../by_id/<id>.json
//! ```
//!
//! With a Jira URL the data directory is `<base>/jira/<hostname>`, so several
//! instances can share one base. Without one it is `<base>` itself.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::error::{CacheError, Result};
use super::traits::{CacheMetadata, CachedIssue, IssueStore};
use crate::jira::IssueWithHistory;
use crate::FETCHER_ID;

const BY_ID: &str = "by_id";
const BY_KEY: &str = "by_key";
const EXTENSION: &str = ".json";

/// Issue cache keyed by immutable ID, with a best-effort index by key.
#[derive(Debug, Clone)]
pub struct DiskCache {
  data_dir: PathBuf,
}

impl DiskCache {
  /// Cache using the flat layout directly under `base_dir`.
  pub fn new(base_dir: impl Into<PathBuf>) -> Self {
    Self {
      data_dir: base_dir.into(),
    }
  }

  /// Cache namespaced by the hostname of `jira_url`.
  pub fn with_host(base_dir: impl Into<PathBuf>, jira_url: &str) -> Self {
    let base_dir = base_dir.into();
    let host = extract_hostname(jira_url);
    let data_dir = if host.is_empty() {
      base_dir
    } else {
      base_dir.join("jira").join(host)
    };
    Self { data_dir }
  }

  pub fn data_dir(&self) -> &Path {
    &self.data_dir
  }

  pub fn id_path(&self, id: &str) -> PathBuf {
    self.data_dir.join(BY_ID).join(format!("{}{}", id, EXTENSION))
  }

  pub fn key_path(&self, key: &str) -> PathBuf {
    self.data_dir.join(BY_KEY).join(format!("{}{}", key, EXTENSION))
  }

  /// Create the `by_id` and `by_key` directories if they are missing.
  pub fn initialize(&self) -> Result<()> {
    for dir in [self.data_dir.join(BY_ID), self.data_dir.join(BY_KEY)] {
      fs::create_dir_all(&dir).map_err(|source| CacheError::Write { path: dir, source })?;
    }
    Ok(())
  }

  /// Store `issue` with fresh metadata and point its key entry at it.
  ///
  /// Only the by-ID write can fail the call; a key index failure is logged.
  pub fn write_issue(&self, issue: &IssueWithHistory, fetch_duration: Duration) -> Result<PathBuf> {
    let path = self.commit_primary(issue, fetch_duration)?;

    if let Err(err) = self.update_key_index(issue.key(), issue.id()) {
      warn!(
        key = issue.key(),
        path = %self.key_path(issue.key()).display(),
        error = %err,
        "failed to create key symlink"
      );
    }

    Ok(path)
  }

  /// Write the envelope to `by_id/<id>.json`, replacing the previous file.
  fn commit_primary(&self, issue: &IssueWithHistory, fetch_duration: Duration) -> Result<PathBuf> {
    let cached = CachedIssue {
      cache_metadata: CacheMetadata::new(FETCHER_ID, fetch_duration),
      jira_data: issue.clone(),
    };

    let data = serde_json::to_vec_pretty(&cached).map_err(|source| CacheError::Serialize {
      key: issue.key().to_string(),
      source,
    })?;

    let path = self.id_path(issue.id());
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, &data).map_err(|source| CacheError::Write {
      path: tmp.clone(),
      source,
    })?;
    fs::rename(&tmp, &path).map_err(|source| CacheError::Write {
      path: path.clone(),
      source,
    })?;

    debug!(key = issue.key(), path = %path.display(), "wrote issue");
    Ok(path)
  }

  /// Replace `by_key/<key>.json` with a relative symlink to the by-ID file.
  pub fn update_key_index(&self, key: &str, id: &str) -> io::Result<()> {
    let link = self.key_path(key);
    let target = Path::new("..")
      .join(BY_ID)
      .join(format!("{}{}", id, EXTENSION));

    match fs::remove_file(&link) {
      Ok(()) => {}
      Err(err) if err.kind() == io::ErrorKind::NotFound => {}
      Err(err) => return Err(err),
    }

    symlink_file(&target, &link)
  }

  /// Read an issue through its key entry.
  pub fn get_issue(&self, key: &str) -> Result<CachedIssue> {
    read_issue_file(&self.key_path(key))
  }

  /// Read an issue from its authoritative by-ID file.
  pub fn get_issue_by_id(&self, id: &str) -> Result<CachedIssue> {
    read_issue_file(&self.id_path(id))
  }

  /// When `key` was last fetched.
  ///
  /// Uses the envelope metadata, falling back to the key entry's modification
  /// time for files written without it.
  pub fn last_fetched(&self, key: &str) -> Result<DateTime<Utc>> {
    if let Some(fetched_at) = self
      .get_issue(key)
      .ok()
      .and_then(|cached| cached.cache_metadata.fetched_at())
    {
      return Ok(fetched_at);
    }

    let path = self.key_path(key);
    let modified = fs::metadata(&path)
      .and_then(|meta| meta.modified())
      .map_err(|source| CacheError::from_read(path, source))?;
    Ok(DateTime::<Utc>::from(modified))
  }

  pub fn exists(&self, key: &str) -> bool {
    self.key_path(key).exists()
  }

  /// All keys in the key index, sorted.
  pub fn list_issues(&self) -> Result<Vec<String>> {
    let dir = self.data_dir.join(BY_KEY);
    let entries = match fs::read_dir(&dir) {
      Ok(entries) => entries,
      Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
      Err(source) => return Err(CacheError::Read { path: dir, source }),
    };

    let mut keys = Vec::new();
    for entry in entries {
      let entry = entry.map_err(|source| CacheError::Read {
        path: dir.clone(),
        source,
      })?;
      if entry.file_type().map(|t| t.is_dir()).unwrap_or(true) {
        continue;
      }
      if let Some(key) = entry
        .file_name()
        .to_str()
        .and_then(|name| name.strip_suffix(EXTENSION))
      {
        keys.push(key.to_string());
      }
    }

    keys.sort();
    Ok(keys)
  }

  /// Keys belonging to `project`, matched on the `"<project>-"` prefix.
  pub fn list_issues_for_project(&self, project: &str) -> Result<Vec<String>> {
    let prefix = format!("{}-", project);
    Ok(
      self
        .list_issues()?
        .into_iter()
        .filter(|key| key.starts_with(&prefix))
        .collect(),
    )
  }
}

impl IssueStore for DiskCache {
  fn exists(&self, key: &str) -> bool {
    DiskCache::exists(self, key)
  }

  fn write_issue(&self, issue: &IssueWithHistory, fetch_duration: Duration) -> Result<PathBuf> {
    DiskCache::write_issue(self, issue, fetch_duration)
  }

  fn get_issue(&self, key: &str) -> Result<CachedIssue> {
    DiskCache::get_issue(self, key)
  }

  fn list_issues(&self) -> Result<Vec<String>> {
    DiskCache::list_issues(self)
  }
}

fn read_issue_file(path: &Path) -> Result<CachedIssue> {
  let data = fs::read(path).map_err(|source| CacheError::from_read(path.to_path_buf(), source))?;
  serde_json::from_slice(&data).map_err(|source| CacheError::Parse {
    path: path.to_path_buf(),
    source,
  })
}

/// Host (with explicit port) of a Jira URL.
///
/// A string without a scheme, such as `jira.example.com`, has no host and
/// selects the flat layout. Other unparseable URLs map to `unknown`.
pub fn extract_hostname(jira_url: &str) -> String {
  let url = match url::Url::parse(jira_url) {
    Ok(url) => url,
    Err(url::ParseError::RelativeUrlWithoutBase) => return String::new(),
    Err(_) => return "unknown".to_string(),
  };
  match (url.host_str(), url.port()) {
    (Some(host), Some(port)) => format!("{}:{}", host, port),
    (Some(host), None) => host.to_string(),
    (None, _) => String::new(),
  }
}

#[cfg(unix)]
fn symlink_file(target: &Path, link: &Path) -> io::Result<()> {
  std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink_file(target: &Path, link: &Path) -> io::Result<()> {
  std::os::windows::fs::symlink_file(target, link)
}

#[cfg(not(any(unix, windows)))]
fn symlink_file(_target: &Path, _link: &Path) -> io::Result<()> {
  Err(io::Error::new(
    io::ErrorKind::Unsupported,
    "symbolic links are not supported on this platform",
  ))
}
