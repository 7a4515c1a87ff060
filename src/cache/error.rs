//! Error model for the disk cache.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CacheError>;

/// Failures are split so callers can tell "never fetched" from "corrupted".
#[derive(Debug, Error)]
pub enum CacheError {
  #[error("issue not found in cache: {}", path.display())]
  NotFound { path: PathBuf },
  #[error("failed to read {}: {source}", path.display())]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
  #[error("failed to write {}: {source}", path.display())]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
  #[error("failed to parse {}: {source}", path.display())]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
  #[error("failed to serialize issue {key}: {source}")]
  Serialize {
    key: String,
    #[source]
    source: serde_json::Error,
  },
}

impl CacheError {
  pub fn is_not_found(&self) -> bool {
    matches!(self, CacheError::NotFound { .. })
  }

  /// Classify an I/O failure on `path`, mapping a missing file to `NotFound`.
  pub(crate) fn from_read(path: PathBuf, source: io::Error) -> Self {
    if source.kind() == io::ErrorKind::NotFound {
      CacheError::NotFound { path }
    } else {
      CacheError::Read { path, source }
    }
  }
}
