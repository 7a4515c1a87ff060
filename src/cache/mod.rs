//! Local issue cache.
//!
//! Each fetched issue is stored once under its immutable ID, with a symlink
//! index by its current key. Entries are overwritten on re-fetch and never
//! deleted.

mod error;
mod storage;
mod traits;

pub use error::CacheError;
pub use storage::{extract_hostname, DiskCache};
pub use traits::{CacheMetadata, CachedIssue, IssueStore};
