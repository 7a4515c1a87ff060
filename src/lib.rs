//! Fetch Jira issues with their full changelogs into a local disk cache.
//!
//! - [`jira`]: REST client with bearer auth and 429/transport retry
//! - [`cache`]: on-disk store keyed by issue ID, indexed by issue key
//! - [`scraper`]: project sync that decides what to fetch and reports the run

pub mod cache;
pub mod config;
pub mod jira;
pub mod scraper;

/// Identity recorded in cache metadata and sent as the User-Agent.
pub const FETCHER_ID: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
