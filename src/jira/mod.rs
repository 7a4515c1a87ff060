//! Jira REST v2 client and the response types it produces.

pub mod api_types;
pub mod client;
pub mod error;

pub use api_types::{
  Changelog, History, HistoryItem, Issue, IssueFields, IssueType, IssueWithHistory, Priority,
  SearchResult, Status, User,
};
pub use client::{ClientConfig, JiraClient};
pub use error::JiraError;
