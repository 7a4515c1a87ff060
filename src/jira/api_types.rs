//! Serde types matching Jira REST v2 responses.
//!
//! These are stored verbatim inside the cache envelope, so field names follow
//! the API (`startAt`, `displayName`, `issuetype`, ...) and optional fields keep
//! their null/absent distinction across a round-trip.

use serde::{Deserialize, Serialize};

// ============================================================================
// Common nested field types
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub key: String,
  #[serde(rename = "displayName", default)]
  pub display_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
  #[serde(default)]
  pub id: String,
  #[serde(default)]
  pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Priority {
  #[serde(default)]
  pub id: String,
  #[serde(default)]
  pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueType {
  #[serde(default)]
  pub id: String,
  #[serde(default)]
  pub name: String,
}

// ============================================================================
// Issues
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueFields {
  #[serde(default)]
  pub summary: String,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(rename = "issuetype", default)]
  pub issue_type: Option<IssueType>,
  #[serde(default)]
  pub status: Option<Status>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub priority: Option<Priority>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub assignee: Option<User>,
  #[serde(default)]
  pub creator: Option<User>,
  #[serde(default)]
  pub created: String,
  #[serde(default)]
  pub updated: String,
  #[serde(
    rename = "resolutiondate",
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub resolution_date: Option<String>,
}

/// An issue without history. `id` is the stable identity; `key` can change
/// when an issue is moved between projects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
  pub id: String,
  pub key: String,
  #[serde(rename = "self", default)]
  pub self_url: String,
  #[serde(default)]
  pub fields: Option<IssueFields>,
}

/// Issue as returned with `expand=changelog`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueWithHistory {
  #[serde(flatten)]
  pub issue: Issue,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub changelog: Option<Changelog>,
}

impl IssueWithHistory {
  pub fn id(&self) -> &str {
    &self.issue.id
  }

  pub fn key(&self) -> &str {
    &self.issue.key
  }
}

// ============================================================================
// Changelog
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changelog {
  #[serde(rename = "startAt", default)]
  pub start_at: u32,
  #[serde(rename = "maxResults", default)]
  pub max_results: u32,
  #[serde(default)]
  pub total: u32,
  #[serde(default)]
  pub histories: Vec<History>,
}

/// A single change event. Items keep the order the server sent them in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct History {
  #[serde(default)]
  pub id: String,
  #[serde(default)]
  pub author: Option<User>,
  #[serde(default)]
  pub created: String,
  #[serde(default)]
  pub items: Vec<HistoryItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryItem {
  #[serde(default)]
  pub field: String,
  #[serde(rename = "fieldtype", default)]
  pub field_type: String,
  #[serde(default)]
  pub from: Option<String>,
  #[serde(rename = "fromString", default)]
  pub from_string: Option<String>,
  #[serde(default)]
  pub to: Option<String>,
  #[serde(rename = "toString", default)]
  pub to_string: Option<String>,
}

// ============================================================================
// Search endpoint response
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
  #[serde(rename = "startAt", default)]
  pub start_at: u32,
  #[serde(rename = "maxResults", default)]
  pub max_results: u32,
  #[serde(default)]
  pub total: u32,
  #[serde(default)]
  pub issues: Vec<Issue>,
}

#[cfg(test)]
mod tests {
  use super::*;

  const ISSUE_JSON: &str = r#"{
    "id": "10042",
    "key": "AAH-7",
    "self": "https://issues.example.com/rest/api/2/issue/10042",
    "fields": {
      "summary": "Broken link",
      "description": null,
      "issuetype": {"id": "1", "name": "Bug"},
      "status": {"id": "3", "name": "In Progress"},
      "creator": {"name": "jdoe", "key": "jdoe", "displayName": "J. Doe"},
      "created": "2024-01-02T10:00:00.000+0000",
      "updated": "2024-01-03T10:00:00.000+0000",
      "customfield_10001": "ignored"
    },
    "changelog": {
      "startAt": 0,
      "maxResults": 2,
      "total": 2,
      "histories": [
        {
          "id": "1",
          "author": {"displayName": "Cloud User"},
          "created": "2024-01-02T11:00:00.000+0000",
          "items": [
            {"field": "status", "fieldtype": "jira", "from": "1", "fromString": "Open", "to": "3", "toString": "In Progress"},
            {"field": "assignee", "fieldtype": "jira", "from": null, "fromString": null, "to": "jdoe", "toString": "J. Doe"}
          ]
        },
        {
          "id": "2",
          "author": null,
          "created": "2024-01-03T10:00:00.000+0000",
          "items": []
        }
      ]
    }
  }"#;

  #[test]
  fn test_issue_with_history_parses_nested_fields() {
    let issue: IssueWithHistory = serde_json::from_str(ISSUE_JSON).unwrap();

    assert_eq!(issue.id(), "10042");
    assert_eq!(issue.key(), "AAH-7");
    let fields = issue.issue.fields.as_ref().unwrap();
    assert_eq!(fields.summary, "Broken link");
    assert_eq!(fields.description, None);
    assert_eq!(fields.status.as_ref().unwrap().name, "In Progress");
    assert!(fields.assignee.is_none());

    let changelog = issue.changelog.as_ref().unwrap();
    assert_eq!(changelog.histories.len(), 2);
    assert_eq!(changelog.histories[0].items[1].field, "assignee");
    assert_eq!(
      changelog.histories[0].author.as_ref().unwrap().display_name,
      "Cloud User"
    );
  }

  #[test]
  fn test_history_order_survives_reserialization() {
    let issue: IssueWithHistory = serde_json::from_str(ISSUE_JSON).unwrap();
    let json = serde_json::to_string(&issue).unwrap();
    let again: IssueWithHistory = serde_json::from_str(&json).unwrap();

    assert_eq!(issue, again);
    let items: Vec<&str> = again.changelog.as_ref().unwrap().histories[0]
      .items
      .iter()
      .map(|i| i.field.as_str())
      .collect();
    assert_eq!(items, vec!["status", "assignee"]);
  }

  #[test]
  fn test_optional_fields_are_omitted_or_null() {
    let issue: IssueWithHistory = serde_json::from_str(ISSUE_JSON).unwrap();
    let value = serde_json::to_value(&issue).unwrap();
    let fields = &value["fields"];

    assert!(fields.get("priority").is_none());
    assert!(fields.get("assignee").is_none());
    assert!(fields.get("resolutiondate").is_none());
    assert!(fields.get("creator").is_some());
    assert!(value["changelog"]["histories"][0]["items"][1]["from"].is_null());
    assert_eq!(value["self"], "https://issues.example.com/rest/api/2/issue/10042");
  }

  #[test]
  fn test_issue_without_changelog_omits_it() {
    let issue = IssueWithHistory {
      issue: Issue {
        id: "1".into(),
        key: "A-1".into(),
        ..Default::default()
      },
      changelog: None,
    };
    let value = serde_json::to_value(&issue).unwrap();
    assert!(value.get("changelog").is_none());
  }

  #[test]
  fn test_search_result_parses_page() {
    let page: SearchResult = serde_json::from_str(
      r#"{"startAt": 10, "maxResults": 10, "total": 12, "issues": [
        {"id": "1", "key": "AAH-1", "self": "x", "fields": {"summary": "a", "updated": "u"}},
        {"id": "2", "key": "AAH-2", "self": "y"}
      ]}"#,
    )
    .unwrap();

    assert_eq!(page.start_at, 10);
    assert_eq!(page.total, 12);
    assert_eq!(page.issues.len(), 2);
    assert!(page.issues[1].fields.is_none());
  }
}
