//! Remote issue tracker seam and its GitHub adapter.

pub mod github;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use github::GitHubClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIssue {
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
}

/// Partial update; `None` fields are left as they are.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueUpdate {
    pub labels: Option<Vec<String>>,
    pub body: Option<String>,
    pub state: Option<IssueState>,
}

/// The identifiers the tracker assigned to an issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteIssue {
    pub id: i64,
    pub number: i64,
    pub node_id: String,
    pub html_url: String,
    pub state: IssueState,
    pub labels: Vec<String>,
}

#[async_trait]
pub trait IssueTracker: Send + Sync {
    async fn create_issue(&self, issue: &NewIssue) -> Result<RemoteIssue>;

    async fn update_issue(&self, number: i64, update: &IssueUpdate) -> Result<RemoteIssue>;

    async fn get_issue(&self, number: i64) -> Result<RemoteIssue>;
}
