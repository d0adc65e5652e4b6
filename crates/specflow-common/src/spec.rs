use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::phase::Phase;

/// Number of id characters used in branch names and document file names.
pub const SHORT_ID_LEN: usize = 8;

/// Shortest id prefix accepted for lookups.
pub const MIN_PREFIX_LEN: usize = 8;

/// First [`SHORT_ID_LEN`] characters of an id (or the whole id if shorter).
pub fn short_id(id: &str) -> &str {
    id.get(..SHORT_ID_LEN).unwrap_or(id)
}

/// A document under lifecycle management.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spec {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub phase: Phase,
    /// Assigned at creation, never changed afterwards.
    pub branch_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Spec {
    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Spec,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spec => "spec",
        }
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spec" => Ok(Self::Spec),
            _ => Err(format!("Invalid entity type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Key claimed, remote call in flight (or interrupted).
    Pending,
    /// Remote issue created.
    Success,
    /// Remote creation failed; the remote side may still have partially applied.
    Failed,
    /// Issue created and later refreshed with the current phase.
    Synced,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Synced => "synced",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "synced" => Ok(Self::Synced),
            _ => Err(format!("Invalid sync status: {}", s)),
        }
    }
}

/// Durable binding between a local entity and its remote issue.
///
/// At most one exists per `(entity_type, entity_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub id: i64,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub github_id: Option<i64>,
    pub github_number: Option<i64>,
    pub github_node_id: Option<String>,
    pub sync_status: SyncStatus,
    pub last_synced_at: DateTime<Utc>,
    pub error_message: Option<String>,
}

impl SyncRecord {
    /// Whether a remote issue is known to exist for this record.
    pub fn is_linked(&self) -> bool {
        self.github_number.is_some()
            && matches!(self.sync_status, SyncStatus::Success | SyncStatus::Synced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_id_takes_first_eight_chars() {
        assert_eq!(short_id("abc123de-0000-4000-8000-000000000000"), "abc123de");
        assert_eq!(short_id("abc"), "abc");
    }

    #[test]
    fn test_sync_status_parse() {
        for status in [
            SyncStatus::Pending,
            SyncStatus::Success,
            SyncStatus::Failed,
            SyncStatus::Synced,
        ] {
            assert_eq!(status.as_str().parse::<SyncStatus>().unwrap(), status);
        }
        assert!("done".parse::<SyncStatus>().is_err());
    }

    #[test]
    fn test_is_linked_requires_number_and_good_status() {
        let mut record = SyncRecord {
            id: 1,
            entity_type: EntityType::Spec,
            entity_id: "abc".into(),
            github_id: Some(10),
            github_number: Some(7),
            github_node_id: None,
            sync_status: SyncStatus::Success,
            last_synced_at: Utc::now(),
            error_message: None,
        };
        assert!(record.is_linked());
        record.sync_status = SyncStatus::Failed;
        assert!(!record.is_linked());
        record.sync_status = SyncStatus::Synced;
        record.github_number = None;
        assert!(!record.is_linked());
    }
}
