use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use specflow_common::{EntityType, Phase, Spec, SyncRecord, SyncStatus};
use tracing::{debug, info, warn};

use crate::config::SpecflowConfig;
use crate::document::{DocumentStore, document_body, spec_document_path};
use crate::errors::{Result, SpecError};
use crate::remote::{IssueState, IssueTracker, IssueUpdate, NewIssue, RemoteIssue};
use crate::store::{DbHandle, SyncLogEntry};

const SPEC_LABEL: &str = "spec";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    pub spec_id: String,
    pub create_if_not_exists: bool,
}

impl SyncRequest {
    pub fn create(spec_id: &str) -> Self {
        Self {
            spec_id: spec_id.to_string(),
            create_if_not_exists: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// A new remote issue was created and recorded.
    Created { record: SyncRecord, issue: RemoteIssue },
    /// No record exists and creation was not requested.
    NotLinked,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinkageOutcome {
    AlreadyLinked { record: SyncRecord },
    Created { number: i64, html_url: String },
    Failed { reason: String },
}

impl LinkageOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, LinkageOutcome::Failed { .. })
    }
}

pub struct SyncService {
    db: DbHandle,
    tracker: Arc<dyn IssueTracker>,
    documents: Arc<dyn DocumentStore>,
    specs_dir: PathBuf,
    phase_labels: BTreeMap<Phase, String>,
}

impl SyncService {
    pub fn new(
        db: DbHandle,
        tracker: Arc<dyn IssueTracker>,
        documents: Arc<dyn DocumentStore>,
        config: &SpecflowConfig,
    ) -> Self {
        let phase_labels = Phase::all()
            .iter()
            .map(|phase| (*phase, config.phase_label(*phase)))
            .collect();
        Self {
            db,
            tracker,
            documents,
            specs_dir: config.specs_dir(),
            phase_labels,
        }
    }

    fn phase_label(&self, phase: Phase) -> String {
        self.phase_labels
            .get(&phase)
            .cloned()
            .unwrap_or_else(|| format!("phase:{}", phase.as_str()))
    }

    fn labels_for(&self, phase: Phase) -> Vec<String> {
        vec![SPEC_LABEL.to_string(), self.phase_label(phase)]
    }

    pub async fn get_record(&self, spec_id: &str) -> Result<Option<SyncRecord>> {
        let id = spec_id.to_string();
        self.db
            .call(move |db| db.get_sync_record(EntityType::Spec, &id))
            .await
            .map_err(SpecError::from_store)
    }

    /// Create the remote issue for a spec, exactly once.
    ///
    /// Any existing sync record, whatever its status, is rejected with
    /// `Duplicate` before a remote call is made.
    pub async fn sync_spec_to_issue(&self, request: SyncRequest) -> Result<SyncOutcome> {
        let spec_id = request.spec_id.clone();
        let spec = {
            let id = spec_id.clone();
            self.db
                .call(move |db| db.get_spec(&id))
                .await
                .map_err(SpecError::from_store)?
                .ok_or_else(|| SpecError::not_found(&spec_id))?
        };

        if let Some(existing) = self.get_record(&spec_id).await? {
            return Err(duplicate(&existing));
        }
        if !request.create_if_not_exists {
            return Ok(SyncOutcome::NotLinked);
        }

        // Claim the key before calling out. Losing the race surfaces as a
        // uniqueness conflict here.
        let claim = SyncLogEntry::pending(EntityType::Spec, &spec_id);
        let claimed = self
            .db
            .call(move |db| db.insert_sync_record(&claim))
            .await
            .map_err(SpecError::from_store);
        match claimed {
            Ok(_) => {}
            Err(e) if e.is_integrity_violation() => {
                let status = self
                    .get_record(&spec_id)
                    .await?
                    .map(|r| r.sync_status.as_str().to_string())
                    .unwrap_or_else(|| SyncStatus::Pending.as_str().to_string());
                return Err(SpecError::Duplicate {
                    entity_type: EntityType::Spec,
                    entity_id: spec_id,
                    status,
                });
            }
            Err(e) => return Err(e),
        }

        let issue = self.build_issue(&spec).await;
        match self.tracker.create_issue(&issue).await {
            Ok(remote) => {
                let record = self
                    .record_sync_log(SyncLogEntry {
                        github_id: Some(remote.id),
                        github_number: Some(remote.number),
                        github_node_id: Some(remote.node_id.clone()),
                        status: SyncStatus::Success,
                        ..SyncLogEntry::pending(EntityType::Spec, &spec_id)
                    })
                    .await?;
                info!(spec_id = %spec_id, number = remote.number, url = %remote.html_url, "Created remote issue");
                Ok(SyncOutcome::Created {
                    record,
                    issue: remote,
                })
            }
            Err(e) => {
                let message = format!("{:#}", e);
                self.record_sync_log(SyncLogEntry::failed(EntityType::Spec, &spec_id, &message))
                    .await?;
                warn!(spec_id = %spec_id, error = %message, "Remote issue creation failed");
                Err(SpecError::ExternalService(message))
            }
        }
    }

    /// Persist a sync outcome. Inserts, falling back to an in-place update
    /// when a record for the key already exists.
    pub async fn record_sync_log(&self, entry: SyncLogEntry) -> Result<SyncRecord> {
        self.db
            .call(move |db| match db.insert_sync_record(&entry) {
                Ok(record) => Ok(record),
                Err(e)
                    if e
                        .downcast_ref::<SpecError>()
                        .is_some_and(SpecError::is_integrity_violation) =>
                {
                    db.update_sync_record(&entry)
                }
                Err(e) => Err(e),
            })
            .await
            .map_err(SpecError::from_store)
    }

    /// Make sure a spec has a remote issue. Never fails; problems are
    /// returned as `LinkageOutcome::Failed` and logged.
    pub async fn ensure_remote_linkage(&self, spec_id: &str) -> LinkageOutcome {
        match self.get_record(spec_id).await {
            Ok(Some(record)) => return LinkageOutcome::AlreadyLinked { record },
            Ok(None) => {}
            Err(e) => {
                warn!(spec_id = %spec_id, error = %e, "Failed to read sync record");
                return LinkageOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        }
        match self.sync_spec_to_issue(SyncRequest::create(spec_id)).await {
            Ok(SyncOutcome::Created { issue, .. }) => LinkageOutcome::Created {
                number: issue.number,
                html_url: issue.html_url,
            },
            Ok(SyncOutcome::NotLinked) => LinkageOutcome::Failed {
                reason: "issue was not created".to_string(),
            },
            Err(e) => {
                warn!(spec_id = %spec_id, error = %e, "Remote linkage failed");
                LinkageOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Mirror a phase onto the linked issue's labels and state.
    ///
    /// Skips silently when the spec has no linked issue. The local phase is
    /// never touched.
    pub async fn update_phase_label(&self, spec_id: &str, phase: Phase) -> Result<()> {
        let Some(record) = self.get_record(spec_id).await? else {
            debug!(spec_id = %spec_id, "No sync record, skipping label update");
            return Ok(());
        };
        let Some(number) = record.github_number else {
            debug!(spec_id = %spec_id, status = %record.sync_status.as_str(), "Sync record has no issue number, skipping label update");
            return Ok(());
        };

        let update = IssueUpdate {
            labels: Some(self.labels_for(phase)),
            body: None,
            state: Some(if phase.is_terminal() {
                IssueState::Closed
            } else {
                IssueState::Open
            }),
        };
        let id = spec_id.to_string();
        match self.tracker.update_issue(number, &update).await {
            Ok(_) => {
                self.db
                    .call(move |db| {
                        db.update_sync_status(EntityType::Spec, &id, SyncStatus::Success, None)
                    })
                    .await
                    .map_err(SpecError::from_store)?;
                debug!(spec_id = %spec_id, number, phase = %phase, "Updated issue phase label");
                Ok(())
            }
            Err(e) => {
                let message = format!("{:#}", e);
                let status = record.sync_status;
                let recorded = message.clone();
                self.db
                    .call(move |db| {
                        db.update_sync_status(EntityType::Spec, &id, status, Some(&recorded))
                    })
                    .await
                    .map_err(SpecError::from_store)?;
                Err(SpecError::ExternalService(message))
            }
        }
    }

    async fn build_issue(&self, spec: &Spec) -> NewIssue {
        let path = spec_document_path(&self.specs_dir, spec);
        let content = match self.documents.read(&path).await {
            Ok(Some(content)) => document_body(&content).to_string(),
            Ok(None) => spec.description.clone().unwrap_or_default(),
            Err(e) => {
                warn!(spec_id = %spec.id, error = %format!("{:#}", e), "Failed to read spec document for issue body");
                spec.description.clone().unwrap_or_default()
            }
        };
        let body = format!(
            "{}\n\n---\n_Managed by specflow. Spec ID: `{}`_",
            content, spec.id
        );
        NewIssue {
            title: spec.name.clone(),
            body,
            labels: self.labels_for(spec.phase),
        }
    }
}

fn duplicate(record: &SyncRecord) -> SpecError {
    SpecError::Duplicate {
        entity_type: record.entity_type,
        entity_id: record.entity_id.clone(),
        status: record.sync_status.as_str().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::FsDocumentStore;
    use crate::store::SpecDb;
    use crate::testing::{FakeTracker, sample_spec, test_config};

    struct Fixture {
        _dir: tempfile::TempDir,
        db: DbHandle,
        tracker: Arc<FakeTracker>,
        service: Arc<SyncService>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let db = DbHandle::new(SpecDb::new_in_memory().unwrap());
        let tracker = Arc::new(FakeTracker::new());
        let service = Arc::new(SyncService::new(
            db.clone(),
            tracker.clone(),
            Arc::new(FsDocumentStore::new()),
            &config,
        ));
        Fixture {
            _dir: dir,
            db,
            tracker,
            service,
        }
    }

    fn insert_spec(db: &DbHandle, id: &str) -> Spec {
        db.lock_sync()
            .unwrap()
            .insert_spec(&sample_spec(id, "Add login"))
            .unwrap()
    }

    #[tokio::test]
    async fn test_first_sync_creates_one_issue() {
        let f = fixture();
        insert_spec(&f.db, "abc123de-0001");

        let outcome = f
            .service
            .sync_spec_to_issue(SyncRequest::create("abc123de-0001"))
            .await
            .unwrap();
        let SyncOutcome::Created { record, issue } = outcome else {
            panic!("Expected Created");
        };
        assert_eq!(record.sync_status, SyncStatus::Success);
        assert_eq!(record.github_number, Some(issue.number));
        assert_eq!(f.tracker.create_calls(), 1);

        let created = f.tracker.created_issues();
        assert_eq!(created[0].title, "Add login");
        assert_eq!(created[0].labels, vec!["spec", "phase:requirements"]);
        assert!(created[0].body.contains("abc123de-0001"));
    }

    #[tokio::test]
    async fn test_second_sync_is_duplicate_without_remote_call() {
        let f = fixture();
        insert_spec(&f.db, "abc123de-0001");
        f.service
            .sync_spec_to_issue(SyncRequest::create("abc123de-0001"))
            .await
            .unwrap();

        let err = f
            .service
            .sync_spec_to_issue(SyncRequest::create("abc123de-0001"))
            .await
            .unwrap_err();
        match err {
            SpecError::Duplicate { status, .. } => assert_eq!(status, "success"),
            other => panic!("Expected Duplicate, got {:?}", other),
        }
        assert_eq!(f.tracker.create_calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_record_also_blocks_retry() {
        let f = fixture();
        insert_spec(&f.db, "abc123de-0001");
        f.tracker.fail_creates(true);

        let err = f
            .service
            .sync_spec_to_issue(SyncRequest::create("abc123de-0001"))
            .await
            .unwrap_err();
        assert!(matches!(err, SpecError::ExternalService(_)));
        let record = f.service.get_record("abc123de-0001").await.unwrap().unwrap();
        assert_eq!(record.sync_status, SyncStatus::Failed);
        assert!(record.error_message.is_some());

        f.tracker.fail_creates(false);
        let err = f
            .service
            .sync_spec_to_issue(SyncRequest::create("abc123de-0001"))
            .await
            .unwrap_err();
        assert!(matches!(err, SpecError::Duplicate { .. }));
        assert_eq!(f.tracker.create_calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_syncs_create_exactly_one_issue() {
        let f = fixture();
        insert_spec(&f.db, "abc123de-0001");

        let (a, b) = tokio::join!(
            f.service
                .sync_spec_to_issue(SyncRequest::create("abc123de-0001")),
            f.service
                .sync_spec_to_issue(SyncRequest::create("abc123de-0001")),
        );
        let successes = [&a, &b].iter().filter(|r| r.is_ok()).count();
        let duplicates = [&a, &b]
            .iter()
            .filter(|r| matches!(r, Err(SpecError::Duplicate { .. })))
            .count();
        assert_eq!((successes, duplicates), (1, 1));
        assert_eq!(f.tracker.create_calls(), 1);
        assert_eq!(
            f.db.lock_sync()
                .unwrap()
                .count_sync_records(EntityType::Spec, "abc123de-0001")
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_no_create_returns_not_linked() {
        let f = fixture();
        insert_spec(&f.db, "abc123de-0001");
        let outcome = f
            .service
            .sync_spec_to_issue(SyncRequest {
                spec_id: "abc123de-0001".into(),
                create_if_not_exists: false,
            })
            .await
            .unwrap();
        assert_eq!(outcome, SyncOutcome::NotLinked);
        assert_eq!(f.tracker.create_calls(), 0);
        assert!(f.service.get_record("abc123de-0001").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_spec_is_not_found() {
        let f = fixture();
        let err = f
            .service
            .sync_spec_to_issue(SyncRequest::create("missing-spec"))
            .await
            .unwrap_err();
        assert!(matches!(err, SpecError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_record_sync_log_upserts() {
        let f = fixture();
        f.service
            .record_sync_log(SyncLogEntry::failed(EntityType::Spec, "s1", "boom"))
            .await
            .unwrap();
        let record = f
            .service
            .record_sync_log(SyncLogEntry {
                github_number: Some(4),
                status: SyncStatus::Success,
                ..SyncLogEntry::pending(EntityType::Spec, "s1")
            })
            .await
            .unwrap();
        assert_eq!(record.sync_status, SyncStatus::Success);
        assert_eq!(record.github_number, Some(4));
        assert_eq!(
            f.db.lock_sync()
                .unwrap()
                .count_sync_records(EntityType::Spec, "s1")
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_ensure_remote_linkage_outcomes() {
        let f = fixture();
        insert_spec(&f.db, "abc123de-0001");

        let first = f.service.ensure_remote_linkage("abc123de-0001").await;
        assert!(matches!(first, LinkageOutcome::Created { .. }));
        let second = f.service.ensure_remote_linkage("abc123de-0001").await;
        assert!(matches!(second, LinkageOutcome::AlreadyLinked { .. }));
        assert_eq!(f.tracker.create_calls(), 1);

        insert_spec(&f.db, "abc123de-0002");
        f.tracker.fail_creates(true);
        let failed = f.service.ensure_remote_linkage("abc123de-0002").await;
        assert!(failed.is_failed());
    }

    #[tokio::test]
    async fn test_update_phase_label_refreshes_record_and_closes_on_completed() {
        let f = fixture();
        insert_spec(&f.db, "abc123de-0001");
        f.service
            .sync_spec_to_issue(SyncRequest::create("abc123de-0001"))
            .await
            .unwrap();

        f.service
            .update_phase_label("abc123de-0001", Phase::Completed)
            .await
            .unwrap();
        let (number, update) = f.tracker.last_update().unwrap();
        assert_eq!(number, 1);
        assert_eq!(
            update.labels,
            Some(vec!["spec".to_string(), "phase:completed".to_string()])
        );
        assert_eq!(update.state, Some(IssueState::Closed));

        let record = f.service.get_record("abc123de-0001").await.unwrap().unwrap();
        assert_eq!(record.sync_status, SyncStatus::Success);
        assert!(record.error_message.is_none());
    }

    #[tokio::test]
    async fn test_update_phase_label_failure_records_error() {
        let f = fixture();
        insert_spec(&f.db, "abc123de-0001");
        f.service
            .sync_spec_to_issue(SyncRequest::create("abc123de-0001"))
            .await
            .unwrap();
        f.tracker.fail_updates(true);

        let err = f
            .service
            .update_phase_label("abc123de-0001", Phase::Design)
            .await
            .unwrap_err();
        assert!(matches!(err, SpecError::ExternalService(_)));
        let record = f.service.get_record("abc123de-0001").await.unwrap().unwrap();
        assert_eq!(record.sync_status, SyncStatus::Success);
        assert!(record.error_message.is_some());
    }

    #[tokio::test]
    async fn test_update_phase_label_without_record_is_skipped() {
        let f = fixture();
        f.service
            .update_phase_label("abc123de-0001", Phase::Design)
            .await
            .unwrap();
        assert_eq!(f.tracker.update_calls(), 0);
    }
}
