use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use specflow_common::{EventPayload, LifecycleEvent};
use tracing::debug;

use super::service::{LinkageOutcome, SyncService};
use crate::events::EventHandler;

pub const SYNC_HANDLER: &str = "remote-sync";

/// Mirrors lifecycle events onto the remote tracker.
///
/// - `spec.phase_changed` updates the issue's phase label.
/// - `spec.created` links a new issue when `on_create` is set.
pub struct SyncHandler {
    service: Arc<SyncService>,
    on_create: bool,
}

impl SyncHandler {
    pub fn new(service: Arc<SyncService>, on_create: bool) -> Self {
        Self { service, on_create }
    }
}

#[async_trait]
impl EventHandler for SyncHandler {
    fn name(&self) -> &str {
        SYNC_HANDLER
    }

    async fn handle(&self, event: &LifecycleEvent) -> Result<()> {
        match &event.payload {
            EventPayload::PhaseChanged { new_phase, .. } => {
                self.service
                    .update_phase_label(&event.subject_id, *new_phase)
                    .await?;
            }
            EventPayload::SpecCreated { .. } if self.on_create => {
                if let LinkageOutcome::Failed { reason } =
                    self.service.ensure_remote_linkage(&event.subject_id).await
                {
                    anyhow::bail!("remote linkage failed: {}", reason);
                }
            }
            _ => {
                debug!(event_type = %event.event_type, subject_id = %event.subject_id, "Nothing to sync");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::FsDocumentStore;
    use crate::events::EventBus;
    use crate::store::{DbHandle, SpecDb};
    use crate::testing::{FakeTracker, sample_spec, test_config};
    use specflow_common::{EventType, Phase};

    fn setup(on_create: bool) -> (tempfile::TempDir, DbHandle, Arc<FakeTracker>, EventBus) {
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
        let bus = EventBus::new([SYNC_HANDLER]);
        let handler = Arc::new(SyncHandler::new(service, on_create));
        for event_type in EventType::all() {
            bus.register(*event_type, handler.clone()).unwrap();
        }
        (dir, db, tracker, bus)
    }

    fn created_event(bus: &EventBus, id: &str) -> LifecycleEvent {
        bus.create_event(
            EventType::SpecCreated,
            id,
            EventPayload::SpecCreated {
                name: "Add login".into(),
                phase: Phase::Requirements,
                branch_name: None,
            },
            None,
        )
    }

    #[tokio::test]
    async fn test_created_event_links_issue_when_enabled() {
        let (_dir, db, tracker, bus) = setup(true);
        db.lock_sync()
            .unwrap()
            .insert_spec(&sample_spec("abc123de-0001", "Add login"))
            .unwrap();
        let report = bus.publish(&created_event(&bus, "abc123de-0001")).await.unwrap();
        assert!(report.is_clean());
        assert_eq!(tracker.create_calls(), 1);
    }

    #[tokio::test]
    async fn test_created_event_ignored_when_disabled() {
        let (_dir, _db, tracker, bus) = setup(false);
        let report = bus.publish(&created_event(&bus, "abc123de-0001")).await.unwrap();
        assert!(report.is_clean());
        assert_eq!(tracker.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_label_failure_is_reported_not_raised() {
        let (_dir, db, tracker, bus) = setup(true);
        db.lock_sync()
            .unwrap()
            .insert_spec(&sample_spec("abc123de-0001", "Add login"))
            .unwrap();
        bus.publish(&created_event(&bus, "abc123de-0001")).await.unwrap();
        tracker.fail_updates(true);

        let changed = bus.create_event(
            EventType::PhaseChanged,
            "abc123de-0001",
            EventPayload::PhaseChanged {
                old_phase: Phase::Requirements,
                new_phase: Phase::Design,
            },
            None,
        );
        let report = bus.publish(&changed).await.unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].handler, SYNC_HANDLER);
    }
}
