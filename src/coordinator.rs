//! Spec lifecycle coordination.
//!
//! The coordinator owns every multi-resource operation: it validates input,
//! commits the store, writes the document, and publishes the resulting event.
//! The store is the source of truth; the document follows it and is rolled
//! back against it; the remote mirror is best effort and reported through
//! warnings.
//!
//! | Operation          | Event published        |
//! |--------------------|------------------------|
//! | `create_spec`      | `spec.created`         |
//! | `transition_phase` | `spec.phase_changed`   |
//! | `delete_spec`      | `spec.deleted`         |

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use specflow_common::{
    EventPayload, EventType, LifecycleEvent, MIN_PREFIX_LEN, Phase, Spec, TransitionKind,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::document::{
    DocumentStore, render_document, rewrite_front_matter, spec_document_path,
};
use crate::errors::{Result, SpecError};
use crate::events::EventBus;
use crate::store::DbHandle;
use crate::sync::{LinkageOutcome, SyncService};
use crate::vcs::{BranchManager, BranchOutcome, sanitize_branch_component};

const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(5);

/// Parse a user-supplied phase name, normalizing aliases.
pub fn validate_phase(input: &str) -> Result<Phase> {
    let phase: Phase = input.parse()?;
    if Phase::is_deprecated_alias(input) {
        warn!(input = %input, phase = %phase, "Phase name is deprecated; use 'design'");
    }
    Ok(phase)
}

/// Input to [`SpecCoordinator::create_spec`].
#[derive(Debug, Clone)]
pub struct NewSpec {
    pub name: String,
    pub description: Option<String>,
    /// Custom branch suffix. Defaults to the spec name.
    pub branch_name: Option<String>,
    pub create_branch: bool,
    /// Explicit id. A fresh UUID v4 is generated when absent.
    pub id: Option<String>,
}

impl NewSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            branch_name: None,
            create_branch: true,
            id: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_branch_name(mut self, branch_name: impl Into<String>) -> Self {
        self.branch_name = Some(branch_name.into());
        self
    }

    pub fn without_branch(mut self) -> Self {
        self.create_branch = false;
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct CreateOutcome {
    pub spec: Spec,
    pub branch: Option<BranchOutcome>,
    pub document_path: PathBuf,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub spec: Spec,
    pub old_phase: Phase,
    pub new_phase: Phase,
    pub kind: TransitionKind,
    pub changed: bool,
    pub linkage: Option<LinkageOutcome>,
    /// Applied, but a downstream mirror failed.
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DeleteOutcome {
    pub spec: Spec,
    pub sync_records_removed: usize,
    pub document_removed: bool,
    pub warnings: Vec<String>,
}

/// A failed document update, and whether the new content already replaced
/// the old file.
struct DocumentFailure {
    replaced: bool,
    source: anyhow::Error,
}

impl DocumentFailure {
    fn untouched(source: anyhow::Error) -> Self {
        Self {
            replaced: false,
            source,
        }
    }
}

pub struct SpecCoordinator {
    db: DbHandle,
    documents: Arc<dyn DocumentStore>,
    bus: Arc<EventBus>,
    specs_dir: PathBuf,
    branches: Option<BranchManager>,
    sync: Option<Arc<SyncService>>,
    ready_timeout: Duration,
}

impl SpecCoordinator {
    pub fn new(
        db: DbHandle,
        documents: Arc<dyn DocumentStore>,
        bus: Arc<EventBus>,
        specs_dir: PathBuf,
    ) -> Self {
        Self {
            db,
            documents,
            bus,
            specs_dir,
            branches: None,
            sync: None,
            ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }

    pub fn with_branch_manager(mut self, branches: BranchManager) -> Self {
        self.branches = Some(branches);
        self
    }

    pub fn with_sync(mut self, sync: Arc<SyncService>) -> Self {
        self.sync = Some(sync);
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn sync_service(&self) -> Option<&Arc<SyncService>> {
        self.sync.as_ref()
    }

    pub fn document_path(&self, spec: &Spec) -> PathBuf {
        spec_document_path(&self.specs_dir, spec)
    }

    // ── Reads ─────────────────────────────────────────────────────────

    /// Resolve an id prefix (at least 8 characters) to exactly one spec.
    pub async fn resolve_spec(&self, prefix: &str) -> Result<Spec> {
        let prefix = prefix.trim().to_string();
        if prefix.chars().count() < MIN_PREFIX_LEN {
            return Err(SpecError::Validation(format!(
                "id prefix '{}' is too short; use at least {} characters",
                prefix, MIN_PREFIX_LEN
            )));
        }
        self.db
            .call(move |db| db.resolve_spec_prefix(&prefix))
            .await
            .map_err(SpecError::from_store)
    }

    pub async fn get_spec(&self, prefix: &str) -> Result<Spec> {
        self.resolve_spec(prefix).await
    }

    pub async fn list_specs(&self) -> Result<Vec<Spec>> {
        self.db
            .call(|db| db.list_specs())
            .await
            .map_err(SpecError::from_store)
    }

    // ── Create ────────────────────────────────────────────────────────

    pub async fn create_spec(&self, new: NewSpec) -> Result<CreateOutcome> {
        let name = new.name.trim().to_string();
        if name.is_empty() {
            return Err(SpecError::Validation("spec name must not be empty".into()));
        }
        let id = match new.id.as_deref().map(str::trim) {
            Some(id) if id.chars().count() < MIN_PREFIX_LEN => {
                return Err(SpecError::Validation(format!(
                    "spec id '{}' is too short; use at least {} characters",
                    id, MIN_PREFIX_LEN
                )));
            }
            Some(id) if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') => {
                return Err(SpecError::Validation(format!(
                    "spec id '{}' may only contain ASCII letters, digits and '-'",
                    id
                )));
            }
            Some(id) => {
                let candidate = id.to_string();
                let exists = self
                    .db
                    .call(move |db| db.get_spec(&candidate))
                    .await
                    .map_err(SpecError::from_store)?
                    .is_some();
                if exists {
                    return Err(SpecError::Validation(format!("spec id '{}' is already in use", id)));
                }
                id.to_string()
            }
            None => Uuid::new_v4().to_string(),
        };

        let mut warnings = Vec::new();
        let branch = match (&self.branches, new.create_branch) {
            (Some(branches), true) => {
                let custom = match new.branch_name.as_deref() {
                    Some(explicit) => Some(explicit),
                    None if !sanitize_branch_component(&name).is_empty() => Some(name.as_str()),
                    None => None,
                };
                let outcome = branches.create_spec_branch(&id, custom)?;
                if let BranchOutcome::Skipped { reason } = &outcome {
                    warnings.push(format!("branch not created: {}", reason));
                }
                Some(outcome)
            }
            _ => None,
        };

        let now = Utc::now();
        let spec = Spec {
            id: id.clone(),
            name,
            description: new
                .description
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty()),
            phase: Phase::Requirements,
            branch_name: branch
                .as_ref()
                .and_then(|b| b.branch_name())
                .map(str::to_string),
            created_at: now,
            updated_at: now,
        };

        let event = self.bus.create_event(
            EventType::SpecCreated,
            &spec.id,
            EventPayload::SpecCreated {
                name: spec.name.clone(),
                phase: spec.phase,
                branch_name: spec.branch_name.clone(),
            },
            None,
        );
        self.bus.validate(&event)?;

        let record = spec.clone();
        let spec = self
            .db
            .call(move |db| db.transaction(|tx| tx.insert_spec(&record)))
            .await
            .map_err(|e| match SpecError::from_store(e) {
                SpecError::IntegrityViolation { .. } => {
                    SpecError::Validation(format!("spec id '{}' is already in use", id))
                }
                other => other,
            })?;

        let document_path = self.document_path(&spec);
        if let Err(doc_err) = self.write_new_document(&spec).await {
            warn!(spec_id = %spec.id, error = %format!("{:#}", doc_err), "Document write failed, removing record");
            let spec_id = spec.id.clone();
            let removed = self
                .db
                .call(move |db| db.delete_spec(&spec_id))
                .await;
            return Err(match removed {
                Ok(_) => SpecError::TransitionRolledBack {
                    spec_id: spec.id.clone(),
                    restored: Phase::Requirements,
                    source: Box::new(SpecError::Other(doc_err)),
                },
                Err(revert_err) => SpecError::RollbackFailed {
                    spec_id: spec.id.clone(),
                    cause: format!("{:#}", doc_err),
                    source: revert_err,
                },
            });
        }

        info!(spec_id = %spec.id, name = %spec.name, branch = ?spec.branch_name, "Created spec");
        self.publish(&event, &mut warnings).await?;

        Ok(CreateOutcome {
            spec,
            branch,
            document_path,
            warnings,
        })
    }

    // ── Transition ────────────────────────────────────────────────────

    /// Move a spec to `target`, keeping store, document and remote mirror
    /// consistent.
    ///
    /// Errors before any mutation leave everything untouched. A failed
    /// document write restores the stored phase and returns
    /// `TransitionRolledBack`. Handler failures are returned as warnings.
    pub async fn transition_phase(&self, prefix: &str, target: &str) -> Result<TransitionOutcome> {
        let spec = self.resolve_spec(prefix).await?;
        let new_phase = validate_phase(target)?;

        let old_phase = spec.phase;
        let snapshot_updated_at = spec.updated_at;
        let kind = old_phase.transition_kind(new_phase);

        if kind == TransitionKind::Unchanged {
            debug!(spec_id = %spec.id, phase = %old_phase, "Phase unchanged");
            return Ok(TransitionOutcome {
                spec,
                old_phase,
                new_phase,
                kind,
                changed: false,
                linkage: None,
                warnings: Vec::new(),
            });
        }

        let mut warnings = Vec::new();
        let linkage = match &self.sync {
            Some(sync) => {
                let outcome = sync.ensure_remote_linkage(&spec.id).await;
                if let LinkageOutcome::Failed { reason } = &outcome {
                    warnings.push(format!("remote issue not linked: {}", reason));
                }
                Some(outcome)
            }
            None => None,
        };

        let event = self.bus.create_event(
            EventType::PhaseChanged,
            &spec.id,
            EventPayload::PhaseChanged {
                old_phase,
                new_phase,
            },
            None,
        );
        self.bus.validate(&event)?;

        let document_path = self.document_path(&spec);
        let previous_document = self.documents.read(&document_path).await?;

        let updated = self
            .set_phase(&spec.id, new_phase, Utc::now())
            .await
            .map_err(SpecError::from_store)?;

        if let Err(failure) = self
            .write_phase_document(&updated, previous_document.as_deref())
            .await
        {
            let doc_err = failure.source;
            warn!(
                spec_id = %spec.id,
                phase = %new_phase,
                error = %format!("{:#}", doc_err),
                "Document update failed, restoring previous phase"
            );
            let mut revert = self
                .set_phase(&spec.id, old_phase, snapshot_updated_at)
                .await
                .map(|_| ());
            if failure.replaced && revert.is_ok() {
                revert = self
                    .restore_document(&document_path, previous_document.as_deref())
                    .await;
            }
            return Err(match revert {
                Ok(()) => SpecError::TransitionRolledBack {
                    spec_id: spec.id.clone(),
                    restored: old_phase,
                    source: Box::new(SpecError::Other(doc_err)),
                },
                Err(revert_err) => SpecError::RollbackFailed {
                    spec_id: spec.id.clone(),
                    cause: format!("{:#}", doc_err),
                    source: revert_err,
                },
            });
        }

        info!(spec_id = %spec.id, from = %old_phase, to = %new_phase, kind = ?kind, "Phase changed");
        self.publish(&event, &mut warnings).await?;

        Ok(TransitionOutcome {
            spec: updated,
            old_phase,
            new_phase,
            kind,
            changed: true,
            linkage,
            warnings,
        })
    }

    // ── Delete ────────────────────────────────────────────────────────

    pub async fn delete_spec(&self, prefix: &str) -> Result<DeleteOutcome> {
        let spec = self.resolve_spec(prefix).await?;
        let event = self.bus.create_event(
            EventType::SpecDeleted,
            &spec.id,
            EventPayload::SpecDeleted {
                name: spec.name.clone(),
            },
            None,
        );
        self.bus.validate(&event)?;

        let spec_id = spec.id.clone();
        let sync_records_removed = self
            .db
            .call(move |db| {
                db.transaction(|tx| {
                    let removed =
                        tx.delete_sync_records(specflow_common::EntityType::Spec, &spec_id)?;
                    if !tx.delete_spec(&spec_id)? {
                        return Err(SpecError::not_found(&spec_id).into());
                    }
                    Ok(removed)
                })
            })
            .await
            .map_err(SpecError::from_store)?;

        let mut warnings = Vec::new();
        let document_removed = match self.documents.remove(&self.document_path(&spec)).await {
            Ok(removed) => removed,
            Err(e) => {
                warnings.push(format!("document not removed: {:#}", e));
                false
            }
        };

        info!(spec_id = %spec.id, sync_records_removed, "Deleted spec");
        self.publish(&event, &mut warnings).await?;

        Ok(DeleteOutcome {
            spec,
            sync_records_removed,
            document_removed,
            warnings,
        })
    }

    // ── Internals ─────────────────────────────────────────────────────

    async fn set_phase(
        &self,
        id: &str,
        phase: Phase,
        updated_at: DateTime<Utc>,
    ) -> anyhow::Result<Spec> {
        let id = id.to_string();
        self.db
            .call(move |db| db.update_spec_phase(&id, phase, &updated_at))
            .await
    }

    async fn write_new_document(&self, spec: &Spec) -> anyhow::Result<()> {
        let path = self.document_path(spec);
        let content = render_document(spec)?;
        self.documents.write(&path, &content).await?;
        self.documents.durable_flush(&path).await
    }

    async fn write_phase_document(
        &self,
        spec: &Spec,
        previous: Option<&str>,
    ) -> std::result::Result<(), DocumentFailure> {
        let path = self.document_path(spec);
        let content = match previous {
            Some(existing) => rewrite_front_matter(existing, spec.phase, &spec.updated_at),
            None => {
                warn!(spec_id = %spec.id, path = %path.display(), "Spec document missing, recreating");
                render_document(spec)
            }
        }
        .map_err(DocumentFailure::untouched)?;
        self.documents
            .write(&path, &content)
            .await
            .map_err(DocumentFailure::untouched)?;
        self.documents
            .durable_flush(&path)
            .await
            .map_err(|source| DocumentFailure {
                replaced: true,
                source,
            })
    }

    /// Put back the pre-transition document, or remove one that was recreated.
    /// The restored content is flushed on a best-effort basis.
    async fn restore_document(&self, path: &Path, previous: Option<&str>) -> anyhow::Result<()> {
        let Some(previous) = previous else {
            self.documents.remove(path).await?;
            return Ok(());
        };
        self.documents.write(path, previous).await?;
        if let Err(e) = self.documents.durable_flush(path).await {
            warn!(path = %path.display(), error = %format!("{:#}", e), "Restored document not flushed");
        }
        Ok(())
    }

    /// Wait (bounded) for the handler barrier, then publish. Handler
    /// failures become warnings.
    async fn publish(&self, event: &LifecycleEvent, warnings: &mut Vec<String>) -> Result<()> {
        if !self.bus.wait_ready(self.ready_timeout).await {
            warn!(
                event_type = %event.event_type,
                timeout_ms = self.ready_timeout.as_millis() as u64,
                "Event handlers not ready, publishing anyway"
            );
        }
        let report = self.bus.publish(event).await?;
        for failure in report.failures {
            warnings.push(format!("{} handler failed: {}", failure.handler, failure.message));
        }
        Ok(())
    }
}
