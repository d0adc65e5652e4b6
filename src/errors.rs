//! Typed error hierarchy for specflow.
//!
//! `SpecError` is what every public coordinator, sync and branch operation
//! returns. Store and adapter plumbing uses `anyhow` internally; typed errors
//! raised inside the store travel through `anyhow` and are recovered with
//! [`SpecError::from_store`].

use specflow_common::{EntityType, Phase, PhaseParseError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpecError {
    #[error("Spec not found: {id}")]
    NotFound { id: String },

    #[error("Spec id prefix '{prefix}' is ambiguous: matches {matches} specs")]
    Ambiguous { prefix: String, matches: usize },

    #[error(transparent)]
    InvalidPhase(#[from] PhaseParseError),

    #[error("Sync record already exists for {} {entity_id} (status: {status}); reset it before retrying", entity_type.as_str())]
    Duplicate {
        entity_type: EntityType,
        entity_id: String,
        status: String,
    },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("External service error: {0}")]
    ExternalService(String),

    /// Uniqueness constraint hit on write. Recovered inside the sync service,
    /// never returned from a public operation.
    #[error("Integrity violation on {table}: {message}")]
    IntegrityViolation { table: String, message: String },

    #[error("Branch verification failed: expected '{expected}', observed '{observed}'")]
    BranchVerificationFailed { expected: String, observed: String },

    #[error("Transition of {spec_id} rolled back to '{restored}': {source}")]
    TransitionRolledBack {
        spec_id: String,
        restored: Phase,
        #[source]
        source: Box<SpecError>,
    },

    #[error("Rollback of {spec_id} failed after '{cause}': {source}")]
    RollbackFailed {
        spec_id: String,
        cause: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(&'static str),

    #[error("Database error: {0:#}")]
    Database(#[source] anyhow::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SpecError>;

impl SpecError {
    /// Recover a typed error that was raised inside the store, or wrap the
    /// failure as a database error.
    pub fn from_store(err: anyhow::Error) -> Self {
        match err.downcast::<SpecError>() {
            Ok(typed) => typed,
            Err(other) => SpecError::Database(other),
        }
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        SpecError::NotFound { id: id.into() }
    }

    pub fn is_integrity_violation(&self) -> bool {
        matches!(self, SpecError::IntegrityViolation { .. })
    }
}
