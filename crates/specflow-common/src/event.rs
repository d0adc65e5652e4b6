//! Lifecycle events: immutable facts about spec state changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::phase::Phase;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "spec.created")]
    SpecCreated,
    #[serde(rename = "spec.phase_changed")]
    PhaseChanged,
    #[serde(rename = "spec.deleted")]
    SpecDeleted,
}

impl EventType {
    pub fn all() -> &'static [EventType] {
        &[
            EventType::SpecCreated,
            EventType::PhaseChanged,
            EventType::SpecDeleted,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::SpecCreated => "spec.created",
            EventType::PhaseChanged => "spec.phase_changed",
            EventType::SpecDeleted => "spec.deleted",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Typed payload carried by a [`LifecycleEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EventPayload {
    SpecCreated {
        name: String,
        phase: Phase,
        branch_name: Option<String>,
    },
    PhaseChanged {
        old_phase: Phase,
        new_phase: Phase,
    },
    SpecDeleted {
        name: String,
    },
}

impl EventPayload {
    /// The event type this payload belongs to.
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::SpecCreated { .. } => EventType::SpecCreated,
            EventPayload::PhaseChanged { .. } => EventType::PhaseChanged,
            EventPayload::SpecDeleted { .. } => EventType::SpecDeleted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub id: Uuid,
    pub event_type: EventType,
    pub subject_id: String,
    #[serde(default)]
    pub related_id: Option<String>,
    pub payload: EventPayload,
    pub generated_at: DateTime<Utc>,
}
