//! Shared domain types for specflow.
//!
//! Everything here is plain data: no I/O, no async. The main crate owns the
//! store, the event bus and the adapters; this crate owns the vocabulary they
//! exchange.

pub mod event;
pub mod phase;
pub mod spec;

pub use event::{EventPayload, EventType, LifecycleEvent};
pub use phase::{Phase, PhaseParseError, TRANSITIONS, TransitionKind};
pub use spec::{EntityType, MIN_PREFIX_LEN, SHORT_ID_LEN, Spec, SyncRecord, SyncStatus, short_id};
