//! Idempotent mirroring of specs to remote issues.
//!
//! At most one sync record (and therefore at most one remote issue) exists
//! per spec. Any existing record blocks a new sync attempt; a `pending` claim
//! is inserted before the remote call so concurrent callers cannot both
//! create an issue.

pub mod handler;
pub mod service;

pub use handler::{SYNC_HANDLER, SyncHandler};
pub use service::{LinkageOutcome, SyncOutcome, SyncRequest, SyncService};
