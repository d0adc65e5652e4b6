//! Persistent store: the single source of truth for specs and sync records.
//!
//! | Type         | Responsibility                                             |
//! |--------------|------------------------------------------------------------|
//! | `SpecDb`     | Synchronous SQLite access, migrations, transactions        |
//! | `DbHandle`   | `Arc<Mutex<SpecDb>>` driven from async code via `spawn_blocking` |
//! | `SyncLogEntry` | Field set written to `sync_log` on insert or update      |

pub mod db;

pub use db::{DbHandle, SpecDb, SyncLogEntry};
