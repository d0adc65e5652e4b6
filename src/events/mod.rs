//! In-process lifecycle event bus.
//!
//! | Type              | Responsibility                                          |
//! |-------------------|---------------------------------------------------------|
//! | `EventBus`        | Ordered registration, sequential isolated fan-out, ready barrier |
//! | `EventHandler`    | Async handler trait, one named instance per registration |
//! | `DispatchReport`  | What a `publish` delivered and which handlers failed    |
//! | `EventLogHandler` | Appends every event to `.specflow/events.jsonl`         |

pub mod bus;
pub mod log;

use anyhow::Result;
use async_trait::async_trait;
use specflow_common::LifecycleEvent;

pub use bus::{DispatchReport, EventBus, HandlerFailure};
pub use log::EventLogHandler;

/// A subscriber to lifecycle events.
///
/// Handlers receive the event read-only. An `Err` (or a panic) is contained by
/// the bus and reported in the `DispatchReport`; it never reaches the
/// publisher as an error.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Stable name used for the ready barrier and in logs.
    fn name(&self) -> &str;

    async fn handle(&self, event: &LifecycleEvent) -> Result<()>;
}
