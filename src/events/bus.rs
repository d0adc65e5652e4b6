use std::collections::{BTreeSet, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use specflow_common::{EventPayload, EventType, LifecycleEvent};
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use super::EventHandler;
use crate::errors::{Result, SpecError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFailure {
    pub handler: String,
    pub message: String,
}

/// Result of dispatching one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub event_type: EventType,
    pub delivered: usize,
    pub failures: Vec<HandlerFailure>,
}

impl DispatchReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct EventBus {
    handlers: RwLock<HashMap<EventType, Vec<Arc<dyn EventHandler>>>>,
    required: BTreeSet<String>,
    registered: Mutex<BTreeSet<String>>,
    ready_tx: watch::Sender<bool>,
}

impl EventBus {
    /// Build a bus whose ready barrier opens once every name in
    /// `required_handlers` has registered at least once.
    pub fn new<I, S>(required_handlers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let required: BTreeSet<String> = required_handlers.into_iter().map(Into::into).collect();
        let (ready_tx, _) = watch::channel(required.is_empty());
        Self {
            handlers: RwLock::new(HashMap::new()),
            required,
            registered: Mutex::new(BTreeSet::new()),
            ready_tx,
        }
    }

    /// Append `handler` to the list for `event_type`. Duplicates are allowed;
    /// every registration runs.
    pub fn register(&self, event_type: EventType, handler: Arc<dyn EventHandler>) -> Result<()> {
        let name = handler.name().to_string();
        self.handlers
            .write()
            .map_err(|_| SpecError::LockPoisoned("event registry"))?
            .entry(event_type)
            .or_default()
            .push(handler);

        let mut registered = self
            .registered
            .lock()
            .map_err(|_| SpecError::LockPoisoned("event registry"))?;
        registered.insert(name.clone());
        debug!(handler = %name, event_type = %event_type, "Registered event handler");

        if !*self.ready_tx.borrow() && self.required.is_subset(&registered) {
            self.ready_tx.send_replace(true);
            debug!("All required event handlers registered");
        }
        Ok(())
    }

    pub fn handler_count(&self, event_type: EventType) -> usize {
        self.handlers
            .read()
            .map(|h| h.get(&event_type).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    pub fn is_ready(&self) -> bool {
        *self.ready_tx.borrow()
    }

    /// Resolves once every required handler has registered.
    pub async fn ready(&self) {
        let mut rx = self.ready_tx.subscribe();
        // The sender lives as long as `self`, so the channel cannot close here.
        let _ = rx.wait_for(|ready| *ready).await;
    }

    /// Wait for the barrier for at most `timeout`. Returns whether it opened.
    pub async fn wait_ready(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.ready()).await.is_ok()
    }

    /// Build an event stamped with the current time. Does not publish.
    pub fn create_event(
        &self,
        event_type: EventType,
        subject_id: &str,
        payload: EventPayload,
        related_id: Option<&str>,
    ) -> LifecycleEvent {
        LifecycleEvent {
            id: Uuid::new_v4(),
            event_type,
            subject_id: subject_id.to_string(),
            related_id: related_id.map(str::to_string),
            payload,
            generated_at: Utc::now(),
        }
    }

    /// Structural check run by `publish`; exposed so callers can reject an
    /// event before mutating anything.
    pub fn validate(&self, event: &LifecycleEvent) -> Result<()> {
        if event.subject_id.trim().is_empty() {
            return Err(SpecError::MalformedEvent(format!(
                "{} event has an empty subject id",
                event.event_type
            )));
        }
        let payload_type = event.payload.event_type();
        if payload_type != event.event_type {
            return Err(SpecError::MalformedEvent(format!(
                "{} event carries a {} payload",
                event.event_type, payload_type
            )));
        }
        Ok(())
    }

    /// Run every handler registered for the event's type, one at a time in
    /// registration order. Handler errors and panics are logged and reported,
    /// never propagated.
    pub async fn publish(&self, event: &LifecycleEvent) -> Result<DispatchReport> {
        self.validate(event)?;

        let handlers: Vec<Arc<dyn EventHandler>> = self
            .handlers
            .read()
            .map_err(|_| SpecError::LockPoisoned("event registry"))?
            .get(&event.event_type)
            .cloned()
            .unwrap_or_default();

        let mut report = DispatchReport {
            event_type: event.event_type,
            delivered: 0,
            failures: Vec::new(),
        };

        for handler in handlers {
            let outcome = AssertUnwindSafe(handler.handle(event)).catch_unwind().await;
            let message = match outcome {
                Ok(Ok(())) => {
                    report.delivered += 1;
                    continue;
                }
                Ok(Err(e)) => format!("{:#}", e),
                Err(panic) => panic_message(panic.as_ref()),
            };
            warn!(
                event_type = %event.event_type,
                subject_id = %event.subject_id,
                handler = %handler.name(),
                error = %message,
                "Event handler failed"
            );
            report.failures.push(HandlerFailure {
                handler: handler.name().to_string(),
                message,
            });
        }

        debug!(
            event_type = %event.event_type,
            subject_id = %event.subject_id,
            delivered = report.delivered,
            failed = report.failures.len(),
            "Published event"
        );
        Ok(report)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {}", s)
    } else {
        "handler panicked".to_string()
    }
}
