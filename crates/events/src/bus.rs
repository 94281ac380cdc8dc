//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`ControlBus`] is the publish/subscribe hub for [`ControlEvent`]s.
//! It is designed to be shared via `Arc<ControlBus>` across the engine.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sieve_core::{OrgId, ProjectId, Timestamp};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// ControlEvent
// ---------------------------------------------------------------------------

/// An event emitted by the engine for downstream consumption.
///
/// Constructed via [`ControlEvent::new`] and enriched with the builder
/// methods [`with_org`](ControlEvent::with_org),
/// [`with_project`](ControlEvent::with_project), and
/// [`with_payload`](ControlEvent::with_payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlEvent {
    /// Dot-separated event name, e.g. `"sampling.config_invalidated"`.
    pub event_type: String,

    /// Organization the event concerns, if any.
    pub org_id: Option<OrgId>,

    /// Project the event concerns, if any.
    pub project_id: Option<ProjectId>,

    /// Free-form JSON payload carrying event-specific data.
    pub payload: serde_json::Value,

    /// When the event was created (UTC).
    pub timestamp: Timestamp,
}

impl ControlEvent {
    /// Create a new event with only the required `event_type`.
    ///
    /// All optional fields default to `None` / empty object.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            org_id: None,
            project_id: None,
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    /// Attach the organization the event concerns.
    pub fn with_org(mut self, org_id: OrgId) -> Self {
        self.org_id = Some(org_id);
        self
    }

    /// Attach the project the event concerns.
    pub fn with_project(mut self, project_id: ProjectId) -> Self {
        self.project_id = Some(project_id);
        self
    }

    /// Set the JSON payload for the event.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

// ---------------------------------------------------------------------------
// ControlBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// Wraps a [`broadcast::Sender`] so that any number of subscribers can
/// independently receive every published [`ControlEvent`].
pub struct ControlBus {
    sender: broadcast::Sender<ControlEvent>,
}

impl ControlBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no active subscribers the event is silently dropped;
    /// the engine never blocks on downstream consumers.
    pub fn publish(&self, event: ControlEvent) {
        // Ignore the SendError — it only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events published on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<ControlEvent> {
        self.sender.subscribe()
    }
}

impl Default for ControlBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
