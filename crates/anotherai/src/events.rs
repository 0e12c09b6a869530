//! Events emitted on the background task bus.
//!
//! The request path never blocks on side effects: it enqueues an event and
//! returns. Handlers are idempotent, delivery is at-least-once.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::AgentCompletion;

/// Event payloads, tagged by task name on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task_name", rename_all = "snake_case")]
pub enum EventPayload {
    /// A completion finished (successfully or not) and must be persisted
    /// and billed.
    StoreCompletion { completion: Box<AgentCompletion> },
    /// Run one pre-registered completion inside an experiment.
    StartExperimentCompletion {
        experiment_id: String,
        completion_id: Uuid,
        version_id: String,
        input_id: String,
    },
    /// A user authenticated with a JWT.
    UserConnected {
        user_id: String,
        organization_id: Option<String>,
    },
    /// Payment settings changed; attempt a zero-value decrement to trigger
    /// an automatic payment when the balance is exhausted.
    PaymentUpdated {},
}

impl EventPayload {
    /// Task name used for routing and metrics labels.
    pub fn task_name(&self) -> &'static str {
        match self {
            EventPayload::StoreCompletion { .. } => "store_completion",
            EventPayload::StartExperimentCompletion { .. } => "start_experiment_completion",
            EventPayload::UserConnected { .. } => "user_connected",
            EventPayload::PaymentUpdated {} => "payment_updated",
        }
    }
}

/// An event together with the owning tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub tenant_uid: i64,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    pub fn new(tenant_uid: i64, payload: EventPayload) -> Self {
        Event {
            tenant_uid,
            payload,
        }
    }

    pub fn store_completion(tenant_uid: i64, completion: AgentCompletion) -> Self {
        Event::new(
            tenant_uid,
            EventPayload::StoreCompletion {
                completion: Box::new(completion),
            },
        )
    }
}

/// Fire-and-forget event sink. Implemented by the brokers; the runner and
/// services depend only on this capability.
pub trait EventRouter: Send + Sync {
    /// Enqueue the event. Must not block the caller; delivery failures are
    /// logged, not surfaced.
    fn send(&self, event: Event);
}

/// Sink that drops everything, for tests and tooling.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventRouter;

impl EventRouter for NoopEventRouter {
    fn send(&self, _event: Event) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_tag_by_task_name() {
        let event = Event::new(
            12,
            EventPayload::UserConnected {
                user_id: "user_1".into(),
                organization_id: Some("org_1".into()),
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["task_name"], "user_connected");
        assert_eq!(json["tenant_uid"], 12);
        let back: Event = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
