//! Background task broker.
//!
//! Two implementations share one wire envelope: an in-process queue used
//! when `JOBS_BROKER_URL` is unset (or `memory://`), and a Redis list
//! queue for deployments with separate worker processes. Delivery is
//! at-least-once; handlers are idempotent by construction.

pub mod worker;

pub use worker::{EventHandler, Worker};

use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tracing::{error, warn};
use uuid::Uuid;

use anotherai::error::{Error, Result};
use anotherai::events::{Event, EventRouter};

/// Redis list the queue lives on.
const QUEUE_KEY: &str = "anotherai:jobs";

/// One queued task execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub id: Uuid,
    pub event: Event,
    /// Retries already spent on this execution.
    #[serde(default)]
    pub retries: u32,
    /// Handler this message targets; `None` fans out to every handler
    /// registered for the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
}

impl TaskMessage {
    pub fn new(event: Event) -> Self {
        TaskMessage {
            id: Uuid::new_v4(),
            event,
            retries: 0,
            handler: None,
        }
    }
}

/// The queue capability: non-blocking enqueue, awaited dequeue.
#[async_trait]
pub trait TaskBroker: Send + Sync {
    /// Enqueue without blocking the caller.
    fn enqueue(&self, message: TaskMessage);

    /// Await the next message. `None` means the queue is closed.
    async fn dequeue(&self) -> Option<TaskMessage>;
}

/// Whether the configuration selects the in-process broker.
pub fn use_in_memory_broker(broker_url: Option<&str>) -> bool {
    match broker_url {
        None => true,
        Some(url) => url.is_empty() || url.starts_with("memory://"),
    }
}

/// Build a broker from `JOBS_BROKER_URL`.
pub async fn broker_from_url(broker_url: Option<&str>) -> Result<Arc<dyn TaskBroker>> {
    if use_in_memory_broker(broker_url) {
        return Ok(Arc::new(InMemoryBroker::new()));
    }
    #[allow(clippy::unwrap_used)] // checked by use_in_memory_broker
    let url = broker_url.unwrap();
    if url.starts_with("redis://") || url.starts_with("rediss://") {
        return Ok(Arc::new(RedisBroker::connect(url).await?));
    }
    Err(Error::fatal(format!("unknown broker url: {url}")))
}

/// In-process queue over an unbounded channel.
pub struct InMemoryBroker {
    sender: mpsc::UnboundedSender<TaskMessage>,
    receiver: Mutex<mpsc::UnboundedReceiver<TaskMessage>>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        InMemoryBroker {
            sender,
            receiver: Mutex::new(receiver),
        }
    }
}

#[async_trait]
impl TaskBroker for InMemoryBroker {
    fn enqueue(&self, message: TaskMessage) {
        if self.sender.send(message).is_err() {
            warn!("in-memory broker dropped a task: queue closed");
        }
    }

    async fn dequeue(&self) -> Option<TaskMessage> {
        // One worker loop consumes the queue; the lock is uncontended.
        self.receiver.lock().await.recv().await
    }
}

/// Redis list queue: `LPUSH` to enqueue, blocking `BRPOP` to dequeue.
pub struct RedisBroker {
    connection: ConnectionManager,
}

impl RedisBroker {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::fatal(format!("invalid redis broker url: {e}")))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| Error::fatal(format!("failed to connect to redis broker: {e}")))?;
        Ok(RedisBroker { connection })
    }
}

#[async_trait]
impl TaskBroker for RedisBroker {
    fn enqueue(&self, message: TaskMessage) {
        let mut connection = self.connection.clone();
        // The request path never blocks on persistence; push in the
        // background and log failures.
        tokio::spawn(async move {
            let payload = match serde_json::to_string(&message) {
                Ok(payload) => payload,
                Err(e) => {
                    error!(error = %e, "failed to serialize task message");
                    return;
                }
            };
            if let Err(e) = connection.lpush::<_, _, ()>(QUEUE_KEY, payload).await {
                error!(error = %e, "failed to enqueue task to redis");
            }
        });
    }

    async fn dequeue(&self) -> Option<TaskMessage> {
        let mut connection = self.connection.clone();
        loop {
            let popped: redis::RedisResult<Option<(String, String)>> =
                connection.brpop(QUEUE_KEY, 5.0).await;
            match popped {
                Ok(Some((_key, payload))) => match serde_json::from_str(&payload) {
                    Ok(message) => return Some(message),
                    Err(e) => {
                        error!(error = %e, "dropping undecodable task message");
                    }
                },
                Ok(None) => {}
                Err(e) => {
                    error!(error = %e, "redis dequeue failed, backing off");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    }
}

/// Event router over a broker: the side the request path sees.
#[derive(Clone)]
pub struct BrokerEventRouter {
    broker: Arc<dyn TaskBroker>,
}

impl BrokerEventRouter {
    pub fn new(broker: Arc<dyn TaskBroker>) -> Self {
        BrokerEventRouter { broker }
    }
}

impl EventRouter for BrokerEventRouter {
    fn send(&self, event: Event) {
        self.broker.enqueue(TaskMessage::new(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anotherai::events::EventPayload;

    #[test]
    fn memory_broker_is_the_default() {
        assert!(use_in_memory_broker(None));
        assert!(use_in_memory_broker(Some("")));
        assert!(use_in_memory_broker(Some("memory://local")));
        assert!(!use_in_memory_broker(Some("redis://localhost:6379")));
    }

    #[tokio::test]
    async fn memory_broker_delivers_in_order() {
        let broker = InMemoryBroker::new();
        for uid in 0..3 {
            broker.enqueue(TaskMessage::new(Event::new(
                uid,
                EventPayload::PaymentUpdated {},
            )));
        }
        for uid in 0..3 {
            let message = broker.dequeue().await.unwrap();
            assert_eq!(message.event.tenant_uid, uid);
        }
    }

    #[test]
    fn task_messages_round_trip_the_wire() {
        let message = TaskMessage {
            id: Uuid::new_v4(),
            event: Event::new(
                7,
                EventPayload::UserConnected {
                    user_id: "u".into(),
                    organization_id: None,
                },
            ),
            retries: 2,
            handler: Some("user_connected".into()),
        };
        let encoded = serde_json::to_string(&message).unwrap();
        let decoded: TaskMessage = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, message);
    }
}
