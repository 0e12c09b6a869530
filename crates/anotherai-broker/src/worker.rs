//! The background worker: drains the broker, dispatches to handlers,
//! retries with backoff, and reports execution metrics.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, gauge};
use rand::Rng as _;
use tracing::{error, info, warn};

use anotherai::error::Result;
use anotherai::events::{Event, EventPayload};

use crate::{TaskBroker, TaskMessage};

/// Retry budget per handler execution.
const DEFAULT_RETRY_COUNT: u32 = 3;
/// Wall-clock budget per handler execution; exceeding it is a retryable
/// failure.
const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(60);

/// One background task: declares which events it handles and processes
/// them idempotently (the broker delivers at least once).
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Stable name, used for routing retries and metrics labels.
    fn name(&self) -> &'static str;

    /// Whether the handler wants this event.
    fn accepts(&self, payload: &EventPayload) -> bool;

    async fn handle(&self, event: &Event) -> Result<()>;
}

/// Drains a broker and runs handlers. Tasks execute in parallel; each
/// handler execution is bounded by a timeout.
pub struct Worker {
    broker: Arc<dyn TaskBroker>,
    handlers: Vec<Arc<dyn EventHandler>>,
    task_timeout: Duration,
    retry_count: u32,
}

impl Worker {
    pub fn new(broker: Arc<dyn TaskBroker>) -> Self {
        Worker {
            broker,
            handlers: Vec::new(),
            task_timeout: DEFAULT_TASK_TIMEOUT,
            retry_count: DEFAULT_RETRY_COUNT,
        }
    }

    #[must_use]
    pub fn register(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    #[must_use]
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    /// Consume the queue until it closes.
    pub async fn run(self) {
        info!(
            handlers = ?self.handlers.iter().map(|h| h.name()).collect::<Vec<_>>(),
            "worker started"
        );
        let worker = Arc::new(self);
        while let Some(message) = worker.broker.dequeue().await {
            let worker = Arc::clone(&worker);
            tokio::spawn(async move {
                worker.dispatch(message).await;
            });
        }
        info!("worker stopped: queue closed");
    }

    /// Run one queue message: fan out to every accepting handler, or to
    /// the single handler a retry was targeted at.
    pub async fn dispatch(&self, message: TaskMessage) {
        for handler in &self.handlers {
            if !handler.accepts(&message.event.payload) {
                continue;
            }
            if let Some(target) = &message.handler {
                if handler.name() != target {
                    continue;
                }
            }
            self.execute(Arc::clone(handler), &message).await;
        }
    }

    async fn execute(&self, handler: Arc<dyn EventHandler>, message: &TaskMessage) {
        let task_name = handler.name();
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.task_timeout, handler.handle(&message.event)).await;
        let result = match outcome {
            Ok(result) => result,
            Err(_) => Err(anotherai::Error::internal(format!(
                "task {task_name} timed out after {:?}",
                self.task_timeout
            ))),
        };

        gauge!(
            "job_execution_time",
            "task_name" => task_name,
            "error" => if result.is_err() { "true" } else { "false" },
        )
        .set(started.elapsed().as_secs_f64());

        let Err(e) = result else { return };

        if e.is_fatal() {
            error!(task_name, error = %e, "fatal error while executing task");
            return;
        }
        if message.retries >= self.retry_count {
            error!(
                task_name,
                retries = message.retries,
                error = %e,
                "task exhausted its retry budget"
            );
            return;
        }

        warn!(task_name, retries = message.retries, error = %e, "retrying task");
        counter!("job_retry", "task_name" => task_name).increment(1);

        let retry = TaskMessage {
            id: message.id,
            event: message.event.clone(),
            retries: message.retries + 1,
            handler: Some(task_name.to_string()),
        };
        let delay = retry_delay(retry.retries);
        let broker = Arc::clone(&self.broker);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            broker.enqueue(retry);
        });
    }
}

/// Exponential backoff with jitter: `2^retries` seconds scaled by a
/// random factor in [0.5, 1.5).
fn retry_delay(retries: u32) -> Duration {
    let base = 2u64.saturating_pow(retries.min(6));
    let jitter = rand::thread_rng().gen_range(0.5..1.5);
    Duration::from_secs_f64(base as f64 * jitter)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::InMemoryBroker;
    use anotherai::Error;

    struct CountingHandler {
        name: &'static str,
        calls: AtomicU32,
        fail_first: u32,
        fatal: bool,
    }

    impl CountingHandler {
        fn new(name: &'static str, fail_first: u32, fatal: bool) -> Arc<Self> {
            Arc::new(CountingHandler {
                name,
                calls: AtomicU32::new(0),
                fail_first,
                fatal,
            })
        }
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        fn name(&self) -> &'static str {
            self.name
        }

        fn accepts(&self, payload: &EventPayload) -> bool {
            matches!(payload, EventPayload::PaymentUpdated {})
        }

        async fn handle(&self, _event: &Event) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                if self.fatal {
                    return Err(Error::fatal("boom"));
                }
                return Err(Error::internal("transient boom"));
            }
            Ok(())
        }
    }

    fn payment_event() -> TaskMessage {
        TaskMessage::new(Event::new(1, EventPayload::PaymentUpdated {}))
    }

    #[tokio::test]
    async fn failed_tasks_are_requeued_with_incremented_retries() {
        let broker = Arc::new(InMemoryBroker::new());
        let handler = CountingHandler::new("flaky", 1, false);
        let worker = Worker::new(broker.clone()).register(handler.clone());

        worker.dispatch(payment_event()).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);

        // The retry lands on the queue (after its backoff) targeted at
        // the failed handler.
        let retry = broker.dequeue().await.unwrap();
        assert_eq!(retry.retries, 1);
        assert_eq!(retry.handler.as_deref(), Some("flaky"));

        worker.dispatch(retry).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let broker = Arc::new(InMemoryBroker::new());
        let handler = CountingHandler::new("fatal", u32::MAX, true);
        let worker = Worker::new(broker.clone()).register(handler.clone());

        worker.dispatch(payment_event()).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        // Nothing requeued: enqueue would be visible immediately.
        tokio::time::sleep(Duration::from_millis(50)).await;
        broker.enqueue(TaskMessage::new(Event::new(
            99,
            EventPayload::PaymentUpdated {},
        )));
        let next = broker.dequeue().await.unwrap();
        assert_eq!(next.event.tenant_uid, 99);
    }

    #[tokio::test]
    async fn retry_budget_is_bounded() {
        let broker = Arc::new(InMemoryBroker::new());
        let handler = CountingHandler::new("always-fails", u32::MAX, false);
        let worker = Worker::new(broker.clone()).register(handler.clone());

        let mut message = payment_event();
        message.retries = DEFAULT_RETRY_COUNT;
        worker.dispatch(message).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);

        // Budget exhausted: no further requeue.
        tokio::time::sleep(Duration::from_millis(50)).await;
        broker.enqueue(TaskMessage::new(Event::new(
            99,
            EventPayload::PaymentUpdated {},
        )));
        let next = broker.dequeue().await.unwrap();
        assert_eq!(next.event.tenant_uid, 99);
    }

    #[tokio::test]
    async fn targeted_retries_skip_other_handlers() {
        let broker = Arc::new(InMemoryBroker::new());
        let a = CountingHandler::new("handler-a", 0, false);
        let b = CountingHandler::new("handler-b", 0, false);
        let worker = Worker::new(broker).register(a.clone()).register(b.clone());

        let mut message = payment_event();
        message.handler = Some("handler-b".into());
        worker.dispatch(message).await;
        assert_eq!(a.calls.load(Ordering::SeqCst), 0);
        assert_eq!(b.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_grows_with_retries() {
        let first = retry_delay(1);
        let fourth = retry_delay(4);
        assert!(first >= Duration::from_secs(1));
        assert!(first <= Duration::from_secs(3));
        assert!(fourth >= Duration::from_secs(8));
    }
}
