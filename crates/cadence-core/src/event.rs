use crate::CadenceResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// A lifecycle notification emitted by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEvent {
    /// Dotted topic name, e.g. `workflow.wave_completed`.
    pub topic: String,
    /// Free-form event body.
    pub payload: serde_json::Value,
    /// UTC time the event was published.
    pub timestamp: DateTime<Utc>,
}

impl WorkflowEvent {
    /// Creates an event stamped with the current time.
    pub fn new(topic: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
            timestamp: Utc::now(),
        }
    }
}

/// Sink for workflow lifecycle events.
///
/// The orchestrator never depends on delivery: a failed publish is logged by
/// the caller and otherwise ignored.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publishes `payload` under `topic`.
    async fn publish(&self, topic: &str, payload: serde_json::Value) -> CadenceResult<()>;
}

/// In-process event bus backed by a tokio broadcast channel.
/// Events published while nobody is subscribed are dropped.
pub struct BroadcastEventBus {
    tx: broadcast::Sender<WorkflowEvent>,
}

impl BroadcastEventBus {
    /// Creates a bus that buffers up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Returns a receiver for every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
impl EventBus for BroadcastEventBus {
    async fn publish(&self, topic: &str, payload: serde_json::Value) -> CadenceResult<()> {
        if self.tx.receiver_count() == 0 {
            tracing::debug!(topic = %topic, "No subscribers, dropping event");
            return Ok(());
        }
        // send only fails when every receiver has been dropped in the meantime
        let _ = self.tx.send(WorkflowEvent::new(topic, payload));
        Ok(())
    }
}
