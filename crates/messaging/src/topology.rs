//! Queue router: named queues with per-queue prefetch, concurrency, retry
//! chains, and bound consumers, behind a transport-agnostic capability
//! trait.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;

use crate::consumer::ErasedConsumer;
use crate::error::MessagingError;
use crate::retry::RetryPolicy;

/// Static definition of one named queue. Resolved at process startup,
/// immutable for the process lifetime.
pub struct QueueDefinition {
    pub name: String,
    /// Broker-level window of unacknowledged deliveries a consumer may hold.
    pub prefetch: u16,
    /// Maximum parallel in-flight consumer invocations for this queue.
    pub concurrency_limit: usize,
    /// Ordered retry chain evaluated against consumer failures.
    pub retry_chain: Vec<RetryPolicy>,
    /// Where synthesized fault envelopes go. `None` for queues that are
    /// themselves terminal (the fault queue).
    pub fault_queue: Option<String>,
    pub consumer: Arc<dyn ErasedConsumer>,
}

impl QueueDefinition {
    pub fn new(name: impl Into<String>, consumer: Arc<dyn ErasedConsumer>) -> Self {
        Self {
            name: name.into(),
            prefetch: 1,
            concurrency_limit: 1,
            retry_chain: Vec::new(),
            fault_queue: None,
            consumer,
        }
    }

    pub fn prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = prefetch;
        self
    }

    pub fn concurrency(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    pub fn retry(mut self, chain: Vec<RetryPolicy>) -> Self {
        self.retry_chain = chain;
        self
    }

    pub fn fault_queue(mut self, queue: impl Into<String>) -> Self {
        self.fault_queue = Some(queue.into());
        self
    }
}

/// Thin publish contract producers depend on.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Durably hand a serialized message to the broker for queue-routed
    /// delivery. Success means "accepted by the broker", not "delivered".
    async fn publish_json(&self, queue: &str, payload: Vec<u8>) -> Result<(), MessagingError>;

    /// Broker reachability for the process health surface.
    async fn healthy(&self) -> bool;
}

/// A broker topology: queue declaration, publishing, and the consume loops.
/// Two variants exist (durable RabbitMQ and in-process), selected by
/// configuration at startup; consumer code is broker-agnostic.
#[async_trait]
pub trait Topology: EventBus {
    /// Declare a queue and bind its consumer and retry chain. Called during
    /// startup, before [`Topology::run`].
    async fn declare(&self, definition: QueueDefinition) -> Result<(), MessagingError>;

    /// Drive every declared queue's consume loop until `shutdown` fires.
    async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<(), MessagingError>;
}

/// Serialize a message and publish it to the named queue. The queue name
/// comes from configuration, never from message content.
pub async fn publish<M: Serialize + Sync>(
    bus: &dyn EventBus,
    queue: &str,
    message: &M,
) -> Result<(), MessagingError> {
    let payload = serde_json::to_vec(message)?;
    bus.publish_json(queue, payload).await
}
