//! In-process topology: per-queue channels with the same routing contract
//! as the RabbitMQ variant. Used for tests and degraded (broker-disabled)
//! operation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock, Semaphore, mpsc, watch};
use tokio::task::JoinSet;

use crate::dispatch::{Completion, complete, dispatch};
use crate::error::MessagingError;
use crate::topology::{EventBus, QueueDefinition, Topology};

struct MemoryQueue {
    definition: Arc<QueueDefinition>,
    tx: mpsc::UnboundedSender<Vec<u8>>,
    /// Taken by `run`; a queue is consumed by exactly one loop.
    rx: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

/// In-process message topology. Cloning shares the underlying queues, so a
/// clone handed to the API side publishes into the same loops `run` drives.
#[derive(Clone, Default)]
pub struct MemoryTopology {
    queues: Arc<RwLock<HashMap<String, Arc<MemoryQueue>>>>,
}

impl MemoryTopology {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventBus for MemoryTopology {
    async fn publish_json(&self, queue: &str, payload: Vec<u8>) -> Result<(), MessagingError> {
        let queues = self.queues.read().await;
        let entry = queues
            .get(queue)
            .ok_or_else(|| MessagingError::publish(queue, "queue not declared"))?;
        entry
            .tx
            .send(payload)
            .map_err(|_| MessagingError::publish(queue, "queue closed"))
    }

    async fn healthy(&self) -> bool {
        true
    }
}

#[async_trait]
impl Topology for MemoryTopology {
    async fn declare(&self, definition: QueueDefinition) -> Result<(), MessagingError> {
        let mut queues = self.queues.write().await;
        if queues.contains_key(&definition.name) {
            return Err(MessagingError::queue_setup(
                &definition.name,
                "queue already declared",
            ));
        }

        tracing::debug!(
            queue = %definition.name,
            concurrency = definition.concurrency_limit,
            "Declared in-process queue"
        );

        let (tx, rx) = mpsc::unbounded_channel();
        queues.insert(
            definition.name.clone(),
            Arc::new(MemoryQueue {
                definition: Arc::new(definition),
                tx,
                rx: Mutex::new(Some(rx)),
            }),
        );
        Ok(())
    }

    async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<(), MessagingError> {
        let queues: Vec<Arc<MemoryQueue>> =
            self.queues.read().await.values().cloned().collect();

        let mut loops = Vec::new();
        for queue in queues {
            let Some(rx) = queue.rx.lock().await.take() else {
                continue;
            };
            loops.push(tokio::spawn(queue_loop(
                self.clone(),
                Arc::clone(&queue.definition),
                rx,
                shutdown.clone(),
            )));
        }

        for task in loops {
            let _ = task.await;
        }
        Ok(())
    }
}

async fn queue_loop(
    bus: MemoryTopology,
    definition: Arc<QueueDefinition>,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
    mut shutdown: watch::Receiver<bool>,
) {
    // No broker window exists in-process, so prefetch is moot here;
    // concurrency_limit is enforced with a semaphore exactly like the
    // durable variant.
    let semaphore = Arc::new(Semaphore::new(definition.concurrency_limit.max(1)));
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            received = rx.recv() => {
                let Some(payload) = received else { break };
                let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                    break;
                };

                let bus = bus.clone();
                let definition = Arc::clone(&definition);
                let shutdown = shutdown.clone();
                in_flight.spawn(async move {
                    let disposition = dispatch(&definition, &payload, shutdown).await;
                    // In-process queues cannot redeliver an unacked message;
                    // a requeue outcome only occurs at shutdown.
                    if complete(&bus, &definition, disposition).await == Completion::Requeue {
                        tracing::debug!(
                            queue = %definition.name,
                            "Delivery left unacknowledged at shutdown"
                        );
                    }
                    drop(permit);
                });
            }
        }
    }

    while in_flight.join_next().await.is_some() {}
}
