//! Per-message dispatch: consume, classify failures against the retry
//! chain, redeliver in-process, and synthesize fault envelopes on
//! exhaustion.
//!
//! Message lifecycle per delivery: received → processing → {acknowledged |
//! retry-scheduled | faulted}. Consumption strictly precedes any retry or
//! fault transition; cancellation aborts without classifying the message as
//! failed.

use chrono::Utc;
use tokio::sync::watch;

use courier_common::contracts::{FailureRecord, FaultEnvelope};

use crate::retry::next_delay;
use crate::topology::{EventBus, QueueDefinition, publish};

/// Outcome of driving one message through its consumer and retry chain.
#[derive(Debug)]
pub enum Disposition {
    /// Consumed successfully.
    Acked,
    /// Retry budget exhausted or failure unmatched by any policy.
    Faulted(FaultEnvelope),
    /// Cancelled mid-processing; the message must stay unacknowledged so
    /// the broker redelivers it.
    Cancelled,
}

/// What the transport should do with the delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Ack,
    Requeue,
}

/// Run one message through the queue's consumer with in-process redelivery
/// per its retry chain.
pub async fn dispatch(
    definition: &QueueDefinition,
    payload: &[u8],
    mut shutdown: watch::Receiver<bool>,
) -> Disposition {
    let mut failures: Vec<FailureRecord> = Vec::new();
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        let err = match definition.consumer.consume_json(payload).await {
            Ok(()) => return Disposition::Acked,
            Err(err) => err,
        };

        let Some(record) = err.record() else {
            tracing::debug!(
                queue = %definition.name,
                attempts,
                "Consume cancelled; leaving message unacknowledged"
            );
            return Disposition::Cancelled;
        };
        let kind = record.kind;
        failures.push(record);

        match next_delay(&definition.retry_chain, kind, attempts) {
            Some(delay) => {
                tracing::warn!(
                    queue = %definition.name,
                    attempts,
                    kind = %kind,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Delivery failed; redelivery scheduled"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => return Disposition::Cancelled,
                }
            }
            None => {
                tracing::error!(
                    queue = %definition.name,
                    attempts,
                    kind = %kind,
                    "Retry budget exhausted; synthesizing fault envelope"
                );
                let message =
                    serde_json::from_slice(payload).unwrap_or(serde_json::Value::Null);
                return Disposition::Faulted(FaultEnvelope {
                    message,
                    exceptions: failures,
                    faulted_at: Utc::now(),
                });
            }
        }
    }
}

/// Resolve a disposition against the transport: publish fault envelopes to
/// the queue's fault queue and decide ack/requeue for the original
/// delivery.
pub async fn complete(
    bus: &dyn EventBus,
    definition: &QueueDefinition,
    disposition: Disposition,
) -> Completion {
    match disposition {
        Disposition::Acked => Completion::Ack,
        Disposition::Cancelled => Completion::Requeue,
        Disposition::Faulted(envelope) => match &definition.fault_queue {
            Some(fault_queue) => match publish(bus, fault_queue, &envelope).await {
                Ok(()) => {
                    tracing::info!(
                        queue = %definition.name,
                        fault_queue = %fault_queue,
                        exceptions = envelope.exceptions.len(),
                        "Fault envelope routed"
                    );
                    // The original is acked: it must never requeue to the
                    // primary queue once faulted.
                    Completion::Ack
                }
                Err(err) => {
                    tracing::error!(
                        queue = %definition.name,
                        fault_queue = %fault_queue,
                        error = %err,
                        "Fault publish failed; requeueing for the broker dead-letter safety net"
                    );
                    Completion::Requeue
                }
            },
            None => {
                // Terminal queue with no fault routing of its own. Ack so
                // the message does not loop; the failure is already logged.
                tracing::error!(
                    queue = %definition.name,
                    "Message faulted on a queue without a fault queue"
                );
                Completion::Ack
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use courier_common::contracts::FailureKind;

    use super::*;
    use crate::consumer::{ConsumeError, Consumer};
    use crate::retry::{ErrorFilter, RetryPolicy};

    struct AlwaysFails {
        error_for: fn(String) -> ConsumeError,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Consumer for AlwaysFails {
        type Message = serde_json::Value;

        async fn consume(&self, _message: Self::Message) -> Result<(), ConsumeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err((self.error_for)("boom".to_string()))
        }
    }

    fn definition(consumer: Arc<dyn crate::consumer::ErasedConsumer>, chain: Vec<RetryPolicy>) -> QueueDefinition {
        QueueDefinition::new("test-queue", consumer).retry(chain)
    }

    fn shutdown_never() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    #[tokio::test(start_paused = true)]
    async fn filtered_failure_faults_after_budget_with_all_records() {
        let calls = Arc::new(AtomicUsize::new(0));
        let consumer = Arc::new(AlwaysFails {
            error_for: ConsumeError::Network,
            calls: Arc::clone(&calls),
        });
        let defn = definition(
            consumer,
            vec![RetryPolicy::exponential(
                ErrorFilter::Only(FailureKind::Network),
                3,
                Duration::from_secs(1),
                Duration::from_secs(10),
                2.0,
            )],
        );

        let (_tx, rx) = shutdown_never();
        let disposition = dispatch(&defn, b"{}", rx).await;

        let Disposition::Faulted(envelope) = disposition else {
            panic!("expected fault");
        };
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(envelope.exceptions.len(), 3);
        assert!(
            envelope
                .exceptions
                .iter()
                .all(|record| record.kind == FailureKind::Network)
        );
    }

    #[tokio::test]
    async fn unfiltered_failure_faults_without_redelivery() {
        let calls = Arc::new(AtomicUsize::new(0));
        let consumer = Arc::new(AlwaysFails {
            error_for: ConsumeError::Permanent,
            calls: Arc::clone(&calls),
        });
        let defn = definition(
            consumer,
            vec![RetryPolicy::exponential(
                ErrorFilter::Only(FailureKind::Network),
                3,
                Duration::from_secs(1),
                Duration::from_secs(10),
                2.0,
            )],
        );

        let (_tx, rx) = shutdown_never();
        let disposition = dispatch(&defn, b"{}", rx).await;

        let Disposition::Faulted(envelope) = disposition else {
            panic!("expected fault");
        };
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(envelope.exceptions.len(), 1);
    }

    #[tokio::test]
    async fn cancellation_is_exempt_from_fault_classification() {
        struct Cancels;

        #[async_trait]
        impl Consumer for Cancels {
            type Message = serde_json::Value;

            async fn consume(&self, _message: Self::Message) -> Result<(), ConsumeError> {
                Err(ConsumeError::Cancelled)
            }
        }

        let defn = definition(Arc::new(Cancels), vec![]);
        let (_tx, rx) = shutdown_never();
        let disposition = dispatch(&defn, b"{}", rx).await;
        assert!(matches!(disposition, Disposition::Cancelled));
    }
}
