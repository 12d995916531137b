//! Queue endpoint definitions for the email module.
//!
//! The numbers here are deliberate. Sending is provider-bound, so the send
//! queue keeps a small window (prefetch 4, two in flight) with a long
//! fixed-interval backoff for throttling and a short exponential one for
//! network blips. Fault handling is strictly serialized so failure reports
//! are recorded in arrival order.

use std::sync::Arc;
use std::time::Duration;

use courier_common::config::QueueNames;
use courier_common::contracts::FailureKind;
use courier_messaging::{ErrorFilter, QueueDefinition, RetryPolicy};

use crate::consumers::{EmailFaultConsumer, ResendEmailConsumer, SendEmailConsumer};
use crate::sink::FaultSink;
use crate::transport::EmailTransport;

/// Build the three queue definitions for the email module, ready to be
/// declared on a topology.
pub fn email_endpoints(
    queues: &QueueNames,
    transport: Arc<dyn EmailTransport>,
    sink: Arc<dyn FaultSink>,
) -> Vec<QueueDefinition> {
    vec![
        send_endpoint(queues, Arc::clone(&transport)),
        fault_endpoint(queues, sink),
        resend_endpoint(queues, transport),
    ]
}

fn send_endpoint(queues: &QueueNames, transport: Arc<dyn EmailTransport>) -> QueueDefinition {
    QueueDefinition::new(&queues.send_queue, Arc::new(SendEmailConsumer::new(transport)))
        .prefetch(4)
        .concurrency(2)
        .retry(vec![
            // Throttling resolves on the provider's clock, not ours: long
            // fixed pauses, checked before the network policy.
            RetryPolicy::fixed(
                ErrorFilter::Only(FailureKind::RateLimited),
                vec![
                    Duration::from_secs(15),
                    Duration::from_secs(45),
                    Duration::from_secs(120),
                    Duration::from_secs(300),
                ],
            ),
            RetryPolicy::exponential(
                ErrorFilter::Only(FailureKind::Network),
                3,
                Duration::from_secs(1),
                Duration::from_secs(10),
                2.0,
            ),
        ])
        .fault_queue(&queues.fault_queue)
}

fn fault_endpoint(queues: &QueueNames, sink: Arc<dyn FaultSink>) -> QueueDefinition {
    // Terminal queue: no retry chain and no fault queue of its own. The
    // consumer absorbs sink failures rather than re-fault.
    QueueDefinition::new(&queues.fault_queue, Arc::new(EmailFaultConsumer::new(sink)))
        .prefetch(2)
        .concurrency(1)
}

fn resend_endpoint(queues: &QueueNames, transport: Arc<dyn EmailTransport>) -> QueueDefinition {
    QueueDefinition::new(
        &queues.resend_queue,
        Arc::new(ResendEmailConsumer::new(transport)),
    )
    .prefetch(4)
    .concurrency(2)
    .retry(vec![RetryPolicy::exponential(
        ErrorFilter::Only(FailureKind::Network),
        3,
        Duration::from_secs(1),
        Duration::from_secs(10),
        2.0,
    )])
    .fault_queue(&queues.fault_queue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::LogFaultSink;
    use crate::transport::LogTransport;

    fn queues() -> QueueNames {
        QueueNames {
            send_queue: "email-queue".to_string(),
            fault_queue: "email-faults".to_string(),
            resend_queue: "email-resend-requests".to_string(),
        }
    }

    #[test]
    fn endpoints_cover_all_three_queues() {
        let endpoints = email_endpoints(&queues(), Arc::new(LogTransport), Arc::new(LogFaultSink));

        let names: Vec<&str> = endpoints.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["email-queue", "email-faults", "email-resend-requests"]);
    }

    #[test]
    fn send_endpoint_routes_faults_and_limits_concurrency() {
        let endpoints = email_endpoints(&queues(), Arc::new(LogTransport), Arc::new(LogFaultSink));
        let send = &endpoints[0];

        assert_eq!(send.prefetch, 4);
        assert_eq!(send.concurrency_limit, 2);
        assert_eq!(send.retry_chain.len(), 2);
        assert_eq!(send.fault_queue.as_deref(), Some("email-faults"));
    }

    #[test]
    fn fault_endpoint_is_serialized_and_terminal() {
        let endpoints = email_endpoints(&queues(), Arc::new(LogTransport), Arc::new(LogFaultSink));
        let fault = &endpoints[1];

        assert_eq!(fault.prefetch, 2);
        assert_eq!(fault.concurrency_limit, 1);
        assert!(fault.retry_chain.is_empty());
        assert!(fault.fault_queue.is_none());
    }
}
