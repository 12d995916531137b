//! Queue consumers for the email module.

use std::sync::Arc;

use async_trait::async_trait;

use courier_common::contracts::{FaultEnvelope, ResendEmailMessage, SendEmailMessage};
use courier_messaging::{ConsumeError, Consumer};

use crate::sink::FaultSink;
use crate::transport::EmailTransport;

/// Consumes send requests from the primary queue and delivers them through
/// the transport.
pub struct SendEmailConsumer {
    transport: Arc<dyn EmailTransport>,
}

impl SendEmailConsumer {
    pub fn new(transport: Arc<dyn EmailTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl Consumer for SendEmailConsumer {
    type Message = SendEmailMessage;

    async fn consume(&self, message: Self::Message) -> Result<(), ConsumeError> {
        tracing::info!(job_id = %message.job_id, to = %message.to, "Delivering email");
        self.transport
            .send(&message.to, &message.subject, &message.body)
            .await?;
        tracing::info!(job_id = %message.job_id, "Email delivered");
        Ok(())
    }
}

/// Consumes resend requests. A resend is a fresh delivery attempt carrying
/// the original job id for correlation; it does not consult prior state.
pub struct ResendEmailConsumer {
    transport: Arc<dyn EmailTransport>,
}

impl ResendEmailConsumer {
    pub fn new(transport: Arc<dyn EmailTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl Consumer for ResendEmailConsumer {
    type Message = ResendEmailMessage;

    async fn consume(&self, message: Self::Message) -> Result<(), ConsumeError> {
        tracing::info!(
            original_job_id = %message.original_job_id,
            to = %message.to,
            "Redelivering email"
        );
        self.transport
            .send(&message.to, &message.subject, &message.body)
            .await?;
        Ok(())
    }
}

/// Consumes fault envelopes from the fault queue and hands them to the
/// sink. Sink failures are absorbed: the fault queue has no retry chain,
/// and a second sink invocation for the same envelope is worse than a lost
/// notification already captured in the log.
pub struct EmailFaultConsumer {
    sink: Arc<dyn FaultSink>,
}

impl EmailFaultConsumer {
    pub fn new(sink: Arc<dyn FaultSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl Consumer for EmailFaultConsumer {
    type Message = FaultEnvelope;

    async fn consume(&self, envelope: Self::Message) -> Result<(), ConsumeError> {
        if let Err(err) = self.sink.notify(&envelope).await {
            tracing::error!(
                error = %err,
                faulted_at = %envelope.faulted_at,
                attempts = envelope.exceptions.len(),
                "Fault sink failed; envelope dropped after logging"
            );
        }
        Ok(())
    }
}
