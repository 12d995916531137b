//! Fault notification sinks.
//!
//! A sink is where terminally-failed jobs are reported: the audit database
//! when configured, the log otherwise. The fault consumer invokes the sink
//! exactly once per envelope.

use async_trait::async_trait;

use courier_common::contracts::{FaultEnvelope, SendEmailMessage};

use crate::audit::AuditStore;

/// Receiver of terminal failure notifications.
#[async_trait]
pub trait FaultSink: Send + Sync + 'static {
    async fn notify(&self, envelope: &FaultEnvelope) -> anyhow::Result<()>;
}

/// Sink that records faults in the audit database.
pub struct PgFaultSink {
    store: AuditStore,
}

impl PgFaultSink {
    pub fn new(store: AuditStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl FaultSink for PgFaultSink {
    async fn notify(&self, envelope: &FaultEnvelope) -> anyhow::Result<()> {
        self.store.record_fault(envelope).await?;
        Ok(())
    }
}

/// Sink that only logs. Used when no audit database is configured.
pub struct LogFaultSink;

#[async_trait]
impl FaultSink for LogFaultSink {
    async fn notify(&self, envelope: &FaultEnvelope) -> anyhow::Result<()> {
        let job_id = envelope
            .original::<SendEmailMessage>()
            .map(|m| m.job_id.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        tracing::error!(
            job_id = %job_id,
            attempts = envelope.exceptions.len(),
            faulted_at = %envelope.faulted_at,
            "Email job terminally failed"
        );
        Ok(())
    }
}
