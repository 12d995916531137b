//! Postgres audit trail for the email module.
//!
//! Accepted jobs are written as a header row (routing metadata) plus a
//! detail row (the body), and faulted jobs land in `email_faults` with the
//! full failure history as JSON. The audit trail is observational: the
//! pipeline never reads it to make delivery decisions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use courier_common::contracts::{FaultEnvelope, SendEmailMessage};
use courier_common::error::AppError;

/// Read-model row for one accepted email job, served from the cached job
/// lookup endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EmailJobRecord {
    pub job_id: Uuid,
    pub recipient: String,
    pub subject: String,
    pub accepted_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct AuditStore {
    pool: PgPool,
}

impl AuditStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Persist an accepted job: header and detail rows in one transaction.
    pub async fn record_request(&self, message: &SendEmailMessage) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO email_request_headers (job_id, recipient, subject, accepted_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(message.job_id)
        .bind(&message.to)
        .bind(&message.subject)
        .bind(message.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO email_request_details (job_id, body)
            VALUES ($1, $2)
            "#,
        )
        .bind(message.job_id)
        .bind(&message.body)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Look up one accepted job by id.
    pub async fn find_request(&self, job_id: Uuid) -> Result<Option<EmailJobRecord>, AppError> {
        let record = sqlx::query_as::<_, EmailJobRecord>(
            r#"
            SELECT job_id, recipient, subject, accepted_at
            FROM email_request_headers
            WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Persist a fault envelope. The original message and its failure
    /// records are stored as JSON so the schema survives contract changes.
    pub async fn record_fault(&self, envelope: &FaultEnvelope) -> Result<(), AppError> {
        let job_id = envelope
            .original::<SendEmailMessage>()
            .map(|m| m.job_id)
            .ok();
        let exceptions = serde_json::to_value(&envelope.exceptions)
            .map_err(|e| AppError::Internal(format!("fault serialization failed: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO email_faults (job_id, message, exceptions, faulted_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(job_id)
        .bind(&envelope.message)
        .bind(exceptions)
        .bind(envelope.faulted_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
