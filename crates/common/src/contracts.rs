//! Message contracts shared by producers and consumers.
//!
//! Contracts are versioned by shape: adding a field is a new shape, and both
//! hosts must be deployed with compatible contract definitions. Messages are
//! immutable once published; identity is the producer-generated job id.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request to deliver an email. Published by the API host, consumed by the
/// worker host from the primary send queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendEmailMessage {
    pub job_id: Uuid,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// Request to re-deliver a previously failed email. References the prior job
/// by id; the pipeline does not validate that the original job ever existed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResendEmailMessage {
    pub original_job_id: Uuid,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub requested_at: DateTime<Utc>,
}

/// Category of a consumer failure, used by retry policy filters and recorded
/// in fault envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Upstream provider responded with a rate limit (HTTP 429 class).
    RateLimited,
    /// Transient network failure reaching a downstream system.
    Network,
    /// Non-retryable business failure.
    Permanent,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::RateLimited => write!(f, "rate_limited"),
            FailureKind::Network => write!(f, "network"),
            FailureKind::Permanent => write!(f, "permanent"),
        }
    }
}

/// One recorded failure from a delivery attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub kind: FailureKind,
    pub message: String,
}

/// Terminal failure message wrapping the original payload plus the ordered
/// failure records from every delivery attempt.
///
/// Synthesized by the dispatch layer when a message's retry budget is
/// exhausted, and routed to the fault queue. This is distinct from the
/// broker's automatic dead-letter queue, which remains a secondary safety
/// net. A fault envelope is created once and never retried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultEnvelope {
    /// The original message, kept as raw JSON so the dispatch layer stays
    /// message-type agnostic.
    pub message: serde_json::Value,
    /// Failure records in delivery-attempt order.
    pub exceptions: Vec<FailureRecord>,
    pub faulted_at: DateTime<Utc>,
}

impl FaultEnvelope {
    /// Recover the original typed message from the envelope.
    pub fn original<M: DeserializeOwned>(&self) -> Result<M, serde_json::Error> {
        serde_json::from_value(self.message.clone())
    }
}
