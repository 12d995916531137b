use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;

use courier_common::contracts::{FailureKind, FailureRecord};

/// Failure raised by a consumer while processing a message. The variant
/// carries the failure category the retry chain filters on.
#[derive(Debug, Error)]
pub enum ConsumeError {
    /// Downstream provider rate limit. Retried on the slow backoff policy.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Transient network failure. Retried on the fast backoff policy.
    #[error("network failure: {0}")]
    Network(String),

    /// Non-retryable failure; goes straight to the fault queue.
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// Caller intent, not a failure: the message is left unacknowledged so
    /// the broker can redeliver it. Exempt from retry and fault
    /// classification.
    #[error("consume cancelled")]
    Cancelled,
}

impl ConsumeError {
    /// Failure category for retry filtering; `None` for cancellation.
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            ConsumeError::RateLimited(_) => Some(FailureKind::RateLimited),
            ConsumeError::Network(_) => Some(FailureKind::Network),
            ConsumeError::Permanent(_) => Some(FailureKind::Permanent),
            ConsumeError::Cancelled => None,
        }
    }

    /// Failure record for the fault envelope; `None` for cancellation.
    pub fn record(&self) -> Option<FailureRecord> {
        self.kind().map(|kind| FailureRecord {
            kind,
            message: self.to_string(),
        })
    }
}

/// A per-message-type handler bound to a queue.
///
/// Errors must propagate: the dispatch loop classifies them against the
/// queue's retry chain, and swallowing them here would defeat retry and
/// fault reporting.
#[async_trait]
pub trait Consumer: Send + Sync + 'static {
    type Message: DeserializeOwned + Send;

    async fn consume(&self, message: Self::Message) -> Result<(), ConsumeError>;
}

/// Type-erased consumer the queue router binds to. Implemented for every
/// [`Consumer`] via JSON decoding of the wire payload.
#[async_trait]
pub trait ErasedConsumer: Send + Sync {
    async fn consume_json(&self, payload: &[u8]) -> Result<(), ConsumeError>;
}

#[async_trait]
impl<C: Consumer> ErasedConsumer for C {
    async fn consume_json(&self, payload: &[u8]) -> Result<(), ConsumeError> {
        let message: C::Message = serde_json::from_slice(payload)
            .map_err(|e| ConsumeError::Permanent(format!("undecodable payload: {e}")))?;
        self.consume(message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_has_no_failure_kind() {
        assert_eq!(ConsumeError::Cancelled.kind(), None);
        assert!(ConsumeError::Cancelled.record().is_none());
    }

    #[test]
    fn kinds_map_to_failure_categories() {
        assert_eq!(
            ConsumeError::RateLimited("429".into()).kind(),
            Some(FailureKind::RateLimited)
        );
        assert_eq!(
            ConsumeError::Network("refused".into()).kind(),
            Some(FailureKind::Network)
        );
        assert_eq!(
            ConsumeError::Permanent("bad address".into()).kind(),
            Some(FailureKind::Permanent)
        );
    }
}
