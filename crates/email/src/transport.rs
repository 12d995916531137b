//! Delivery transport boundary for the email module.
//!
//! The pipeline never talks to a provider directly; it goes through
//! [`EmailTransport`], and transport failures carry the classification the
//! retry chain filters on.

use async_trait::async_trait;
use thiserror::Error;

use courier_messaging::ConsumeError;

/// Failure from the delivery provider, classified for retry filtering.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Provider throttled the request. Retryable after a long pause.
    #[error("rate limited by provider: {0}")]
    RateLimited(String),

    /// Transient failure reaching the provider. Retryable quickly.
    #[error("network failure: {0}")]
    Network(String),

    /// Provider rejected the message outright. Not retryable.
    #[error("rejected by provider: {0}")]
    Rejected(String),
}

impl From<TransportError> for ConsumeError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::RateLimited(msg) => ConsumeError::RateLimited(msg),
            TransportError::Network(msg) => ConsumeError::Network(msg),
            TransportError::Rejected(msg) => ConsumeError::Permanent(msg),
        }
    }
}

/// Outbound email delivery.
#[async_trait]
pub trait EmailTransport: Send + Sync + 'static {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), TransportError>;
}

/// Transport that logs instead of delivering. The default until a real
/// provider integration is configured.
pub struct LogTransport;

#[async_trait]
impl EmailTransport for LogTransport {
    async fn send(&self, to: &str, subject: &str, _body: &str) -> Result<(), TransportError> {
        tracing::info!(to = %to, subject = %subject, "Email delivered (log transport)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_common::contracts::FailureKind;

    #[test]
    fn transport_errors_map_to_failure_kinds() {
        let rate: ConsumeError = TransportError::RateLimited("429".to_string()).into();
        let net: ConsumeError = TransportError::Network("timeout".to_string()).into();
        let rejected: ConsumeError = TransportError::Rejected("bad address".to_string()).into();

        assert_eq!(rate.kind(), Some(FailureKind::RateLimited));
        assert_eq!(net.kind(), Some(FailureKind::Network));
        assert_eq!(rejected.kind(), Some(FailureKind::Permanent));
    }
}
