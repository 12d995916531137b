use thiserror::Error;

/// Infrastructure errors raised by the messaging layer. Business failures
/// inside consumers are [`ConsumeError`](crate::consumer::ConsumeError), not
/// this.
#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("broker connection failed: {0}")]
    Connection(String),

    #[error("queue '{queue}' setup failed: {message}")]
    QueueSetup { queue: String, message: String },

    #[error("publish to '{queue}' failed: {message}")]
    Publish { queue: String, message: String },

    #[error("message serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MessagingError {
    pub fn queue_setup(queue: &str, message: impl Into<String>) -> Self {
        Self::QueueSetup {
            queue: queue.to_string(),
            message: message.into(),
        }
    }

    pub fn publish(queue: &str, message: impl Into<String>) -> Self {
        Self::Publish {
            queue: queue.to_string(),
            message: message.into(),
        }
    }
}
