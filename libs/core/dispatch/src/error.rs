//! Error types for queue operations.

use thiserror::Error;

/// Errors that can occur in the dispatch pipeline.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Redis connection or command error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// JSON serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stream entry did not carry a parseable job.
    #[error("Job parsing error: {0}")]
    JobParsing(String),

    /// Consumer group creation/management error.
    #[error("Consumer group error: {0}")]
    ConsumerGroup(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DispatchError {
    /// Check if this is a consumer group missing error (NOGROUP).
    pub fn is_nogroup_error(&self) -> bool {
        match self {
            Self::Redis(e) => e.to_string().contains("NOGROUP"),
            Self::ConsumerGroup(s) => s.contains("NOGROUP"),
            _ => false,
        }
    }

    /// Check if this is a connection-level error that may recover on retry.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::Redis(e) => {
                let err_str = e.to_string().to_lowercase();
                err_str.contains("connection")
                    || err_str.contains("broken pipe")
                    || err_str.contains("reset by peer")
                    || err_str.contains("refused")
                    || err_str.contains("io error")
            }
            _ => false,
        }
    }
}
