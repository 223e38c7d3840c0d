//! The injected send capability.

use async_trait::async_trait;

/// Outcome of one provider send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Delivered; carries the provider's message id for the idempotency marker.
    Ok { provider_msg_id: String },

    /// Provider throttled the bot; retry no sooner than `retry_after_secs`.
    TooManyRequests { retry_after_secs: u32 },

    /// Transient failure; retry with backoff.
    Retryable,

    /// Permanent failure; do not retry.
    Fatal { reason: String },
}

/// Send capability injected into workers.
///
/// The queue never inspects `payload` bytes; what they mean is between the
/// producer of the job and the sender implementation. Implementations must
/// be safe under parallel invocation.
#[async_trait]
pub trait Sender: Send + Sync {
    async fn send(&self, bot: &str, chat_id: i64, payload: &str) -> SendOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_equality() {
        assert_eq!(
            SendOutcome::Ok { provider_msg_id: "m1".into() },
            SendOutcome::Ok { provider_msg_id: "m1".into() }
        );
        assert_ne!(
            SendOutcome::Retryable,
            SendOutcome::Fatal { reason: "chat not found".into() }
        );
    }
}
