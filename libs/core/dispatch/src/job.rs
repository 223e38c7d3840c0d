//! The send job payload that lives in ready streams and delayed sets.

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

/// A single (chat, message) send job.
///
/// Serialized as one JSON document: the `job` field of a ready-stream entry,
/// and the member string of a delayed-set entry. The serialization must stay
/// byte-stable between enqueue and mover promotion, since the mover removes
/// delayed members by exact value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Locally unique job id (per shard), used for logging.
    pub jid: String,

    /// Owning task row id; 0 when the job is not task-driven.
    #[serde(default)]
    pub task_id: i64,

    /// Index of the message within the task's message list.
    #[serde(rename = "msg_idx", default)]
    pub message_index: usize,

    /// Destination chat.
    pub chat_id: i64,

    /// Opaque payload handed to the sender; the queue never inspects it.
    pub payload: String,

    /// Stable idempotency key; see [`idempotency_key`].
    #[serde(rename = "idem", default)]
    pub idempotency_key: String,

    /// Delivery attempts so far (bot-unavailable reinserts included).
    #[serde(default)]
    pub attempts: u32,

    /// Creation instant, epoch milliseconds.
    #[serde(rename = "created_at", default)]
    pub created_at_ms: i64,

    /// Candidate bot identifiers, in preference order. Empty means the
    /// worker resolves candidates through the registry.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bot_candidates: Vec<String>,
}

impl Job {
    /// Serialize to the canonical JSON form used for both stores.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse from the canonical JSON form.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Stable idempotency key for a logical send.
///
/// `SHA1("<taskId>|<chatId>|<messageId>")`, hex-encoded. Stable across
/// retries and mover promotions, so at most one acknowledged send is ever
/// recorded per (task, chat, message).
pub fn idempotency_key(task_id: i64, chat_id: i64, message_id: i64) -> String {
    let mut hasher = Sha1::new();
    hasher.update(format!("{}|{}|{}", task_id, chat_id, message_id).as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job() -> Job {
        Job {
            jid: "7-100-9-1".to_string(),
            task_id: 7,
            message_index: 0,
            chat_id: 100,
            payload: r#"{"taskId":7,"messageId":9}"#.to_string(),
            idempotency_key: idempotency_key(7, 100, 9),
            attempts: 0,
            created_at_ms: 1_700_000_000_000,
            bot_candidates: vec![],
        }
    }

    #[test]
    fn test_json_round_trip() {
        let job = sample_job();
        let raw = job.to_json().unwrap();
        let parsed = Job::from_json(&raw).unwrap();
        assert_eq!(parsed, job);
    }

    #[test]
    fn test_json_field_names() {
        let raw = sample_job().to_json().unwrap();
        assert!(raw.contains("\"jid\""));
        assert!(raw.contains("\"msg_idx\""));
        assert!(raw.contains("\"idem\""));
        assert!(raw.contains("\"created_at\""));
        // empty candidate list stays off the wire
        assert!(!raw.contains("bot_candidates"));
    }

    #[test]
    fn test_serialization_is_stable() {
        // The mover removes delayed members by exact value, so the same job
        // must serialize to the same bytes every time.
        let job = sample_job();
        assert_eq!(job.to_json().unwrap(), job.to_json().unwrap());
    }

    #[test]
    fn test_idempotency_key_is_stable() {
        let a = idempotency_key(7, 100, 9);
        let b = idempotency_key(7, 100, 9);
        assert_eq!(a, b);
        assert_eq!(a.len(), 40); // hex-encoded SHA1
    }

    #[test]
    fn test_idempotency_key_discriminates() {
        let base = idempotency_key(7, 100, 9);
        assert_ne!(base, idempotency_key(8, 100, 9));
        assert_ne!(base, idempotency_key(7, 101, 9));
        assert_ne!(base, idempotency_key(7, 100, 10));
    }

    #[test]
    fn test_missing_optional_fields_default() {
        let raw = r#"{"jid":"x","chat_id":5,"payload":"p"}"#;
        let job = Job::from_json(raw).unwrap();
        assert_eq!(job.task_id, 0);
        assert_eq!(job.attempts, 0);
        assert!(job.bot_candidates.is_empty());
    }
}
