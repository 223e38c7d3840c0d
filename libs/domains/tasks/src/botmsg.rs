//! The `bot_msg` fire handler: task fire → per-(chat, message) send jobs.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dispatch::{Job, Producer, idempotency_key};
use scheduler::{JobHandler, SchedulerError};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

/// Task type of broadcast fires.
pub const BOT_MSG_TYPE: &str = "bot_msg";

/// Payload registered with the scheduler for every broadcast task.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BotMsgPayload {
    #[serde(rename = "messageIds", default)]
    pub message_ids: Vec<i64>,

    #[serde(rename = "groupIds", default)]
    pub group_ids: Vec<i64>,

    #[serde(rename = "msg_type", default, skip_serializing_if = "String::is_empty")]
    pub msg_type: String,

    #[serde(rename = "taskId", default, skip_serializing_if = "is_zero")]
    pub task_id: i64,

    /// RFC 3339 cutoff echoed into job payloads; the accounting layer
    /// prefers it over a row read.
    #[serde(rename = "expireTime", default, skip_serializing_if = "String::is_empty")]
    pub expire_time: String,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

impl BotMsgPayload {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Extract the task id from a fire payload; 0 when absent or unparseable.
pub fn parse_task_id(payload: &[u8]) -> i64 {
    serde_json::from_slice::<BotMsgPayload>(payload)
        .map(|p| p.task_id)
        .unwrap_or(0)
}

/// Extract the expiry cutoff from a fire payload.
pub fn parse_expire_time(payload: &[u8]) -> Option<DateTime<Utc>> {
    let parsed = serde_json::from_slice::<BotMsgPayload>(payload).ok()?;
    if parsed.expire_time.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(&parsed.expire_time)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Fans a task fire out into one send job per (chat, message) pair and
/// enqueues the batch through the backpressure-aware producer.
pub struct BotMsgHandler {
    producer: Arc<Producer>,
}

impl BotMsgHandler {
    pub fn new(producer: Arc<Producer>) -> Self {
        Self { producer }
    }
}

#[async_trait]
impl JobHandler for BotMsgHandler {
    fn task_type(&self) -> &'static str {
        BOT_MSG_TYPE
    }

    async fn process(&self, payload: &[u8]) -> Result<(), SchedulerError> {
        let fire: BotMsgPayload = serde_json::from_slice(payload).map_err(|e| {
            error!(error = %e, "Unparseable bot_msg payload");
            SchedulerError::Handler(format!("invalid bot_msg payload: {}", e))
        })?;

        if fire.group_ids.is_empty() {
            info!(task_id = %fire.task_id, "No destination groups, skipping enqueue");
            return Ok(());
        }
        if fire.message_ids.is_empty() {
            info!(task_id = %fire.task_id, "No message ids, skipping enqueue");
            return Ok(());
        }

        let now = Utc::now();
        let now_ms = now.timestamp_millis();
        let mut jobs = Vec::with_capacity(fire.group_ids.len() * fire.message_ids.len());

        for &chat_id in &fire.group_ids {
            for (message_index, &message_id) in fire.message_ids.iter().enumerate() {
                let mut body = serde_json::json!({
                    "taskId": fire.task_id,
                    "messageId": message_id,
                });
                if !fire.msg_type.is_empty() {
                    body["msgType"] = serde_json::json!(fire.msg_type);
                }
                if !fire.expire_time.is_empty() {
                    body["expireTime"] = serde_json::json!(fire.expire_time);
                }

                jobs.push(Job {
                    jid: format!(
                        "{}-{}-{}-{}",
                        fire.task_id,
                        chat_id,
                        message_id,
                        now.timestamp_nanos_opt().unwrap_or(now_ms)
                    ),
                    task_id: fire.task_id,
                    message_index,
                    chat_id,
                    payload: body.to_string(),
                    idempotency_key: idempotency_key(fire.task_id, chat_id, message_id),
                    attempts: 0,
                    created_at_ms: now_ms,
                    bot_candidates: Vec::new(),
                });
            }
        }

        let report = self.producer.enqueue(jobs).await.map_err(|e| {
            error!(task_id = %fire.task_id, error = %e, "Enqueue failed");
            SchedulerError::Handler(format!("enqueue failed: {}", e))
        })?;

        info!(
            task_id = %fire.task_id,
            ready = %report.ready,
            delayed = %report.delayed,
            "Enqueued broadcast jobs"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_wire_names() {
        let payload = BotMsgPayload {
            message_ids: vec![7, 8],
            group_ids: vec![100],
            msg_type: "bot_msg".to_string(),
            task_id: 42,
            expire_time: "2024-06-01T10:00:00Z".to_string(),
        };

        let raw = payload.to_json().unwrap();
        assert!(raw.contains("\"messageIds\""));
        assert!(raw.contains("\"groupIds\""));
        assert!(raw.contains("\"msg_type\""));
        assert!(raw.contains("\"taskId\""));
        assert!(raw.contains("\"expireTime\""));
    }

    #[test]
    fn test_payload_omits_empty_optionals() {
        let payload = BotMsgPayload {
            message_ids: vec![7],
            group_ids: vec![100],
            ..Default::default()
        };

        let raw = payload.to_json().unwrap();
        assert!(!raw.contains("taskId"));
        assert!(!raw.contains("msg_type"));
        assert!(!raw.contains("expireTime"));
    }

    #[test]
    fn test_parse_task_id() {
        let raw = br#"{"taskId":42,"groupIds":[100],"messageIds":[7]}"#;
        assert_eq!(parse_task_id(raw), 42);

        assert_eq!(parse_task_id(br#"{"groupIds":[100]}"#), 0);
        assert_eq!(parse_task_id(b"not json"), 0);
    }

    #[test]
    fn test_parse_expire_time() {
        let raw = br#"{"taskId":1,"expireTime":"2024-06-01T10:00:00Z"}"#;
        let expire = parse_expire_time(raw).unwrap();
        assert_eq!(expire.to_rfc3339(), "2024-06-01T10:00:00+00:00");

        assert!(parse_expire_time(br#"{"taskId":1}"#).is_none());
        assert!(parse_expire_time(br#"{"taskId":1,"expireTime":"junk"}"#).is_none());
    }
}
