//! Thin Telegram Bot API sender.

use async_trait::async_trait;
use dispatch::{SendOutcome, Sender};
use serde::Deserialize;
use tracing::{debug, warn};

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Sends job payloads through the Bot API `sendMessage` endpoint.
///
/// The payload bytes are forwarded as the message text; rendering them is the
/// producer's concern. Outcomes map onto the queue contract: 429 becomes
/// `TooManyRequests` with the provider's `retry_after`, other client errors
/// are fatal, server and transport errors are retryable.
pub struct TelegramSender {
    http: reqwest::Client,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    description: Option<String>,
    result: Option<ApiMessage>,
    parameters: Option<ApiParameters>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct ApiParameters {
    retry_after: Option<u32>,
}

impl TelegramSender {
    pub fn new() -> Self {
        Self::with_api_base(DEFAULT_API_BASE)
    }

    pub fn with_api_base(api_base: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into(),
        }
    }
}

impl Default for TelegramSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sender for TelegramSender {
    async fn send(&self, bot: &str, chat_id: i64, payload: &str) -> SendOutcome {
        let url = format!("{}/bot{}/sendMessage", self.api_base, bot);

        let response = match self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": chat_id,
                "text": payload,
            }))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                debug!(chat_id = %chat_id, error = %e, "Telegram transport error");
                return SendOutcome::Retryable;
            }
        };

        let status = response.status();
        let body: ApiResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                debug!(chat_id = %chat_id, error = %e, "Unparseable Telegram response");
                return SendOutcome::Retryable;
            }
        };

        if body.ok {
            let provider_msg_id = body
                .result
                .map(|m| m.message_id.to_string())
                .unwrap_or_default();
            return SendOutcome::Ok { provider_msg_id };
        }

        if status.as_u16() == 429 {
            let retry_after_secs = body
                .parameters
                .and_then(|p| p.retry_after)
                .unwrap_or(1);
            return SendOutcome::TooManyRequests { retry_after_secs };
        }

        if status.is_client_error() {
            let reason = body
                .description
                .unwrap_or_else(|| format!("telegram rejected the send ({})", status));
            warn!(chat_id = %chat_id, status = %status, reason = %reason, "Fatal Telegram response");
            return SendOutcome::Fatal { reason };
        }

        SendOutcome::Retryable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_response_parsing() {
        let raw = r#"{"ok":true,"result":{"message_id":123}}"#;
        let body: ApiResponse = serde_json::from_str(raw).unwrap();
        assert!(body.ok);
        assert_eq!(body.result.unwrap().message_id, 123);
    }

    #[test]
    fn test_api_response_retry_after() {
        let raw = r#"{"ok":false,"description":"Too Many Requests: retry after 3","parameters":{"retry_after":3}}"#;
        let body: ApiResponse = serde_json::from_str(raw).unwrap();
        assert!(!body.ok);
        assert_eq!(body.parameters.unwrap().retry_after, Some(3));
    }
}
