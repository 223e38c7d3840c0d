//! Bot candidate lookup.

use async_trait::async_trait;

/// Returns the candidate bot identifiers able to post into a chat, in
/// preference order.
///
/// Workers try candidates in order against the rate gates. An empty list
/// means no bot is configured for the chat; the job is delayed and retried
/// through the mover. Lookup failures should degrade to an empty list rather
/// than error: a missing bot config is routine, not exceptional.
#[async_trait]
pub trait BotRegistry: Send + Sync {
    async fn candidates(&self, chat_id: i64) -> Vec<String>;
}

/// Fixed candidate list, for single-bot deployments and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticBotRegistry {
    bots: Vec<String>,
}

impl StaticBotRegistry {
    pub fn new(bots: Vec<String>) -> Self {
        Self { bots }
    }
}

#[async_trait]
impl BotRegistry for StaticBotRegistry {
    async fn candidates(&self, _chat_id: i64) -> Vec<String> {
        self.bots.clone()
    }
}
