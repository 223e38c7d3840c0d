//! Per-group bot configuration and the DB-backed bot registry.

use async_trait::async_trait;
use dispatch::BotRegistry;
use sea_orm::entity::prelude::*;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// SeaORM entity for the `bot_config` table
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "bot_config")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub admin_id: i64,
    /// 0 = functional bot, 1 = broadcast bot.
    pub bot_type: i32,
    pub region: String,
    #[sea_orm(unique)]
    pub group_id: i64,
    /// Bot settings JSON; the registry reads the `token` field.
    pub config: Json,
    pub features: Json,
    pub create_time: DateTimeWithTimeZone,
    pub update_time: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// DB-backed [`BotRegistry`]: the bot configured for a chat is its only
/// candidate. The contract allows multi-bot later; workers already iterate.
pub struct PgBotRegistry {
    db: DatabaseConnection,
}

impl PgBotRegistry {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl BotRegistry for PgBotRegistry {
    async fn candidates(&self, chat_id: i64) -> Vec<String> {
        let row = match Entity::find()
            .filter(Column::GroupId.eq(chat_id))
            .one(&self.db)
            .await
        {
            Ok(row) => row,
            Err(e) => {
                debug!(chat_id = %chat_id, error = %e, "Bot config lookup failed");
                return Vec::new();
            }
        };

        let Some(row) = row else {
            return Vec::new();
        };

        match row.config.get("token").and_then(|v| v.as_str()) {
            Some(token) if !token.is_empty() => vec![token.to_string()],
            _ => {
                debug!(chat_id = %chat_id, "Bot config has no token");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_token_extraction() {
        let config = serde_json::json!({"token": "123:abc", "welcome": "hi"});
        assert_eq!(config.get("token").and_then(|v| v.as_str()), Some("123:abc"));

        let config = serde_json::json!({"welcome": "hi"});
        assert_eq!(config.get("token").and_then(|v| v.as_str()), None);
    }
}
