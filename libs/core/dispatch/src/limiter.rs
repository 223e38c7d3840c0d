//! Per-bot and per-chat rate gates.
//!
//! Two orthogonal, non-blocking checks:
//! - per-bot global rate: fixed 1-second window counter (INCR + 2s expiry)
//! - per-chat gap: earliest permitted epoch-ms stored under a (bot, chat) key
//!
//! Both fail open when the store is unreachable, so a local Redis outage
//! cannot wedge the whole pipeline.

use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::{debug, warn};

use crate::config::DispatchConfig;
use crate::keys;

const WINDOW_KEY_TTL_SECS: i64 = 2;
const CHAT_GAP_TTL_MS: i64 = 10 * 60 * 1000;

/// Result of a rate gate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gate {
    pub allow: bool,
    pub wait_ms: i64,
}

impl Gate {
    pub fn open() -> Self {
        Self { allow: true, wait_ms: 0 }
    }

    pub fn closed(wait_ms: i64) -> Self {
        Self { allow: false, wait_ms }
    }
}

/// Rate limiter over the shared store.
#[derive(Clone)]
pub struct RateLimiter {
    redis: ConnectionManager,
    config: DispatchConfig,
}

impl RateLimiter {
    pub fn new(redis: ConnectionManager, config: DispatchConfig) -> Self {
        Self { redis, config }
    }

    /// Try to take one slot of the bot's fixed-window budget for the current
    /// second. Denial carries the wait until the next window opens.
    pub async fn try_acquire_global(&self, bot: &str, now_ms: i64) -> Gate {
        let sec = now_ms.div_euclid(1000);
        let key = keys::bot_fixed_window(bot, sec);
        let mut conn = self.redis.clone();

        let count: i64 = match conn.incr(&key, 1i64).await {
            Ok(n) => n,
            Err(e) => {
                // Fail open: an unreachable store must not stall sends.
                warn!(bot = %bot, error = %e, "Global rate check failed, permitting");
                return Gate::open();
            }
        };

        if count == 1 {
            if let Err(e) = conn.expire::<_, ()>(&key, WINDOW_KEY_TTL_SECS).await {
                debug!(key = %key, error = %e, "Failed to set window expiry");
            }
        }

        if count <= i64::from(self.config.global_rate_per_sec) {
            return Gate::open();
        }

        let next_window_ms = (sec + 1) * 1000;
        if next_window_ms <= now_ms {
            return Gate::open();
        }
        Gate::closed(next_window_ms - now_ms)
    }

    /// Check the minimum gap between sends into one chat by one bot.
    /// Read-only; the gap is advanced by [`set_chat_gap`] after a send.
    ///
    /// [`set_chat_gap`]: RateLimiter::set_chat_gap
    pub async fn check_chat_gap(&self, bot: &str, chat_id: i64, now_ms: i64) -> Gate {
        let key = keys::chat_next_allowed(bot, chat_id);
        let mut conn = self.redis.clone();

        let stored: Option<String> = match conn.get(&key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(bot = %bot, chat_id = %chat_id, error = %e, "Chat gap check failed, permitting");
                return Gate::open();
            }
        };

        let Some(raw) = stored else {
            return Gate::open();
        };

        let next_allowed_ms: i64 = raw.parse().unwrap_or(0);
        if next_allowed_ms <= now_ms {
            return Gate::open();
        }
        Gate::closed(next_allowed_ms - now_ms)
    }

    /// Record the earliest instant the next send into this chat is permitted.
    /// Last-write-wins; racing writers each bound the next send strictly
    /// enough, so losses are benign.
    pub async fn set_chat_gap(&self, bot: &str, chat_id: i64, next_allowed_ms: i64) {
        let key = keys::chat_next_allowed(bot, chat_id);
        let mut conn = self.redis.clone();

        let result: Result<(), redis::RedisError> = redis::cmd("SET")
            .arg(&key)
            .arg(next_allowed_ms)
            .arg("PX")
            .arg(CHAT_GAP_TTL_MS)
            .query_async(&mut conn)
            .await;

        if let Err(e) = result {
            warn!(bot = %bot, chat_id = %chat_id, error = %e, "Failed to set chat gap");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_constructors() {
        let open = Gate::open();
        assert!(open.allow);
        assert_eq!(open.wait_ms, 0);

        let closed = Gate::closed(250);
        assert!(!closed.allow);
        assert_eq!(closed.wait_ms, 250);
    }
}
