//! Redis key layout for the dispatch pipeline.
//!
//! One place for every key the queue, limiter, and purger touch.

/// Ready stream of jobs for a shard.
pub fn ready_stream(shard: &str) -> String {
    format!("ready:{}", shard)
}

/// Delayed sorted set of future-dated jobs for a shard (score = fire-at ms).
pub fn delayed_set(shard: &str) -> String {
    format!("delayed:{}", shard)
}

/// Consumer group name over a shard's ready stream.
pub fn consumer_group(shard: &str) -> String {
    format!("cg:{}", shard)
}

/// Fixed-window per-bot counter for one clock second.
pub fn bot_fixed_window(bot: &str, sec: i64) -> String {
    format!("lim:bot:fixed:{}:{}", bot, sec)
}

/// Earliest permitted send epoch-ms for a (bot, chat) pair.
pub fn chat_next_allowed(bot: &str, chat_id: i64) -> String {
    format!("lim:chat:next:{}:{}", bot, chat_id)
}

/// Success marker for an idempotency key.
pub fn idempotency_marker(key: &str) -> String {
    format!("idem:{}", key)
}

/// Cancellation tombstone for a deleted task; workers drop matching jobs.
pub fn cancelled_task(task_id: i64) -> String {
    format!("cancelled:{}", task_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_formats() {
        assert_eq!(ready_stream("3"), "ready:3");
        assert_eq!(delayed_set("3"), "delayed:3");
        assert_eq!(consumer_group("3"), "cg:3");
        assert_eq!(bot_fixed_window("botA", 1700000000), "lim:bot:fixed:botA:1700000000");
        assert_eq!(chat_next_allowed("botA", -100200300), "lim:chat:next:botA:-100200300");
        assert_eq!(idempotency_marker("abc123"), "idem:abc123");
        assert_eq!(cancelled_task(42), "cancelled:42");
    }
}
