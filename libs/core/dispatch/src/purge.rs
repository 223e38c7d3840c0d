//! Best-effort removal of a task's queue artefacts.

use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use redis::streams::StreamRangeReply;
use tracing::{info, warn};

use crate::config::DispatchConfig;
use crate::error::DispatchError;
use crate::job::Job;
use crate::keys;
use crate::shard::ShardMap;

const SCAN_PAGE: isize = 100;
const TOMBSTONE_TTL_SECS: i64 = 24 * 60 * 60;

/// What a purge removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    /// Members removed from delayed sets.
    pub delayed_removed: usize,
    /// Entries deleted from ready streams.
    pub ready_removed: usize,
}

/// Removes every queue artefact referring to a task id.
///
/// Deletion is best-effort: entries already delivered to a worker cannot be
/// unread, so a `cancelled:<taskId>` tombstone is left for workers to drop
/// them before the send. All steps are idempotent.
pub struct Purger {
    redis: ConnectionManager,
    shards: ShardMap,
}

impl Purger {
    pub fn new(redis: ConnectionManager, config: DispatchConfig) -> Self {
        let shards = ShardMap::new(config.shard_count);
        Self { redis, shards }
    }

    /// Purge all shards of jobs carrying the given task id and set the
    /// cancellation tombstone.
    pub async fn purge_task(&self, task_id: i64) -> Result<PurgeReport, DispatchError> {
        let mut report = PurgeReport::default();

        for shard in self.shards.names() {
            match self.purge_delayed(&shard, task_id).await {
                Ok(removed) => {
                    if removed > 0 {
                        info!(shard = %shard, task_id = %task_id, removed = %removed, "Purged delayed members");
                    }
                    report.delayed_removed += removed;
                }
                Err(e) => warn!(shard = %shard, task_id = %task_id, error = %e, "Delayed purge failed"),
            }

            match self.purge_ready(&shard, task_id).await {
                Ok(removed) => {
                    if removed > 0 {
                        info!(shard = %shard, task_id = %task_id, removed = %removed, "Purged ready entries");
                    }
                    report.ready_removed += removed;
                }
                Err(e) => warn!(shard = %shard, task_id = %task_id, error = %e, "Ready purge failed"),
            }
        }

        self.set_tombstone(task_id).await;

        info!(
            task_id = %task_id,
            delayed_removed = %report.delayed_removed,
            ready_removed = %report.ready_removed,
            "Queue purge finished"
        );
        Ok(report)
    }

    async fn purge_delayed(&self, shard: &str, task_id: i64) -> Result<usize, DispatchError> {
        let mut conn = self.redis.clone();
        let key = keys::delayed_set(shard);
        let mut removed = 0;
        let mut offset = 0isize;

        loop {
            let members: Vec<String> = conn
                .zrange(&key, offset, offset + SCAN_PAGE - 1)
                .await?;
            if members.is_empty() {
                break;
            }

            let mut removed_this_page = 0;
            for member in &members {
                let matches = Job::from_json(member)
                    .map(|job| job.task_id == task_id)
                    .unwrap_or(false);
                if matches {
                    let count: i64 = conn.zrem(&key, member).await?;
                    removed += count as usize;
                    removed_this_page += count as isize;
                }
            }

            if members.len() < SCAN_PAGE as usize {
                break;
            }
            // Removals shift the remaining ranks left.
            offset += SCAN_PAGE - removed_this_page;
        }

        Ok(removed)
    }

    async fn purge_ready(&self, shard: &str, task_id: i64) -> Result<usize, DispatchError> {
        let mut conn = self.redis.clone();
        let key = keys::ready_stream(shard);
        let mut removed = 0;
        let mut start = "-".to_string();

        loop {
            let reply: StreamRangeReply = conn.xrange_count(&key, &start, "+", SCAN_PAGE).await?;
            if reply.ids.is_empty() {
                break;
            }

            let last_id = reply.ids.last().map(|m| m.id.clone());

            for message in &reply.ids {
                let matches = message
                    .map
                    .get("job")
                    .and_then(|value| match value {
                        redis::Value::BulkString(bytes) => {
                            Some(String::from_utf8_lossy(bytes).to_string())
                        }
                        redis::Value::SimpleString(s) => Some(s.clone()),
                        _ => None,
                    })
                    .and_then(|raw| Job::from_json(&raw).ok())
                    .map(|job| job.task_id == task_id)
                    .unwrap_or(false);

                if matches {
                    let count: i64 = conn.xdel(&key, &[&message.id]).await?;
                    removed += count as usize;
                }
            }

            if reply.ids.len() < SCAN_PAGE as usize {
                break;
            }
            match last_id {
                // Exclusive range start keeps pagination moving forward.
                Some(id) => start = format!("({}", id),
                None => break,
            }
        }

        Ok(removed)
    }

    async fn set_tombstone(&self, task_id: i64) {
        let mut conn = self.redis.clone();
        let result: Result<(), redis::RedisError> = redis::cmd("SET")
            .arg(keys::cancelled_task(task_id))
            .arg(1)
            .arg("EX")
            .arg(TOMBSTONE_TTL_SECS)
            .query_async(&mut conn)
            .await;

        if let Err(e) = result {
            warn!(task_id = %task_id, error = %e, "Failed to set cancellation tombstone");
        }
    }
}
