//! Per-shard coordinator promoting due jobs from delayed set to ready stream.

use std::time::Duration;

use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::DispatchConfig;
use crate::error::DispatchError;
use crate::job::Job;
use crate::keys;

/// Promotes fire-time-reached jobs out of a shard's delayed set.
///
/// Run one Mover per shard. Promotion is XADD-then-ZREM per member: a crash
/// between the two re-promotes the member on the next tick, which the
/// idempotency marker downstream absorbs.
pub struct Mover {
    redis: ConnectionManager,
    config: DispatchConfig,
    shard: String,
}

impl Mover {
    pub fn new(redis: ConnectionManager, config: DispatchConfig, shard: impl Into<String>) -> Self {
        Self {
            redis,
            config,
            shard: shard.into(),
        }
    }

    pub fn shard(&self) -> &str {
        &self.shard
    }

    /// Run the mover loop until shutdown is signalled.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(shard = %self.shard, interval_ms = %self.config.mover_interval_ms, "Mover started");

        let mut ticker = tokio::time::interval(Duration::from_millis(self.config.mover_interval_ms));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.promote_due().await {
                        if e.is_connection_error() {
                            warn!(shard = %self.shard, error = %e, "Mover store error, backing off");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        } else {
                            warn!(shard = %self.shard, error = %e, "Mover tick failed");
                        }
                    }
                }
            }
        }

        info!(shard = %self.shard, "Mover stopped");
    }

    /// Promote up to `mover_batch` due members. Returns the promoted count.
    pub async fn promote_due(&self) -> Result<usize, DispatchError> {
        let mut conn = self.redis.clone();
        let delayed = keys::delayed_set(&self.shard);
        let now_ms = chrono::Utc::now().timestamp_millis();

        let members: Vec<String> = conn
            .zrangebyscore_limit(&delayed, "-inf", now_ms, 0, self.config.mover_batch as isize)
            .await?;

        if members.is_empty() {
            return Ok(0);
        }

        let mut promoted = 0;
        for member in members {
            let job = match Job::from_json(&member) {
                Ok(job) => job,
                Err(e) => {
                    // Drop poison members so they cannot block the head.
                    warn!(shard = %self.shard, error = %e, "Unparseable delayed member, removing");
                    let _: i64 = conn.zrem(&delayed, &member).await.unwrap_or(0);
                    continue;
                }
            };

            if let Err(e) = self.append_ready(&member).await {
                warn!(shard = %self.shard, jid = %job.jid, error = %e, "Promotion XADD failed");
                continue;
            }

            // Remove the exact member we read; a concurrent rewrite of the
            // same job serializes differently and stays queued.
            let _: i64 = conn.zrem(&delayed, &member).await.unwrap_or(0);
            promoted += 1;

            debug!(shard = %self.shard, jid = %job.jid, attempts = %job.attempts, "Promoted job to ready");
        }

        Ok(promoted)
    }

    async fn append_ready(&self, job_json: &str) -> Result<(), DispatchError> {
        let mut conn = self.redis.clone();

        let mut cmd = redis::cmd("XADD");
        cmd.arg(keys::ready_stream(&self.shard));
        if self.config.stream_max_len > 0 {
            cmd.arg("MAXLEN").arg("~").arg(self.config.stream_max_len);
        }
        cmd.arg("*").arg("job").arg(job_json);

        let _: String = cmd.query_async(&mut conn).await?;
        Ok(())
    }
}
