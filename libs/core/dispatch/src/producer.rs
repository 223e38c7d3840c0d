//! Backpressure-aware job producer.

use std::collections::{HashMap, HashSet};

use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use redis::streams::StreamPendingReply;
use tracing::{debug, info, warn};

use crate::config::DispatchConfig;
use crate::error::DispatchError;
use crate::job::Job;
use crate::keys;
use crate::shard::ShardMap;

/// Per-shard backlog snapshot used for admission control.
#[derive(Debug, Clone, Copy, Default)]
pub struct Backlog {
    pub ready: i64,
    pub delayed: i64,
    pub pending: i64,
}

impl Backlog {
    pub fn total(&self) -> i64 {
        self.ready + self.delayed + self.pending
    }
}

/// What happened to an enqueued batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnqueueReport {
    /// Jobs appended directly to ready streams.
    pub ready: usize,
    /// Jobs future-dated into delayed sets by admission control.
    pub delayed: usize,
}

/// Enqueues jobs per shard, deferring whole batches into the delayed set
/// when the shard's backlog exceeds what it can drain over the horizon.
pub struct Producer {
    redis: ConnectionManager,
    config: DispatchConfig,
    shards: ShardMap,
}

impl Producer {
    pub fn new(redis: ConnectionManager, config: DispatchConfig) -> Self {
        let shards = ShardMap::new(config.shard_count);
        Self { redis, config, shards }
    }

    pub fn shards(&self) -> &ShardMap {
        &self.shards
    }

    /// Ensure the consumer group for a shard exists (idempotent; also creates
    /// the stream via MKSTREAM).
    pub async fn ensure_group(&self, shard: &str) -> Result<(), DispatchError> {
        let mut conn = self.redis.clone();

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(keys::ready_stream(shard))
            .arg(keys::consumer_group(shard))
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => {
                info!(shard = %shard, "Created consumer group");
                Ok(())
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(shard = %shard, "Consumer group already exists");
                Ok(())
            }
            Err(e) => Err(DispatchError::ConsumerGroup(e.to_string())),
        }
    }

    /// Pre-create the consumer groups of every shard.
    pub async fn ensure_all_groups(&self) -> Result<(), DispatchError> {
        for shard in self.shards.names() {
            self.ensure_group(&shard).await?;
        }
        Ok(())
    }

    /// Read a shard's ready/delayed/pending counts.
    pub async fn backlog(&self, shard: &str) -> Backlog {
        let mut conn = self.redis.clone();

        let ready: i64 = conn.xlen(keys::ready_stream(shard)).await.unwrap_or(0);
        let delayed: i64 = conn.zcard(keys::delayed_set(shard)).await.unwrap_or(0);

        // XPENDING errors (NOGROUP on a fresh shard) count as an empty PEL.
        let pending = match conn
            .xpending::<_, _, StreamPendingReply>(
                keys::ready_stream(shard),
                keys::consumer_group(shard),
            )
            .await
        {
            Ok(reply) => reply.count() as i64,
            Err(_) => 0,
        };

        Backlog { ready, delayed, pending }
    }

    /// Enqueue a batch of jobs, grouped by shard.
    ///
    /// Per shard: if `backlog ≤ max(rate × horizon, 2 × distinct chats)` the
    /// jobs are appended to the ready stream; otherwise the whole shard batch
    /// is future-dated into the delayed set at
    /// `now + max(1, ceil((backlog − limit) / rate))` seconds.
    pub async fn enqueue(&self, jobs: Vec<Job>) -> Result<EnqueueReport, DispatchError> {
        if jobs.is_empty() {
            return Ok(EnqueueReport::default());
        }

        let mut buckets: HashMap<String, Vec<Job>> = HashMap::new();
        for job in jobs {
            buckets
                .entry(self.shards.shard_for(job.chat_id))
                .or_default()
                .push(job);
        }

        let now_ms = chrono::Utc::now().timestamp_millis();
        let mut report = EnqueueReport::default();

        for (shard, batch) in buckets {
            self.ensure_group(&shard).await?;

            let backlog = self.backlog(&shard).await.total();

            let rate = i64::from(self.config.global_rate_per_sec);
            let capacity = rate * i64::from(self.config.horizon_sec);
            let distinct_chats = batch
                .iter()
                .map(|j| j.chat_id)
                .collect::<HashSet<_>>()
                .len() as i64;
            let limit = capacity.max(2 * distinct_chats);

            if backlog > limit {
                let delay_sec = ((backlog - limit) as u64).div_ceil(rate as u64) as i64;
                let delay_sec = delay_sec.max(1);
                let score = now_ms + delay_sec * 1000;

                warn!(
                    shard = %shard,
                    backlog = %backlog,
                    limit = %limit,
                    delay_sec = %delay_sec,
                    count = batch.len(),
                    "Shard over admission limit, deferring batch to delayed set"
                );

                self.defer_batch(&shard, &batch, score).await?;
                report.delayed += batch.len();
                continue;
            }

            for job in &batch {
                self.append_ready(&shard, job).await?;
            }
            debug!(shard = %shard, count = batch.len(), "Appended jobs to ready stream");
            report.ready += batch.len();
        }

        Ok(report)
    }

    /// Append one job to a shard's ready stream, trimming approximately when
    /// a cap is configured.
    pub(crate) async fn append_ready(&self, shard: &str, job: &Job) -> Result<(), DispatchError> {
        let mut conn = self.redis.clone();
        let job_json = job.to_json()?;

        let mut cmd = redis::cmd("XADD");
        cmd.arg(keys::ready_stream(shard));
        if self.config.stream_max_len > 0 {
            cmd.arg("MAXLEN").arg("~").arg(self.config.stream_max_len);
        }
        cmd.arg("*").arg("job").arg(&job_json);

        let _: String = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    async fn defer_batch(&self, shard: &str, batch: &[Job], score: i64) -> Result<(), DispatchError> {
        let mut conn = self.redis.clone();
        let key = keys::delayed_set(shard);

        let mut members: Vec<(i64, String)> = Vec::with_capacity(batch.len());
        for job in batch {
            members.push((score, job.to_json()?));
        }

        let _: () = conn.zadd_multiple(&key, &members).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backlog_total() {
        let backlog = Backlog { ready: 3, delayed: 2, pending: 1 };
        assert_eq!(backlog.total(), 6);
    }

    #[test]
    fn test_enqueue_report_default() {
        let report = EnqueueReport::default();
        assert_eq!(report.ready, 0);
        assert_eq!(report.delayed, 0);
    }
}
