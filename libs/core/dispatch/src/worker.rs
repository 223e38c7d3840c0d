//! Per-shard send worker over a consumer group.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use tokio::sync::{Semaphore, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backoff::send_backoff;
use crate::config::DispatchConfig;
use crate::error::DispatchError;
use crate::job::Job;
use crate::keys;
use crate::limiter::RateLimiter;
use crate::registry::BotRegistry;
use crate::sender::{SendOutcome, Sender};

const READ_COUNT: usize = 10;
const READ_BLOCK_MS: usize = 1000;
const IDEMPOTENCY_TTL_SECS: i64 = 24 * 60 * 60;
const MIN_REINSERT_DELAY_MS: i64 = 100;
const NO_CANDIDATE_DELAY_MS: i64 = 500;

/// Receives fatal send failures so the task row can be failed out-of-band.
#[async_trait]
pub trait FailureHook: Send + Sync {
    async fn on_fatal(&self, task_id: i64, reason: &str);
}

/// Consumes one shard's ready stream, picks a bot within the rate gates,
/// sends, and settles each entry exactly once (ack + optional delayed
/// reinsert). Jobs are never lost: anything that cannot be sent now returns
/// through the delayed set and the mover.
pub struct Worker {
    redis: ConnectionManager,
    config: DispatchConfig,
    limiter: RateLimiter,
    sender: Arc<dyn Sender>,
    registry: Arc<dyn BotRegistry>,
    failure_hook: Option<Arc<dyn FailureHook>>,
    concurrency: Option<Arc<Semaphore>>,
    shard: String,
    consumer: String,
}

impl Worker {
    pub fn new(
        redis: ConnectionManager,
        config: DispatchConfig,
        limiter: RateLimiter,
        sender: Arc<dyn Sender>,
        registry: Arc<dyn BotRegistry>,
        shard: impl Into<String>,
    ) -> Self {
        Self {
            redis,
            config,
            limiter,
            sender,
            registry,
            failure_hook: None,
            concurrency: None,
            shard: shard.into(),
            consumer: format!("c-{}", Uuid::new_v4()),
        }
    }

    /// Report fatal send outcomes through the given hook.
    pub fn with_failure_hook(mut self, hook: Arc<dyn FailureHook>) -> Self {
        self.failure_hook = Some(hook);
        self
    }

    /// Bound entry processing with a semaphore shared across shard workers.
    pub fn with_concurrency_limit(mut self, semaphore: Arc<Semaphore>) -> Self {
        self.concurrency = Some(semaphore);
        self
    }

    pub fn shard(&self) -> &str {
        &self.shard
    }

    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    /// Run the worker loop until shutdown is signalled.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        info!(shard = %self.shard, consumer = %self.consumer, "Worker started");

        self.ensure_group().await;

        // Adopt whatever a previous consumer of this shard left unacked.
        match self.claim_pending(0).await {
            Ok(claimed) if claimed > 0 => {
                info!(shard = %self.shard, count = claimed, "Claimed pending entries on startup");
            }
            Ok(_) => {}
            Err(e) => warn!(shard = %self.shard, error = %e, "Startup claim failed"),
        }

        let claim_interval = Duration::from_millis(self.config.claim_idle_ms.max(1000));
        let mut last_claim = std::time::Instant::now();

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.run_once().await {
                Ok(_) => {}
                Err(e) if e.is_nogroup_error() => {
                    warn!(shard = %self.shard, "Consumer group missing, recreating");
                    self.ensure_group().await;
                }
                Err(e) if e.is_connection_error() => {
                    warn!(shard = %self.shard, error = %e, "Store error in worker loop, backing off");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                Err(e) => {
                    warn!(shard = %self.shard, error = %e, "Worker batch failed");
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
            }

            if last_claim.elapsed() >= claim_interval {
                if let Err(e) = self.claim_pending(self.config.claim_idle_ms).await {
                    debug!(shard = %self.shard, error = %e, "Stale claim failed");
                }
                last_claim = std::time::Instant::now();
            }
        }

        info!(shard = %self.shard, "Worker stopped");
    }

    /// Read and settle one batch (pending first, then new entries).
    /// Returns how many entries were settled.
    pub async fn run_once(&self) -> Result<usize, DispatchError> {
        let pending = self.read_batch("0", None).await?;
        let fresh = self.read_batch(">", Some(READ_BLOCK_MS)).await?;

        let mut handled = 0;
        for (entry_id, parsed) in pending.into_iter().chain(fresh) {
            let _permit = match &self.concurrency {
                Some(semaphore) => Some(semaphore.acquire().await.map_err(|_| {
                    DispatchError::Config("worker concurrency semaphore closed".to_string())
                })?),
                None => None,
            };

            match parsed {
                Ok(job) => {
                    self.handle_job(&entry_id, job).await;
                }
                Err(e) => {
                    // Poison entries are settled so they cannot clog the PEL.
                    warn!(shard = %self.shard, entry_id = %entry_id, error = %e, "Unparseable entry, acking");
                    self.ack(&entry_id).await;
                }
            }
            handled += 1;
        }

        Ok(handled)
    }

    async fn ensure_group(&self) {
        let mut conn = self.redis.clone();
        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(keys::ready_stream(&self.shard))
            .arg(keys::consumer_group(&self.shard))
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!(shard = %self.shard, "Created consumer group"),
            Err(e) if e.to_string().contains("BUSYGROUP") => {}
            Err(e) => warn!(shard = %self.shard, error = %e, "Consumer group create failed"),
        }
    }

    async fn read_batch(
        &self,
        cursor: &str,
        block_ms: Option<usize>,
    ) -> Result<Vec<(String, Result<Job, DispatchError>)>, DispatchError> {
        let mut conn = self.redis.clone();

        let mut opts = StreamReadOptions::default()
            .group(keys::consumer_group(&self.shard), &self.consumer)
            .count(READ_COUNT);
        if let Some(ms) = block_ms {
            opts = opts.block(ms);
        }

        let reply: StreamReadReply = match conn
            .xread_options(&[keys::ready_stream(&self.shard)], &[cursor], &opts)
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                // BLOCK timeout surfaces as a nil reply; treat as empty batch.
                let err_str = e.to_string().to_lowercase();
                if err_str.contains("timed out")
                    || err_str.contains("timeout")
                    || err_str.contains("nil")
                    || (err_str.contains("response") && err_str.contains("type"))
                {
                    return Ok(vec![]);
                }
                return Err(DispatchError::Redis(e));
            }
        };

        let mut entries = Vec::new();
        for stream_key in reply.keys {
            for message in stream_key.ids {
                let parsed = Self::parse_job(&message.map);
                entries.push((message.id, parsed));
            }
        }
        Ok(entries)
    }

    fn parse_job(map: &HashMap<String, redis::Value>) -> Result<Job, DispatchError> {
        let value = map
            .get("job")
            .ok_or_else(|| DispatchError::JobParsing("missing 'job' field".to_string()))?;

        let raw = match value {
            redis::Value::BulkString(bytes) => String::from_utf8_lossy(bytes).to_string(),
            redis::Value::SimpleString(s) => s.clone(),
            _ => return Err(DispatchError::JobParsing("invalid 'job' field type".to_string())),
        };

        Job::from_json(&raw).map_err(|e| DispatchError::JobParsing(e.to_string()))
    }

    async fn handle_job(&self, entry_id: &str, mut job: Job) {
        // A deleted task leaves a tombstone; its jobs are dropped unsent.
        if job.task_id > 0 && self.is_cancelled(job.task_id).await {
            info!(shard = %self.shard, jid = %job.jid, task_id = %job.task_id, "Task cancelled, dropping job");
            self.ack(entry_id).await;
            return;
        }

        if job.bot_candidates.is_empty() {
            job.bot_candidates = self.registry.candidates(job.chat_id).await;
        }

        let now_ms = chrono::Utc::now().timestamp_millis();

        let mut chosen: Option<String> = None;
        let mut min_wait_ms = i64::MAX;
        for bot in &job.bot_candidates {
            let gap = self.limiter.check_chat_gap(bot, job.chat_id, now_ms).await;
            if !gap.allow {
                min_wait_ms = min_wait_ms.min(gap.wait_ms);
                continue;
            }
            let global = self.limiter.try_acquire_global(bot, now_ms).await;
            if !global.allow {
                min_wait_ms = min_wait_ms.min(global.wait_ms);
                continue;
            }
            chosen = Some(bot.clone());
            break;
        }

        let Some(bot) = chosen else {
            // No sendable bot right now; send the job back through the mover.
            let mut wait_ms = if min_wait_ms == i64::MAX || min_wait_ms <= 0 {
                NO_CANDIDATE_DELAY_MS
            } else {
                min_wait_ms
            };
            wait_ms = wait_ms.max(MIN_REINSERT_DELAY_MS);

            job.attempts += 1;
            debug!(
                shard = %self.shard,
                jid = %job.jid,
                wait_ms = %wait_ms,
                candidates = job.bot_candidates.len(),
                "No bot available, delaying job"
            );
            self.reinsert_delayed(&job, now_ms + wait_ms).await;
            self.ack(entry_id).await;
            return;
        };

        match self.sender.send(&bot, job.chat_id, &job.payload).await {
            SendOutcome::Ok { provider_msg_id } => {
                if !job.idempotency_key.is_empty() {
                    self.mark_idempotent(&job.idempotency_key, &provider_msg_id).await;
                }
                self.limiter
                    .set_chat_gap(&bot, job.chat_id, now_ms + self.config.per_chat_min_gap_ms)
                    .await;
                debug!(shard = %self.shard, jid = %job.jid, bot = %bot, "Sent");
                self.ack(entry_id).await;
            }
            SendOutcome::TooManyRequests { retry_after_secs } => {
                let retry_after = i64::from(retry_after_secs.max(1));
                let resume_at = now_ms + retry_after * 1000;

                info!(
                    shard = %self.shard,
                    jid = %job.jid,
                    bot = %bot,
                    retry_after_secs = %retry_after,
                    "Provider throttled, delaying job"
                );

                job.attempts += 1;
                self.reinsert_delayed(&job, resume_at).await;
                // Keep this chat off the bot until the throttle lifts.
                self.limiter.set_chat_gap(&bot, job.chat_id, resume_at).await;
                self.ack(entry_id).await;
            }
            SendOutcome::Retryable => {
                job.attempts += 1;
                let delay = send_backoff(job.attempts);

                info!(
                    shard = %self.shard,
                    jid = %job.jid,
                    bot = %bot,
                    attempts = %job.attempts,
                    delay_ms = %delay.as_millis(),
                    "Transient send failure, delaying job"
                );

                self.reinsert_delayed(&job, now_ms + delay.as_millis() as i64).await;
                self.ack(entry_id).await;
            }
            SendOutcome::Fatal { reason } => {
                warn!(
                    shard = %self.shard,
                    jid = %job.jid,
                    bot = %bot,
                    task_id = %job.task_id,
                    reason = %reason,
                    "Fatal send failure, dropping job"
                );

                if job.task_id > 0 {
                    if let Some(hook) = &self.failure_hook {
                        hook.on_fatal(job.task_id, &reason).await;
                    }
                }
                self.ack(entry_id).await;
            }
        }
    }

    async fn is_cancelled(&self, task_id: i64) -> bool {
        let mut conn = self.redis.clone();
        conn.exists(keys::cancelled_task(task_id)).await.unwrap_or(false)
    }

    async fn mark_idempotent(&self, key: &str, provider_msg_id: &str) {
        let mut conn = self.redis.clone();
        let result: Result<(), redis::RedisError> = redis::cmd("SET")
            .arg(keys::idempotency_marker(key))
            .arg(provider_msg_id)
            .arg("NX")
            .arg("EX")
            .arg(IDEMPOTENCY_TTL_SECS)
            .query_async(&mut conn)
            .await;

        if let Err(e) = result {
            warn!(key = %key, error = %e, "Failed to write idempotency marker");
        }
    }

    async fn reinsert_delayed(&self, job: &Job, score_ms: i64) {
        let mut conn = self.redis.clone();
        let member = match job.to_json() {
            Ok(member) => member,
            Err(e) => {
                warn!(jid = %job.jid, error = %e, "Failed to serialize job for reinsert");
                return;
            }
        };

        let result: Result<i64, redis::RedisError> =
            conn.zadd(keys::delayed_set(&self.shard), member, score_ms).await;
        if let Err(e) = result {
            warn!(jid = %job.jid, error = %e, "Failed to reinsert job into delayed set");
        }
    }

    async fn ack(&self, entry_id: &str) {
        let mut conn = self.redis.clone();
        let result: Result<i64, redis::RedisError> = conn
            .xack(
                keys::ready_stream(&self.shard),
                keys::consumer_group(&self.shard),
                &[entry_id],
            )
            .await;
        if let Err(e) = result {
            warn!(shard = %self.shard, entry_id = %entry_id, error = %e, "Failed to ack entry");
        }
    }

    /// Claim entries pending longer than `min_idle_ms` over to this consumer
    /// (XAUTOCLAIM). With 0 it adopts everything, which is what a fresh
    /// consumer does on startup. Claimed entries surface on the next
    /// pending read.
    async fn claim_pending(&self, min_idle_ms: u64) -> Result<usize, DispatchError> {
        let mut conn = self.redis.clone();
        let mut total_claimed = 0;
        let mut start_id = "0-0".to_string();

        loop {
            let result: redis::Value = redis::cmd("XAUTOCLAIM")
                .arg(keys::ready_stream(&self.shard))
                .arg(keys::consumer_group(&self.shard))
                .arg(&self.consumer)
                .arg(min_idle_ms)
                .arg(&start_id)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .unwrap_or(redis::Value::Nil);

            // Reply shape: [next-start-id, [[entry-id, fields], ...], [deleted-ids]]
            let redis::Value::Array(parts) = &result else { break };
            if parts.len() < 2 {
                break;
            }

            let next = match &parts[0] {
                redis::Value::BulkString(bytes) => String::from_utf8_lossy(bytes).to_string(),
                redis::Value::SimpleString(s) => s.clone(),
                _ => break,
            };

            if let redis::Value::Array(entries) = &parts[1] {
                total_claimed += entries.len();
                if entries.is_empty() && next == "0-0" {
                    break;
                }
            } else {
                break;
            }

            if next == "0-0" {
                break;
            }
            start_id = next;
        }

        Ok(total_claimed)
    }
}
