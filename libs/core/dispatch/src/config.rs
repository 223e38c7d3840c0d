//! Queue and rate-limit configuration.

use core_config::{ConfigError, FromEnv, env_parse_or};

/// Configuration for the dispatch queue and its rate limits.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Number of shards; each owns a ready stream, delayed set, and consumer group.
    pub shard_count: u32,

    /// Per-bot global rate ceiling (fixed 1-second window).
    pub global_rate_per_sec: u32,

    /// Minimum gap between two sends into the same chat by the same bot.
    pub per_chat_min_gap_ms: i64,

    /// Max delayed entries promoted per mover tick.
    pub mover_batch: usize,

    /// Mover tick interval in milliseconds.
    pub mover_interval_ms: u64,

    /// Backpressure horizon in seconds.
    pub horizon_sec: u32,

    /// Approximate cap for ready-stream trimming (0 = unbounded).
    pub stream_max_len: i64,

    /// Per-process worker parallelism across shards.
    pub worker_concurrency: usize,

    /// Pending entries idle longer than this are reclaimed by the running consumer.
    pub claim_idle_ms: u64,
}

impl DispatchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shard_count(mut self, count: u32) -> Self {
        self.shard_count = count.max(1);
        self
    }

    pub fn with_global_rate_per_sec(mut self, rate: u32) -> Self {
        self.global_rate_per_sec = rate.max(1);
        self
    }

    pub fn with_per_chat_min_gap_ms(mut self, gap_ms: i64) -> Self {
        self.per_chat_min_gap_ms = gap_ms;
        self
    }

    pub fn with_mover_batch(mut self, batch: usize) -> Self {
        self.mover_batch = batch.max(1);
        self
    }

    pub fn with_mover_interval_ms(mut self, interval_ms: u64) -> Self {
        self.mover_interval_ms = interval_ms.max(1);
        self
    }

    pub fn with_horizon_sec(mut self, horizon: u32) -> Self {
        self.horizon_sec = horizon.max(1);
        self
    }

    pub fn with_stream_max_len(mut self, max_len: i64) -> Self {
        self.stream_max_len = max_len;
        self
    }

    pub fn with_worker_concurrency(mut self, concurrency: usize) -> Self {
        self.worker_concurrency = concurrency.max(1);
        self
    }

    pub fn with_claim_idle_ms(mut self, idle_ms: u64) -> Self {
        self.claim_idle_ms = idle_ms;
        self
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            shard_count: 16,
            global_rate_per_sec: 25,
            per_chat_min_gap_ms: 1000,
            mover_batch: 200,
            mover_interval_ms: 100,
            horizon_sec: 120,
            stream_max_len: 0,
            worker_concurrency: 10,
            claim_idle_ms: 30_000,
        }
    }
}

/// Load DispatchConfig from `DISPATCH_*` environment variables, falling back
/// to the defaults for anything unset.
impl FromEnv for DispatchConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        Ok(Self {
            shard_count: env_parse_or("DISPATCH_SHARD_COUNT", defaults.shard_count)?.max(1),
            global_rate_per_sec: env_parse_or(
                "DISPATCH_GLOBAL_RATE_PER_SEC",
                defaults.global_rate_per_sec,
            )?
            .max(1),
            per_chat_min_gap_ms: env_parse_or(
                "DISPATCH_PER_CHAT_MIN_GAP_MS",
                defaults.per_chat_min_gap_ms,
            )?,
            mover_batch: env_parse_or("DISPATCH_MOVER_BATCH", defaults.mover_batch)?.max(1),
            mover_interval_ms: env_parse_or(
                "DISPATCH_MOVER_INTERVAL_MS",
                defaults.mover_interval_ms,
            )?
            .max(1),
            horizon_sec: env_parse_or("DISPATCH_HORIZON_SEC", defaults.horizon_sec)?.max(1),
            stream_max_len: env_parse_or("DISPATCH_STREAM_MAX_LEN", defaults.stream_max_len)?,
            worker_concurrency: env_parse_or(
                "DISPATCH_WORKER_CONCURRENCY",
                defaults.worker_concurrency,
            )?
            .max(1),
            claim_idle_ms: env_parse_or("DISPATCH_CLAIM_IDLE_MS", defaults.claim_idle_ms)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DispatchConfig::default();

        assert_eq!(config.shard_count, 16);
        assert_eq!(config.global_rate_per_sec, 25);
        assert_eq!(config.per_chat_min_gap_ms, 1000);
        assert_eq!(config.mover_batch, 200);
        assert_eq!(config.mover_interval_ms, 100);
        assert_eq!(config.horizon_sec, 120);
        assert_eq!(config.stream_max_len, 0);
        assert_eq!(config.worker_concurrency, 10);
        assert_eq!(config.claim_idle_ms, 30_000);
    }

    #[test]
    fn test_builder() {
        let config = DispatchConfig::new()
            .with_shard_count(4)
            .with_global_rate_per_sec(2)
            .with_mover_interval_ms(50)
            .with_stream_max_len(10_000);

        assert_eq!(config.shard_count, 4);
        assert_eq!(config.global_rate_per_sec, 2);
        assert_eq!(config.mover_interval_ms, 50);
        assert_eq!(config.stream_max_len, 10_000);
    }

    #[test]
    fn test_builder_floors_zero_values() {
        let config = DispatchConfig::new()
            .with_shard_count(0)
            .with_global_rate_per_sec(0)
            .with_worker_concurrency(0);

        assert_eq!(config.shard_count, 1);
        assert_eq!(config.global_rate_per_sec, 1);
        assert_eq!(config.worker_concurrency, 1);
    }
}
