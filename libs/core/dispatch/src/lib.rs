//! Dispatch - Sharded Rate-Limited Send Queue over Redis Streams
//!
//! Moves per-(chat, message) send jobs from producers to senders while
//! honoring per-bot rate ceilings and per-chat minimum gaps:
//!
//! - Sharded topology: each shard owns a ready stream, a delayed sorted
//!   set, and a consumer group
//! - Backpressure-aware producer: over-limit batches are future-dated into
//!   the delayed set instead of flooding the stream
//! - Mover: per-shard coordinator promoting fire-time-reached jobs from
//!   the delayed set into the ready stream
//! - Worker: consumer-group reader that picks a bot, sends, and
//!   acks/retries/delays with an idempotency marker on success
//! - Rate limiter: fixed-window per-bot counter plus per-chat
//!   next-allowed-at gate, both fail-open on store outages
//!
//! # Architecture
//!
//! ```text
//! Producer.enqueue(jobs)
//!   ├─ backlog ≤ limit → XADD ready:<shard>
//!   └─ backlog > limit → ZADD delayed:<shard> (future-dated)
//! Mover (per shard, every mover_interval_ms)
//!   └─ due members of delayed:<shard> → XADD ready:<shard>
//! Worker (per shard, consumer group cg:<shard>)
//!   └─ XREADGROUP → pick bot (gap + rate gates) → Sender
//!       ├─ Ok               → SETNX idem:<key>, bump chat gap, XACK
//!       ├─ TooManyRequests  → delayed reinsert @ retry_after, XACK
//!       ├─ Retryable        → delayed reinsert @ backoff(attempts), XACK
//!       └─ Fatal            → XACK, report through FailureHook
//! ```

mod backoff;
mod config;
mod error;
mod job;
pub mod keys;
mod limiter;
mod mover;
mod producer;
mod purge;
mod registry;
mod sender;
mod shard;
mod worker;

pub use backoff::send_backoff;
pub use config::DispatchConfig;
pub use error::DispatchError;
pub use job::{Job, idempotency_key};
pub use limiter::{Gate, RateLimiter};
pub use mover::Mover;
pub use producer::{Backlog, EnqueueReport, Producer};
pub use purge::{PurgeReport, Purger};
pub use registry::{BotRegistry, StaticBotRegistry};
pub use sender::{SendOutcome, Sender};
pub use shard::ShardMap;
pub use worker::{FailureHook, Worker};

/// Result type alias for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;
