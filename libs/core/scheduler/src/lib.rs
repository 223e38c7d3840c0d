//! Scheduler - Cron and One-Shot Task Scheduling
//!
//! Converts durable task registrations into handler fires:
//!
//! - `CronEngine`: validates standard 5-field cron expressions and computes
//!   next fire times in one fixed IANA zone
//! - `JobHandler`: the extension point; handlers are registered by task type
//! - `Scheduler`: owns cron entries (one tokio task each) and a durable
//!   one-shot set in Redis whose due members a tick loop promotes to fires
//!
//! Handler failures are logged and absorbed; nothing escapes the fire loops.
//!
//! ```text
//! register_cron(expr, type, payload) ──┐
//!                                      ├─> fire ──> handlers[type].process(payload)
//! schedule_at(id, type, payload, at) ──┘      (one-shot members survive restarts
//!                                              in the sched:oneshot sorted set)
//! ```

mod cron;
mod error;
mod handler;
mod scheduler;

pub use self::cron::{CronEngine, DEFAULT_TIMEZONE, preset_expressions};
pub use self::error::SchedulerError;
pub use self::handler::JobHandler;
pub use self::scheduler::{CronEntrySnapshot, ONESHOT_SET_KEY, Scheduler, ScheduledOverview};

/// Result type alias for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;
