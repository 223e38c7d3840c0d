//! Error types for scheduling operations.

use thiserror::Error;

/// Errors that can occur while scheduling or firing tasks.
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// Expression failed 5-field cron validation.
    #[error("Invalid cron expression: {0}")]
    InvalidCron(String),

    /// Unknown IANA timezone name.
    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    /// No handler registered for the task type.
    #[error("No handler registered for task type: {0}")]
    HandlerMissing(String),

    /// Cron entry id not found.
    #[error("Scheduler entry not found: {0}")]
    EntryNotFound(String),

    /// Redis connection or command error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// JSON serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A handler reported a processing failure.
    #[error("Handler error: {0}")]
    Handler(String),
}
