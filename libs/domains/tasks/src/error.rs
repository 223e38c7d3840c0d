use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskError {
    /// Field invariants failed; returned to the caller, no state change.
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Unified for missing rows and ownership mismatch so callers cannot
    /// probe other admins' tasks.
    #[error("Task not found")]
    NotFound,

    /// Wrong-state transition (edit/submit/delete outside the permitted status).
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),

    /// Scheduler or queue interaction failed.
    #[error("Scheduler error: {0}")]
    Scheduler(String),
}

pub type TaskResult<T> = Result<T, TaskError>;

impl From<sea_orm::DbErr> for TaskError {
    fn from(err: sea_orm::DbErr) -> Self {
        TaskError::Database(err.to_string())
    }
}

impl From<scheduler::SchedulerError> for TaskError {
    fn from(err: scheduler::SchedulerError) -> Self {
        match err {
            scheduler::SchedulerError::InvalidCron(msg) => TaskError::Validation(msg),
            other => TaskError::Scheduler(other.to_string()),
        }
    }
}
