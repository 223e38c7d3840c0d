//! The handler extension point.

use async_trait::async_trait;

use crate::error::SchedulerError;

/// Processes fires for one task type.
///
/// Implementations are registered with the [`Scheduler`] and invoked with the
/// payload captured at registration time. Payload bytes are opaque to the
/// scheduler; by convention they carry JSON.
///
/// [`Scheduler`]: crate::Scheduler
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Process one fire. Errors are logged by the dispatch loop and absorbed;
    /// durable retry policy lives with the task rows, not here.
    async fn process(&self, payload: &[u8]) -> Result<(), SchedulerError>;

    /// Task type this handler serves, e.g. `"bot_msg"`.
    fn task_type(&self) -> &'static str;
}
