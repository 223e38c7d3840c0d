use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dispatch::Purger;
use scheduler::Scheduler;
use tracing::info;

use crate::botmsg::{BOT_MSG_TYPE, parse_task_id};
use crate::error::{TaskError, TaskResult};

/// Fixed external id for a task's one-shot registration, used for dedup on
/// re-submit and for deletion.
pub fn schedule_external_id(task_id: i64) -> String {
    format!("schedule:{}", task_id)
}

/// The lifecycle service's view of the scheduler and queue.
///
/// Everything is `bot_msg`-typed; payloads are the canonical JSON of
/// [`BotMsgPayload`].
///
/// [`BotMsgPayload`]: crate::BotMsgPayload
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SchedulingPort: Send + Sync {
    /// Register a one-shot fire; idempotent on the external id.
    /// Returns false when the id was already scheduled.
    async fn schedule_at(
        &self,
        external_id: &str,
        payload: &str,
        at: DateTime<Utc>,
    ) -> TaskResult<bool>;

    /// Remove a one-shot registration. Returns whether one was removed.
    async fn cancel_one_shot(&self, external_id: &str) -> TaskResult<bool>;

    /// Register a cron entry; idempotent per (expression, task id).
    /// Returns false on a dedup skip.
    async fn register_cron(&self, expression: &str, payload: &str, task_id: i64)
    -> TaskResult<bool>;

    /// Unregister every cron entry matching (expression, task id).
    /// Returns the number removed; zero is not an error.
    async fn unregister_cron(&self, expression: &str, task_id: i64) -> TaskResult<usize>;

    /// Best-effort removal of the task's queue artefacts.
    async fn purge_queue(&self, task_id: i64) -> TaskResult<()>;

    /// Count and earliest fire of the durable one-shot set.
    async fn scheduled_overview(&self) -> TaskResult<(usize, Option<DateTime<Utc>>)>;
}

/// Production [`SchedulingPort`] over the scheduler and the queue purger.
pub struct DispatchScheduling {
    scheduler: Arc<Scheduler>,
    purger: Arc<Purger>,
}

impl DispatchScheduling {
    pub fn new(scheduler: Arc<Scheduler>, purger: Arc<Purger>) -> Self {
        Self { scheduler, purger }
    }

    async fn matching_entries(&self, expression: &str, task_id: i64) -> Vec<String> {
        self.scheduler
            .entries()
            .await
            .into_iter()
            .filter(|entry| {
                entry.expression == expression
                    && entry.task_type == BOT_MSG_TYPE
                    && parse_task_id(&entry.payload) == task_id
            })
            .map(|entry| entry.entry_id)
            .collect()
    }
}

#[async_trait]
impl SchedulingPort for DispatchScheduling {
    async fn schedule_at(
        &self,
        external_id: &str,
        payload: &str,
        at: DateTime<Utc>,
    ) -> TaskResult<bool> {
        Ok(self
            .scheduler
            .schedule_at(external_id, BOT_MSG_TYPE, payload, at)
            .await?)
    }

    async fn cancel_one_shot(&self, external_id: &str) -> TaskResult<bool> {
        Ok(self.scheduler.cancel_one_shot(external_id).await?)
    }

    async fn register_cron(
        &self,
        expression: &str,
        payload: &str,
        task_id: i64,
    ) -> TaskResult<bool> {
        if !self.matching_entries(expression, task_id).await.is_empty() {
            info!(task_id = %task_id, expression = %expression, "Cron entry already registered, skipping");
            return Ok(false);
        }

        self.scheduler
            .register_cron(expression, BOT_MSG_TYPE, payload.as_bytes())
            .await?;
        Ok(true)
    }

    async fn unregister_cron(&self, expression: &str, task_id: i64) -> TaskResult<usize> {
        let matches = self.matching_entries(expression, task_id).await;
        let mut removed = 0;

        for entry_id in matches {
            match self.scheduler.unregister_cron(&entry_id).await {
                Ok(()) => removed += 1,
                Err(e) => {
                    tracing::warn!(entry_id = %entry_id, error = %e, "Failed to unregister cron entry");
                }
            }
        }

        Ok(removed)
    }

    async fn purge_queue(&self, task_id: i64) -> TaskResult<()> {
        self.purger
            .purge_task(task_id)
            .await
            .map_err(|e| TaskError::Scheduler(e.to_string()))?;
        Ok(())
    }

    async fn scheduled_overview(&self) -> TaskResult<(usize, Option<DateTime<Utc>>)> {
        let overview = self.scheduler.scheduled_overview().await?;
        Ok((overview.count, overview.earliest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_external_id() {
        assert_eq!(schedule_external_id(42), "schedule:42");
    }
}
