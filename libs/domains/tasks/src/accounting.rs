//! Execution accounting: task row transitions driven by fire outcomes.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use scheduler::{CronEngine, JobHandler, SchedulerError};
use tracing::{debug, info, warn};

use crate::botmsg::{parse_expire_time, parse_task_id};
use crate::error::TaskResult;
use crate::models::{Task, TaskChanges, TaskStatus, TriggerType};
use crate::repository::TaskRepository;
use crate::scheduling::SchedulingPort;

/// Backoff before a failed task's next execution attempt.
///
/// 1m, 2m, 4m, 8m, 16m, 32m, capped at one hour.
pub fn task_backoff(retry_count: i32) -> Duration {
    if retry_count <= 0 {
        return Duration::minutes(1);
    }
    let shift = (retry_count - 1).clamp(0, 5) as u32;
    let backoff = Duration::minutes(1i64 << shift);
    backoff.min(Duration::hours(1))
}

/// Wraps a fire handler with task row accounting.
///
/// Around every fire whose payload carries a task id:
/// - pre-exec expiry: an expired (or expiry-less) cron task is completed and
///   its cron entry unregistered before the handler runs; a schedule task
///   with an unparseable expiry fails
/// - the row enters Running with `last_executed_at = now`
/// - success/failure transitions follow the trigger type (one-shot tasks
///   complete; cron tasks stay armed and recompute `next_execute_at`)
pub struct ExecutionTracker<R: TaskRepository> {
    inner: Arc<dyn JobHandler>,
    repository: Arc<R>,
    scheduling: Arc<dyn SchedulingPort>,
    engine: CronEngine,
}

impl<R: TaskRepository> ExecutionTracker<R> {
    pub fn new(
        inner: Arc<dyn JobHandler>,
        repository: Arc<R>,
        scheduling: Arc<dyn SchedulingPort>,
        engine: CronEngine,
    ) -> Self {
        Self {
            inner,
            repository,
            scheduling,
            engine,
        }
    }

    /// Returns true when the fire should be dropped (task expired).
    async fn expired_before_fire(&self, task: &Task, payload: &[u8]) -> TaskResult<bool> {
        if task.trigger_type != TriggerType::Cron {
            return Ok(false);
        }

        let expire = parse_expire_time(payload).or(task.expire_time);
        let Some(expire) = expire else {
            // A cron task without a cutoff is a data anomaly; retire it.
            self.expire_cleanup(task, "missing expire time").await?;
            return Ok(true);
        };

        if Utc::now() >= expire {
            self.expire_cleanup(task, "task expired").await?;
            return Ok(true);
        }
        Ok(false)
    }

    async fn expire_cleanup(&self, task: &Task, message: &str) -> TaskResult<()> {
        let now = Utc::now();

        let changes = if task.trigger_type == TriggerType::Cron {
            // An exhausted series is a success, not a failure.
            TaskChanges {
                status: Some(TaskStatus::Completed),
                error_message: Some(String::new()),
                next_execute_at: Some(None),
                last_executed_at: Some(Some(now)),
                ..Default::default()
            }
        } else {
            TaskChanges {
                status: Some(TaskStatus::Failed),
                error_message: Some(message.to_string()),
                next_execute_at: Some(None),
                last_executed_at: Some(Some(now)),
                ..Default::default()
            }
        };

        self.repository.apply(task.id, changes).await?;

        if task.trigger_type == TriggerType::Cron && !task.cron_expression.is_empty() {
            let removed = self
                .scheduling
                .unregister_cron(&task.cron_expression, task.id)
                .await?;
            info!(task_id = %task.id, removed = %removed, reason = %message, "Expired cron task retired");
        }

        Ok(())
    }

    async fn enter_running(&self, task_id: i64) -> TaskResult<()> {
        self.repository
            .apply(
                task_id,
                TaskChanges {
                    status: Some(TaskStatus::Running),
                    last_executed_at: Some(Some(Utc::now())),
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    async fn record_success(&self, task: &Task) -> TaskResult<()> {
        let now = Utc::now();

        let mut changes = TaskChanges {
            execute_count: Some(task.execute_count + 1),
            retry_count: Some(0),
            error_message: Some(String::new()),
            last_executed_at: Some(Some(now)),
            ..Default::default()
        };

        match task.trigger_type {
            TriggerType::Schedule => {
                changes.status = Some(TaskStatus::Completed);
                changes.next_execute_at = Some(None);
            }
            TriggerType::Cron => {
                // The series stays armed; the scheduler owns the next fire.
                changes.status = Some(TaskStatus::Running);
                changes.next_execute_at = match self
                    .engine
                    .next_after(&task.cron_expression, now)
                {
                    Ok(next) => Some(Some(next)),
                    Err(e) => {
                        warn!(task_id = %task.id, error = %e, "Failed to recompute next execution");
                        None
                    }
                };
            }
        }

        self.repository.apply(task.id, changes).await?;
        Ok(())
    }
}

#[async_trait]
impl<R: TaskRepository + 'static> JobHandler for ExecutionTracker<R> {
    fn task_type(&self) -> &'static str {
        self.inner.task_type()
    }

    async fn process(&self, payload: &[u8]) -> Result<(), SchedulerError> {
        let task_id = parse_task_id(payload);
        if task_id == 0 {
            return self.inner.process(payload).await;
        }

        let task = match self.repository.find_by_id(task_id).await {
            Ok(task) => task,
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Task row read failed, firing without accounting");
                None
            }
        };

        let Some(task) = task else {
            debug!(task_id = %task_id, "No live task row for fire");
            return self.inner.process(payload).await;
        };

        match self.expired_before_fire(&task, payload).await {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(e) => warn!(task_id = %task_id, error = %e, "Expiry check failed"),
        }

        if let Err(e) = self.enter_running(task.id).await {
            warn!(task_id = %task_id, error = %e, "Failed to mark task running");
        }

        let result = self.inner.process(payload).await;

        match &result {
            Ok(()) => {
                if let Err(e) = self.record_success(&task).await {
                    warn!(task_id = %task_id, error = %e, "Success accounting failed");
                }
            }
            Err(fire_err) => {
                if let Err(e) =
                    record_failure(self.repository.as_ref(), &task, &fire_err.to_string()).await
                {
                    warn!(task_id = %task_id, error = %e, "Failure accounting failed");
                }
            }
        }

        result
    }
}

/// Move a task row to Failed and arm the retry backoff.
///
/// Shared between fire-level failures (tracker) and fatal send outcomes
/// (worker hook).
pub async fn record_failure<R: TaskRepository>(
    repository: &R,
    task: &Task,
    reason: &str,
) -> TaskResult<()> {
    let now = Utc::now();
    let retry_count = task.retry_count + 1;

    let next_execute_at = match task.trigger_type {
        TriggerType::Schedule => None,
        TriggerType::Cron => Some(now + task_backoff(retry_count)),
    };

    repository
        .apply(
            task.id,
            TaskChanges {
                status: Some(TaskStatus::Failed),
                retry_count: Some(retry_count),
                error_message: Some(reason.to_string()),
                last_executed_at: Some(Some(now)),
                next_execute_at: Some(next_execute_at),
                ..Default::default()
            },
        )
        .await?;

    info!(task_id = %task.id, retry_count = %retry_count, reason = %reason, "Task failed");
    Ok(())
}

/// Marks task rows failed when a worker hits a fatal send outcome.
pub struct TaskFailureHook<R: TaskRepository> {
    repository: Arc<R>,
}

impl<R: TaskRepository> TaskFailureHook<R> {
    pub fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl<R: TaskRepository + 'static> dispatch::FailureHook for TaskFailureHook<R> {
    async fn on_fatal(&self, task_id: i64, reason: &str) {
        let task = match self.repository.find_by_id(task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                debug!(task_id = %task_id, "Fatal outcome for unknown task");
                return;
            }
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Task read failed in fatal hook");
                return;
            }
        };

        if let Err(e) = record_failure(self.repository.as_ref(), &task, reason).await {
            warn!(task_id = %task_id, error = %e, "Fatal accounting failed");
        }
    }
}
