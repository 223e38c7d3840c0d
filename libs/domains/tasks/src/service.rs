use std::sync::Arc;

use chrono::{DateTime, Utc};
use scheduler::CronEngine;
use tracing::{info, instrument, warn};
use validator::Validate;

use crate::botmsg::{BOT_MSG_TYPE, BotMsgPayload};
use crate::error::{TaskError, TaskResult};
use crate::models::{
    CreateTask, Task, TaskChanges, TaskFilter, TaskStats, TaskStatus, TriggerType, UpdateTask,
};
use crate::repository::TaskRepository;
use crate::scheduling::{SchedulingPort, schedule_external_id};

/// Task lifecycle service.
///
/// Owns the Draft → Ready transition (validation + scheduler registration)
/// and the delete purge. Execution-driven transitions live in
/// [`accounting`](crate::accounting).
///
/// Every operation is scoped to the owning `admin_id`; rows owned by someone
/// else surface as [`TaskError::NotFound`].
pub struct TaskService<R: TaskRepository> {
    repository: Arc<R>,
    scheduling: Arc<dyn SchedulingPort>,
    engine: CronEngine,
}

impl<R: TaskRepository> TaskService<R> {
    pub fn new(repository: Arc<R>, scheduling: Arc<dyn SchedulingPort>, engine: CronEngine) -> Self {
        Self {
            repository,
            scheduling,
            engine,
        }
    }

    /// Create a task in Draft.
    #[instrument(skip(self, input), fields(task_name = %input.task_name))]
    pub async fn create(&self, admin_id: i64, mut input: CreateTask) -> TaskResult<Task> {
        input
            .validate()
            .map_err(|e| TaskError::Validation(e.to_string()))?;

        match input.trigger_type {
            TriggerType::Schedule => {
                if input.schedule_time.is_none() {
                    return Err(TaskError::Validation(
                        "schedule tasks require a schedule time".to_string(),
                    ));
                }
                // A one-shot task carries no cron rule.
                input.cron_expression = String::new();
            }
            TriggerType::Cron => {
                if input.cron_expression.is_empty() {
                    return Err(TaskError::Validation(
                        "cron tasks require a cron expression".to_string(),
                    ));
                }
                self.engine.validate(&input.cron_expression)?;
                if input.expire_time.is_none() {
                    return Err(TaskError::Validation(
                        "cron tasks require an expire time".to_string(),
                    ));
                }
                input.schedule_time = None;
            }
        }

        self.repository.create(admin_id, input).await
    }

    /// Overwrite a Draft task's editable fields.
    #[instrument(skip(self, input), fields(task_id = %input.id))]
    pub async fn update(&self, admin_id: i64, mut input: UpdateTask) -> TaskResult<Task> {
        input
            .validate()
            .map_err(|e| TaskError::Validation(e.to_string()))?;

        let task = self
            .repository
            .find(input.id, admin_id)
            .await?
            .ok_or(TaskError::NotFound)?;

        if task.status != TaskStatus::Draft {
            return Err(TaskError::Conflict(
                "only draft tasks can be edited".to_string(),
            ));
        }

        match input.trigger_type {
            TriggerType::Schedule => {
                if input.schedule_time.is_none() {
                    return Err(TaskError::Validation(
                        "schedule tasks require a schedule time".to_string(),
                    ));
                }
                input.cron_expression = String::new();
            }
            TriggerType::Cron => {
                if input.cron_expression.is_empty() {
                    return Err(TaskError::Validation(
                        "cron tasks require a cron expression".to_string(),
                    ));
                }
                self.engine.validate(&input.cron_expression)?;
                if input.expire_time.is_none() {
                    return Err(TaskError::Validation(
                        "cron tasks require an expire time".to_string(),
                    ));
                }
                input.schedule_time = None;
            }
        }

        let max_retry = if input.max_retry_count > 0 {
            input.max_retry_count
        } else {
            3
        };

        self.repository
            .apply(
                task.id,
                TaskChanges {
                    task_name: Some(input.task_name),
                    description: Some(input.description),
                    trigger_type: Some(input.trigger_type),
                    group_ids: Some(input.group_ids),
                    message_ids: Some(input.message_ids),
                    schedule_time: Some(input.schedule_time),
                    expire_time: Some(input.expire_time),
                    cron_expression: Some(input.cron_expression),
                    cron_pattern_type: Some(input.cron_pattern_type),
                    cron_config: Some(input.cron_config),
                    max_retry_count: Some(max_retry),
                    ..Default::default()
                },
            )
            .await
    }

    /// Submit a Draft task: validate times, register with the scheduler,
    /// and move the row to Ready with its first `next_execute_at`.
    #[instrument(skip(self), fields(task_id = %id))]
    pub async fn submit(&self, admin_id: i64, id: i64) -> TaskResult<Task> {
        let task = self
            .repository
            .find(id, admin_id)
            .await?
            .ok_or(TaskError::NotFound)?;

        if task.status != TaskStatus::Draft {
            return Err(TaskError::Conflict(
                "only draft tasks can be submitted".to_string(),
            ));
        }

        let now = Utc::now();
        let next_execute_at = match task.trigger_type {
            TriggerType::Schedule => self.validate_schedule_submit(&task, now)?,
            TriggerType::Cron => self.validate_cron_submit(&task, now)?,
        };

        let payload = BotMsgPayload {
            message_ids: task.message_ids.clone(),
            group_ids: task.group_ids.clone(),
            msg_type: BOT_MSG_TYPE.to_string(),
            task_id: task.id,
            expire_time: task
                .expire_time
                .map(|t| t.to_rfc3339())
                .unwrap_or_default(),
        };
        let payload_json = payload
            .to_json()
            .map_err(|e| TaskError::Scheduler(e.to_string()))?;

        match task.trigger_type {
            TriggerType::Schedule => {
                self.scheduling
                    .schedule_at(&schedule_external_id(task.id), &payload_json, next_execute_at)
                    .await?;
            }
            TriggerType::Cron => {
                self.scheduling
                    .register_cron(&task.cron_expression, &payload_json, task.id)
                    .await?;
            }
        }

        let submitted = self
            .repository
            .apply(
                task.id,
                TaskChanges {
                    status: Some(TaskStatus::Ready),
                    next_execute_at: Some(Some(next_execute_at)),
                    ..Default::default()
                },
            )
            .await?;

        info!(task_id = %task.id, next_execute_at = %next_execute_at, "Task submitted");
        Ok(submitted)
    }

    /// Soft-delete a task and purge its scheduler and queue artefacts.
    #[instrument(skip(self), fields(task_id = %id))]
    pub async fn delete(&self, admin_id: i64, id: i64) -> TaskResult<()> {
        let task = self
            .repository
            .find(id, admin_id)
            .await?
            .ok_or(TaskError::NotFound)?;

        if !task.status.is_deletable() {
            return Err(TaskError::Conflict(
                "only draft, ready, and failed tasks can be deleted".to_string(),
            ));
        }

        self.repository.soft_delete(task.id).await?;

        // Best effort from here: the row is gone either way, and every purge
        // step is idempotent.
        match task.trigger_type {
            TriggerType::Schedule => {
                if let Err(e) = self
                    .scheduling
                    .cancel_one_shot(&schedule_external_id(task.id))
                    .await
                {
                    warn!(task_id = %task.id, error = %e, "One-shot cancellation failed");
                }
            }
            TriggerType::Cron => {
                if !task.cron_expression.is_empty() {
                    if let Err(e) = self
                        .scheduling
                        .unregister_cron(&task.cron_expression, task.id)
                        .await
                    {
                        warn!(task_id = %task.id, error = %e, "Cron unregister failed");
                    }
                }
            }
        }

        if let Err(e) = self.scheduling.purge_queue(task.id).await {
            warn!(task_id = %task.id, error = %e, "Queue purge failed");
        }

        info!(task_id = %task.id, "Task deleted");
        Ok(())
    }

    /// Owner-scoped read.
    pub async fn get(&self, admin_id: i64, id: i64) -> TaskResult<Task> {
        self.repository
            .find(id, admin_id)
            .await?
            .ok_or(TaskError::NotFound)
    }

    /// List an admin's tasks. Returns (page, total).
    pub async fn list(&self, admin_id: i64, filter: TaskFilter) -> TaskResult<(Vec<Task>, u64)> {
        self.repository.list(admin_id, filter).await
    }

    /// Per-status counts for an admin.
    pub async fn stats(&self, admin_id: i64) -> TaskResult<TaskStats> {
        self.repository.stats(admin_id).await
    }

    /// Preview the next firings of an expression (authoring UIs).
    pub fn preview_cron(&self, expression: &str, count: usize) -> TaskResult<Vec<DateTime<Utc>>> {
        Ok(self.engine.upcoming(expression, Utc::now(), count)?)
    }

    fn validate_schedule_submit(
        &self,
        task: &Task,
        now: DateTime<Utc>,
    ) -> TaskResult<DateTime<Utc>> {
        let schedule_time = task.schedule_time.ok_or_else(|| {
            TaskError::Validation("schedule tasks require a schedule time".to_string())
        })?;

        if schedule_time <= now {
            return Err(TaskError::Validation(
                "schedule time is in the past".to_string(),
            ));
        }

        if let Some(expire) = task.expire_time {
            if expire <= schedule_time {
                return Err(TaskError::Validation(
                    "expire time must be after the schedule time".to_string(),
                ));
            }
        }

        Ok(schedule_time)
    }

    fn validate_cron_submit(&self, task: &Task, now: DateTime<Utc>) -> TaskResult<DateTime<Utc>> {
        if task.cron_expression.is_empty() {
            return Err(TaskError::Validation(
                "cron tasks require a cron expression".to_string(),
            ));
        }

        let expire = task.expire_time.ok_or_else(|| {
            TaskError::Validation("cron tasks require an expire time".to_string())
        })?;
        if expire <= now {
            return Err(TaskError::Validation("expire time has passed".to_string()));
        }

        let next = self.engine.next_after(&task.cron_expression, now)?;
        if expire <= next {
            return Err(TaskError::Validation(
                "expire time must be after the next execution".to_string(),
            ));
        }

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CronPatternType;
    use crate::repository::MockTaskRepository;
    use crate::scheduling::MockSchedulingPort;
    use chrono::Duration;

    fn service(
        repo: MockTaskRepository,
        scheduling: MockSchedulingPort,
    ) -> TaskService<MockTaskRepository> {
        TaskService::new(Arc::new(repo), Arc::new(scheduling), CronEngine::default())
    }

    fn draft_schedule_task(id: i64, schedule_time: DateTime<Utc>) -> Task {
        Task {
            id,
            task_name: "launch announcement".to_string(),
            description: String::new(),
            status: TaskStatus::Draft,
            admin_id: 1,
            group_ids: vec![100, 200],
            message_ids: vec![7],
            trigger_type: TriggerType::Schedule,
            schedule_time: Some(schedule_time),
            expire_time: None,
            cron_expression: String::new(),
            cron_pattern_type: None,
            cron_config: None,
            last_executed_at: None,
            next_execute_at: None,
            execute_count: 0,
            retry_count: 0,
            max_retry_count: 3,
            error_message: String::new(),
            create_time: Utc::now(),
            update_time: Utc::now(),
        }
    }

    fn draft_cron_task(id: i64) -> Task {
        Task {
            trigger_type: TriggerType::Cron,
            schedule_time: None,
            expire_time: Some(Utc::now() + Duration::hours(2)),
            cron_expression: "*/5 * * * *".to_string(),
            cron_pattern_type: Some(CronPatternType::Minute),
            ..draft_schedule_task(id, Utc::now())
        }
    }

    fn create_input(trigger_type: TriggerType) -> CreateTask {
        CreateTask {
            task_name: "launch announcement".to_string(),
            description: String::new(),
            group_ids: vec![100],
            message_ids: vec![7],
            trigger_type,
            schedule_time: Some(Utc::now() + Duration::hours(1)),
            expire_time: Some(Utc::now() + Duration::hours(2)),
            cron_expression: "*/5 * * * *".to_string(),
            cron_pattern_type: None,
            cron_config: None,
            max_retry_count: 0,
        }
    }

    #[tokio::test]
    async fn test_create_schedule_clears_cron_expression() {
        let mut repo = MockTaskRepository::new();
        repo.expect_create()
            .withf(|_, input| input.cron_expression.is_empty())
            .returning(|_, _| Ok(draft_schedule_task(1, Utc::now() + Duration::hours(1))));

        let service = service(repo, MockSchedulingPort::new());
        service
            .create(1, create_input(TriggerType::Schedule))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_create_schedule_requires_time() {
        let service = service(MockTaskRepository::new(), MockSchedulingPort::new());

        let mut input = create_input(TriggerType::Schedule);
        input.schedule_time = None;

        let err = service.create(1, input).await.unwrap_err();
        assert!(matches!(err, TaskError::Validation(_)));
    }

    #[tokio::test]
    async fn test_create_cron_rejects_bad_expression() {
        let service = service(MockTaskRepository::new(), MockSchedulingPort::new());

        let mut input = create_input(TriggerType::Cron);
        input.cron_expression = "0 * * * * *".to_string(); // six fields

        let err = service.create(1, input).await.unwrap_err();
        assert!(matches!(err, TaskError::Validation(_)));
    }

    #[tokio::test]
    async fn test_create_cron_requires_expire() {
        let service = service(MockTaskRepository::new(), MockSchedulingPort::new());

        let mut input = create_input(TriggerType::Cron);
        input.expire_time = None;

        let err = service.create(1, input).await.unwrap_err();
        assert!(matches!(err, TaskError::Validation(_)));
    }

    #[tokio::test]
    async fn test_submit_past_schedule_time_rejected() {
        let mut repo = MockTaskRepository::new();
        repo.expect_find()
            .returning(|id, _| Ok(Some(draft_schedule_task(id, Utc::now() - Duration::seconds(1)))));
        // No apply: the row must stay Draft.
        repo.expect_apply().times(0);

        let service = service(repo, MockSchedulingPort::new());
        let err = service.submit(1, 5).await.unwrap_err();
        assert!(matches!(err, TaskError::Validation(_)));
    }

    #[tokio::test]
    async fn test_submit_schedule_registers_one_shot() {
        let schedule_time = Utc::now() + Duration::hours(1);

        let mut repo = MockTaskRepository::new();
        repo.expect_find()
            .returning(move |id, _| Ok(Some(draft_schedule_task(id, schedule_time))));
        repo.expect_apply()
            .withf(|_, changes| {
                changes.status == Some(TaskStatus::Ready)
                    && matches!(changes.next_execute_at, Some(Some(_)))
            })
            .returning(move |id, _| {
                let mut task = draft_schedule_task(id, schedule_time);
                task.status = TaskStatus::Ready;
                Ok(task)
            });

        let mut scheduling = MockSchedulingPort::new();
        scheduling
            .expect_schedule_at()
            .withf(move |external_id, payload, at| {
                external_id == "schedule:5" && payload.contains("\"taskId\":5") && *at == schedule_time
            })
            .returning(|_, _, _| Ok(true));

        let service = service(repo, scheduling);
        let task = service.submit(1, 5).await.unwrap();
        assert_eq!(task.status, TaskStatus::Ready);
    }

    #[tokio::test]
    async fn test_submit_cron_registers_entry() {
        let mut repo = MockTaskRepository::new();
        repo.expect_find().returning(|id, _| Ok(Some(draft_cron_task(id))));
        repo.expect_apply().returning(|id, _| {
            let mut task = draft_cron_task(id);
            task.status = TaskStatus::Ready;
            Ok(task)
        });

        let mut scheduling = MockSchedulingPort::new();
        scheduling
            .expect_register_cron()
            .withf(|expr, payload, task_id| {
                expr == "*/5 * * * *" && payload.contains("\"groupIds\":[100,200]") && *task_id == 5
            })
            .returning(|_, _, _| Ok(true));

        let service = service(repo, scheduling);
        service.submit(1, 5).await.unwrap();
    }

    #[tokio::test]
    async fn test_submit_non_draft_conflicts() {
        let mut repo = MockTaskRepository::new();
        repo.expect_find().returning(|id, _| {
            let mut task = draft_cron_task(id);
            task.status = TaskStatus::Ready;
            Ok(Some(task))
        });

        let service = service(repo, MockSchedulingPort::new());
        let err = service.submit(1, 5).await.unwrap_err();
        assert!(matches!(err, TaskError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_submit_cron_expired_rejected() {
        let mut repo = MockTaskRepository::new();
        repo.expect_find().returning(|id, _| {
            let mut task = draft_cron_task(id);
            task.expire_time = Some(Utc::now() - Duration::minutes(1));
            Ok(Some(task))
        });

        let service = service(repo, MockSchedulingPort::new());
        let err = service.submit(1, 5).await.unwrap_err();
        assert!(matches!(err, TaskError::Validation(_)));
    }

    #[tokio::test]
    async fn test_delete_purges_artefacts() {
        let mut repo = MockTaskRepository::new();
        repo.expect_find().returning(|id, _| Ok(Some(draft_cron_task(id))));
        repo.expect_soft_delete().times(1).returning(|_| Ok(()));

        let mut scheduling = MockSchedulingPort::new();
        scheduling
            .expect_unregister_cron()
            .withf(|expr, id| expr == "*/5 * * * *" && *id == 5)
            .times(1)
            .returning(|_, _| Ok(1));
        scheduling
            .expect_purge_queue()
            .withf(|id| *id == 5)
            .times(1)
            .returning(|_| Ok(()));

        let service = service(repo, scheduling);
        service.delete(1, 5).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_running_task_conflicts() {
        let mut repo = MockTaskRepository::new();
        repo.expect_find().returning(|id, _| {
            let mut task = draft_cron_task(id);
            task.status = TaskStatus::Running;
            Ok(Some(task))
        });
        repo.expect_soft_delete().times(0);

        let service = service(repo, MockSchedulingPort::new());
        let err = service.delete(1, 5).await.unwrap_err();
        assert!(matches!(err, TaskError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_ownership_mismatch_is_not_found() {
        let mut repo = MockTaskRepository::new();
        repo.expect_find().returning(|_, _| Ok(None));

        let service = service(repo, MockSchedulingPort::new());
        let err = service.get(99, 5).await.unwrap_err();
        assert!(matches!(err, TaskError::NotFound));
    }

    #[tokio::test]
    async fn test_preview_cron() {
        let service = service(MockTaskRepository::new(), MockSchedulingPort::new());
        let fires = service.preview_cron("*/10 * * * *", 3).unwrap();
        assert_eq!(fires.len(), 3);

        assert!(service.preview_cron("bogus", 3).is_err());
    }
}
