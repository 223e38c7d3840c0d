use async_trait::async_trait;
use chrono::Utc;
use sea_orm::ActiveValue::Set;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect,
};

use crate::{
    entity,
    error::{TaskError, TaskResult},
    models::{CreateTask, Task, TaskChanges, TaskFilter, TaskStats, TaskStatus, TriggerType},
    repository::TaskRepository,
};

pub struct PgTaskRepository {
    db: DatabaseConnection,
}

impl PgTaskRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    fn live() -> sea_orm::Condition {
        sea_orm::Condition::all().add(entity::Column::IsDelete.eq(0))
    }

    async fn count_status(&self, admin_id: i64, status: TaskStatus) -> TaskResult<u64> {
        let count = entity::Entity::find()
            .filter(Self::live())
            .filter(entity::Column::AdminId.eq(admin_id))
            .filter(entity::Column::Status.eq(status.as_i32()))
            .count(&self.db)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl TaskRepository for PgTaskRepository {
    async fn create(&self, admin_id: i64, input: CreateTask) -> TaskResult<Task> {
        let model = entity::new_draft(admin_id, input).insert(&self.db).await?;

        tracing::info!(task_id = %model.id, admin_id = %admin_id, "Created task");
        Ok(model.into())
    }

    async fn find(&self, id: i64, admin_id: i64) -> TaskResult<Option<Task>> {
        let model = entity::Entity::find()
            .filter(Self::live())
            .filter(entity::Column::Id.eq(id))
            .filter(entity::Column::AdminId.eq(admin_id))
            .one(&self.db)
            .await?;

        Ok(model.map(Into::into))
    }

    async fn find_by_id(&self, id: i64) -> TaskResult<Option<Task>> {
        let model = entity::Entity::find()
            .filter(Self::live())
            .filter(entity::Column::Id.eq(id))
            .one(&self.db)
            .await?;

        Ok(model.map(Into::into))
    }

    async fn list(&self, admin_id: i64, filter: TaskFilter) -> TaskResult<(Vec<Task>, u64)> {
        let filter = filter.normalized();

        let mut query = entity::Entity::find()
            .filter(Self::live())
            .filter(entity::Column::AdminId.eq(admin_id));

        if let Some(status) = filter.status {
            query = query.filter(entity::Column::Status.eq(status.as_i32()));
        }
        if let Some(trigger_type) = filter.trigger_type {
            query = query.filter(entity::Column::TriggerType.eq(trigger_type));
        }
        if let Some(name) = &filter.task_name {
            if !name.is_empty() {
                query = query.filter(entity::Column::TaskName.contains(name));
            }
        }

        let total = query.clone().count(&self.db).await?;

        let models = query
            .order_by_desc(entity::Column::CreateTime)
            .offset(filter.offset())
            .limit(filter.limit)
            .all(&self.db)
            .await?;

        Ok((models.into_iter().map(Into::into).collect(), total))
    }

    async fn stats(&self, admin_id: i64) -> TaskResult<TaskStats> {
        let total = entity::Entity::find()
            .filter(Self::live())
            .filter(entity::Column::AdminId.eq(admin_id))
            .count(&self.db)
            .await?;

        Ok(TaskStats {
            total,
            pending: self.count_status(admin_id, TaskStatus::Ready).await?,
            running: self.count_status(admin_id, TaskStatus::Running).await?,
            completed: self.count_status(admin_id, TaskStatus::Completed).await?,
            failed: self.count_status(admin_id, TaskStatus::Failed).await?,
        })
    }

    async fn apply(&self, id: i64, changes: TaskChanges) -> TaskResult<Task> {
        // Guard on liveness first so accounting never resurrects deleted rows.
        let existing = entity::Entity::find()
            .filter(Self::live())
            .filter(entity::Column::Id.eq(id))
            .one(&self.db)
            .await?
            .ok_or(TaskError::NotFound)?;

        let mut active = entity::ActiveModel {
            id: Set(existing.id),
            ..Default::default()
        };

        if let Some(task_name) = changes.task_name {
            active.task_name = Set(task_name);
        }
        if let Some(description) = changes.description {
            active.description = Set(description);
        }
        if let Some(status) = changes.status {
            active.status = Set(status.as_i32());
        }
        if let Some(trigger_type) = changes.trigger_type {
            active.trigger_type = Set(trigger_type);
        }
        if let Some(group_ids) = changes.group_ids {
            active.group_ids = Set(serde_json::json!(group_ids));
        }
        if let Some(message_ids) = changes.message_ids {
            active.message_ids = Set(serde_json::json!(message_ids));
        }
        if let Some(schedule_time) = changes.schedule_time {
            active.schedule_time = Set(schedule_time.map(Into::into));
        }
        if let Some(expire_time) = changes.expire_time {
            active.expire_time = Set(expire_time.map(Into::into));
        }
        if let Some(cron_expression) = changes.cron_expression {
            active.cron_expression = Set(cron_expression);
        }
        if let Some(cron_pattern_type) = changes.cron_pattern_type {
            active.cron_pattern_type = Set(cron_pattern_type);
        }
        if let Some(cron_config) = changes.cron_config {
            active.cron_config = Set(cron_config);
        }
        if let Some(last_executed_at) = changes.last_executed_at {
            active.last_executed_at = Set(last_executed_at.map(Into::into));
        }
        if let Some(next_execute_at) = changes.next_execute_at {
            active.next_execute_at = Set(next_execute_at.map(Into::into));
        }
        if let Some(execute_count) = changes.execute_count {
            active.execute_count = Set(execute_count);
        }
        if let Some(retry_count) = changes.retry_count {
            active.retry_count = Set(retry_count);
        }
        if let Some(max_retry_count) = changes.max_retry_count {
            active.max_retry_count = Set(max_retry_count);
        }
        if let Some(error_message) = changes.error_message {
            active.error_message = Set(error_message);
        }
        active.update_time = Set(Utc::now().into());

        let model = active.update(&self.db).await?;
        Ok(model.into())
    }

    async fn soft_delete(&self, id: i64) -> TaskResult<()> {
        let active = entity::ActiveModel {
            id: Set(id),
            is_delete: Set(1),
            update_time: Set(Utc::now().into()),
            ..Default::default()
        };

        active.update(&self.db).await?;
        tracing::info!(task_id = %id, "Soft-deleted task");
        Ok(())
    }

    async fn cron_tasks(&self) -> TaskResult<Vec<Task>> {
        let models = entity::Entity::find()
            .filter(Self::live())
            .filter(entity::Column::TriggerType.eq(TriggerType::Cron))
            .filter(entity::Column::CronExpression.ne(""))
            .all(&self.db)
            .await?;

        Ok(models.into_iter().map(Into::into).collect())
    }
}
