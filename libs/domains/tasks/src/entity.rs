use crate::models::{CronPatternType, Task, TaskStatus, TriggerType};
use chrono::Utc;
use sea_orm::ActiveValue::{NotSet, Set};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// SeaORM entity for the `task` table
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "task")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub task_name: String,
    #[sea_orm(column_type = "Text")]
    pub description: String,
    /// Raw state code; see [`TaskStatus`].
    pub status: i32,
    pub admin_id: i64,
    pub group_ids: Json,
    pub message_ids: Json,
    pub trigger_type: TriggerType,
    pub schedule_time: Option<DateTimeWithTimeZone>,
    pub expire_time: Option<DateTimeWithTimeZone>,
    pub cron_expression: String,
    pub cron_pattern_type: Option<CronPatternType>,
    pub cron_config: Option<Json>,
    pub last_executed_at: Option<DateTimeWithTimeZone>,
    pub next_execute_at: Option<DateTimeWithTimeZone>,
    pub execute_count: i32,
    pub retry_count: i32,
    pub max_retry_count: i32,
    #[sea_orm(column_type = "Text")]
    pub error_message: String,
    pub is_delete: i32,
    pub create_time: DateTimeWithTimeZone,
    pub update_time: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

// Conversion from SeaORM Model to the domain Task
impl From<Model> for Task {
    fn from(model: Model) -> Self {
        Self {
            id: model.id,
            task_name: model.task_name,
            description: model.description,
            status: TaskStatus::from_i32(model.status).unwrap_or_default(),
            admin_id: model.admin_id,
            group_ids: serde_json::from_value(model.group_ids).unwrap_or_default(),
            message_ids: serde_json::from_value(model.message_ids).unwrap_or_default(),
            trigger_type: model.trigger_type,
            schedule_time: model.schedule_time.map(|t| t.with_timezone(&Utc)),
            expire_time: model.expire_time.map(|t| t.with_timezone(&Utc)),
            cron_expression: model.cron_expression,
            cron_pattern_type: model.cron_pattern_type,
            cron_config: model.cron_config,
            last_executed_at: model.last_executed_at.map(|t| t.with_timezone(&Utc)),
            next_execute_at: model.next_execute_at.map(|t| t.with_timezone(&Utc)),
            execute_count: model.execute_count,
            retry_count: model.retry_count,
            max_retry_count: model.max_retry_count,
            error_message: model.error_message,
            create_time: model.create_time.with_timezone(&Utc),
            update_time: model.update_time.with_timezone(&Utc),
        }
    }
}

/// Build an insertable ActiveModel for a new Draft task.
pub fn new_draft(admin_id: i64, input: crate::models::CreateTask) -> ActiveModel {
    let now = Utc::now();
    let max_retry = if input.max_retry_count > 0 {
        input.max_retry_count
    } else {
        3
    };

    ActiveModel {
        id: NotSet,
        task_name: Set(input.task_name),
        description: Set(input.description),
        status: Set(TaskStatus::Draft.as_i32()),
        admin_id: Set(admin_id),
        group_ids: Set(serde_json::json!(input.group_ids)),
        message_ids: Set(serde_json::json!(input.message_ids)),
        trigger_type: Set(input.trigger_type),
        schedule_time: Set(input.schedule_time.map(Into::into)),
        expire_time: Set(input.expire_time.map(Into::into)),
        cron_expression: Set(input.cron_expression),
        cron_pattern_type: Set(input.cron_pattern_type),
        cron_config: Set(input.cron_config),
        last_executed_at: Set(None),
        next_execute_at: Set(None),
        execute_count: Set(0),
        retry_count: Set(0),
        max_retry_count: Set(max_retry),
        error_message: Set(String::new()),
        is_delete: Set(0),
        create_time: Set(now.into()),
        update_time: Set(now.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CreateTask;

    #[test]
    fn test_new_draft_defaults() {
        let input = CreateTask {
            task_name: "weekly digest".to_string(),
            description: String::new(),
            group_ids: vec![100, 200],
            message_ids: vec![7],
            trigger_type: TriggerType::Cron,
            schedule_time: None,
            expire_time: Some(Utc::now()),
            cron_expression: "0 9 * * 1".to_string(),
            cron_pattern_type: Some(CronPatternType::Weekly),
            cron_config: None,
            max_retry_count: 0,
        };

        let draft = new_draft(9, input);
        assert_eq!(draft.status.as_ref(), &TaskStatus::Draft.as_i32());
        assert_eq!(draft.admin_id.as_ref(), &9);
        assert_eq!(draft.max_retry_count.as_ref(), &3);
        assert_eq!(draft.execute_count.as_ref(), &0);
        assert_eq!(draft.is_delete.as_ref(), &0);
    }

    #[test]
    fn test_model_to_domain_parses_id_lists() {
        let now: DateTimeWithTimeZone = Utc::now().into();
        let model = Model {
            id: 5,
            task_name: "t".to_string(),
            description: String::new(),
            status: TaskStatus::Ready.as_i32(),
            admin_id: 1,
            group_ids: serde_json::json!([100, 200, 300]),
            message_ids: serde_json::json!([7, 8]),
            trigger_type: TriggerType::Cron,
            schedule_time: None,
            expire_time: Some(now),
            cron_expression: "* * * * *".to_string(),
            cron_pattern_type: None,
            cron_config: None,
            last_executed_at: None,
            next_execute_at: None,
            execute_count: 0,
            retry_count: 0,
            max_retry_count: 3,
            error_message: String::new(),
            is_delete: 0,
            create_time: now,
            update_time: now,
        };

        let task: Task = model.into();
        assert_eq!(task.group_ids, vec![100, 200, 300]);
        assert_eq!(task.message_ids, vec![7, 8]);
        assert_eq!(task.status, TaskStatus::Ready);
    }
}
