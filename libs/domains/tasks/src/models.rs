use chrono::{DateTime, Utc};
use sea_orm::{DeriveActiveEnum, EnumIter};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use validator::Validate;

/// Task lifecycle state.
///
/// Draft rows are editable; Ready rows are registered with the scheduler;
/// Running/Completed/Failed are driven by execution accounting. Stored as
/// the raw integer code (−1..3) in the `status` column.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Draft,
    Ready,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Column code of this state.
    pub fn as_i32(&self) -> i32 {
        match self {
            Self::Draft => -1,
            Self::Ready => 0,
            Self::Running => 1,
            Self::Completed => 2,
            Self::Failed => 3,
        }
    }

    /// State for a column code, if it is a known one.
    pub fn from_i32(code: i32) -> Option<Self> {
        match code {
            -1 => Some(Self::Draft),
            0 => Some(Self::Ready),
            1 => Some(Self::Running),
            2 => Some(Self::Completed),
            3 => Some(Self::Failed),
            _ => None,
        }
    }

    /// States a task may be deleted from.
    pub fn is_deletable(&self) -> bool {
        matches!(self, Self::Draft | Self::Ready | Self::Failed)
    }
}

/// How a task fires.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Display,
    DeriveActiveEnum,
    EnumIter,
)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "trigger_type")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TriggerType {
    /// One-shot fire at `schedule_time`.
    #[sea_orm(string_value = "schedule")]
    Schedule,
    /// Recurring fires on `cron_expression` until `expire_time`.
    #[sea_orm(string_value = "cron")]
    Cron,
}

/// UI echo of how the cron expression was authored. Opaque to the core.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Display,
    DeriveActiveEnum,
    EnumIter,
)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "cron_pattern_type")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CronPatternType {
    #[sea_orm(string_value = "minute")]
    Minute,
    #[sea_orm(string_value = "hour")]
    Hour,
    #[sea_orm(string_value = "daily")]
    Daily,
    #[sea_orm(string_value = "weekly")]
    Weekly,
    #[sea_orm(string_value = "monthly")]
    Monthly,
    #[sea_orm(string_value = "custom")]
    Custom,
}

/// A broadcast task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub task_name: String,
    pub description: String,
    pub status: TaskStatus,
    pub admin_id: i64,
    /// Destination chat ids.
    pub group_ids: Vec<i64>,
    /// Message template ids, sent in order to every chat.
    pub message_ids: Vec<i64>,
    pub trigger_type: TriggerType,
    pub schedule_time: Option<DateTime<Utc>>,
    pub expire_time: Option<DateTime<Utc>>,
    /// Standard 5-field expression; empty for schedule tasks.
    pub cron_expression: String,
    pub cron_pattern_type: Option<CronPatternType>,
    pub cron_config: Option<serde_json::Value>,
    pub last_executed_at: Option<DateTime<Utc>>,
    pub next_execute_at: Option<DateTime<Utc>>,
    pub execute_count: i32,
    pub retry_count: i32,
    pub max_retry_count: i32,
    pub error_message: String,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

/// DTO for creating a task (lands in Draft).
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateTask {
    #[validate(length(min = 1, max = 50))]
    pub task_name: String,
    #[serde(default)]
    pub description: String,
    pub group_ids: Vec<i64>,
    pub message_ids: Vec<i64>,
    pub trigger_type: TriggerType,
    pub schedule_time: Option<DateTime<Utc>>,
    pub expire_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cron_expression: String,
    pub cron_pattern_type: Option<CronPatternType>,
    pub cron_config: Option<serde_json::Value>,
    #[serde(default)]
    pub max_retry_count: i32,
}

/// DTO for overwriting a Draft task's editable fields.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateTask {
    pub id: i64,
    #[validate(length(min = 1, max = 50))]
    pub task_name: String,
    #[serde(default)]
    pub description: String,
    pub group_ids: Vec<i64>,
    pub message_ids: Vec<i64>,
    pub trigger_type: TriggerType,
    pub schedule_time: Option<DateTime<Utc>>,
    pub expire_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cron_expression: String,
    pub cron_pattern_type: Option<CronPatternType>,
    pub cron_config: Option<serde_json::Value>,
    #[serde(default)]
    pub max_retry_count: i32,
}

/// Query filters for listing tasks.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    /// Substring match on the task name.
    pub task_name: Option<String>,
    pub trigger_type: Option<TriggerType>,
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
}

fn default_page() -> u64 {
    1
}

fn default_limit() -> u64 {
    10
}

impl TaskFilter {
    /// Page/limit normalized to sane bounds.
    pub fn normalized(mut self) -> Self {
        if self.page == 0 {
            self.page = 1;
        }
        if self.limit == 0 || self.limit > 100 {
            self.limit = 10;
        }
        self
    }

    pub fn offset(&self) -> u64 {
        (self.page - 1) * self.limit
    }
}

/// Per-admin status counts.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct TaskStats {
    pub total: u64,
    pub pending: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Field patch applied through the repository. `None` leaves a column
/// untouched; the inner `Option` writes NULL for nullable columns.
#[derive(Debug, Clone, Default)]
pub struct TaskChanges {
    pub task_name: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub trigger_type: Option<TriggerType>,
    pub group_ids: Option<Vec<i64>>,
    pub message_ids: Option<Vec<i64>>,
    pub schedule_time: Option<Option<DateTime<Utc>>>,
    pub expire_time: Option<Option<DateTime<Utc>>>,
    pub cron_expression: Option<String>,
    pub cron_pattern_type: Option<Option<CronPatternType>>,
    pub cron_config: Option<Option<serde_json::Value>>,
    pub last_executed_at: Option<Option<DateTime<Utc>>>,
    pub next_execute_at: Option<Option<DateTime<Utc>>>,
    pub execute_count: Option<i32>,
    pub retry_count: Option<i32>,
    pub max_retry_count: Option<i32>,
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_round_trip() {
        for status in [
            TaskStatus::Draft,
            TaskStatus::Ready,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            assert_eq!(TaskStatus::from_i32(status.as_i32()), Some(status));
        }
        assert_eq!(TaskStatus::Draft.as_i32(), -1);
        assert_eq!(TaskStatus::from_i32(7), None);
    }

    #[test]
    fn test_status_deletable() {
        assert!(TaskStatus::Draft.is_deletable());
        assert!(TaskStatus::Ready.is_deletable());
        assert!(TaskStatus::Failed.is_deletable());
        assert!(!TaskStatus::Running.is_deletable());
        assert!(!TaskStatus::Completed.is_deletable());
    }

    #[test]
    fn test_trigger_type_display() {
        assert_eq!(TriggerType::Schedule.to_string(), "schedule");
        assert_eq!(TriggerType::Cron.to_string(), "cron");
    }

    #[test]
    fn test_filter_normalized() {
        let filter = TaskFilter { page: 0, limit: 500, ..Default::default() }.normalized();
        assert_eq!(filter.page, 1);
        assert_eq!(filter.limit, 10);

        let filter = TaskFilter { page: 3, limit: 20, ..Default::default() }.normalized();
        assert_eq!(filter.offset(), 40);
    }

    #[test]
    fn test_create_task_validation() {
        let input = CreateTask {
            task_name: String::new(),
            description: String::new(),
            group_ids: vec![100],
            message_ids: vec![1],
            trigger_type: TriggerType::Schedule,
            schedule_time: None,
            expire_time: None,
            cron_expression: String::new(),
            cron_pattern_type: None,
            cron_config: None,
            max_retry_count: 0,
        };
        assert!(input.validate().is_err());
    }

    #[test]
    fn test_task_changes_default_touches_nothing() {
        let changes = TaskChanges::default();
        assert!(changes.status.is_none());
        assert!(changes.next_execute_at.is_none());
    }
}
