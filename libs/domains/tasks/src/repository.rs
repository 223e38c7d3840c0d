use async_trait::async_trait;

use crate::error::TaskResult;
use crate::models::{CreateTask, Task, TaskChanges, TaskFilter, TaskStats};

/// Data access interface for tasks.
///
/// All reads exclude soft-deleted rows. Owner-scoped lookups take the
/// `admin_id`; accounting paths use the unscoped [`find_by_id`].
///
/// [`find_by_id`]: TaskRepository::find_by_id
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Insert a new Draft task owned by `admin_id`.
    async fn create(&self, admin_id: i64, input: CreateTask) -> TaskResult<Task>;

    /// Owner-scoped lookup.
    async fn find(&self, id: i64, admin_id: i64) -> TaskResult<Option<Task>>;

    /// Unscoped lookup, for execution accounting.
    async fn find_by_id(&self, id: i64) -> TaskResult<Option<Task>>;

    /// List an admin's tasks with filters; returns (page, total count).
    async fn list(&self, admin_id: i64, filter: TaskFilter) -> TaskResult<(Vec<Task>, u64)>;

    /// Per-status counts for an admin.
    async fn stats(&self, admin_id: i64) -> TaskResult<TaskStats>;

    /// Patch columns on a task row; `update_time` is always bumped.
    async fn apply(&self, id: i64, changes: TaskChanges) -> TaskResult<Task>;

    /// Soft-delete a row.
    async fn soft_delete(&self, id: i64) -> TaskResult<()>;

    /// All live cron tasks with a non-empty expression (restorer query).
    async fn cron_tasks(&self) -> TaskResult<Vec<Task>>;
}
