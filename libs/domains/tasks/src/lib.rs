//! Tasks domain: durable broadcast-task records and their lifecycle.
//!
//! A task is an operator-authored specification of what to send where and
//! when (one-shot schedule or recurring cron). This crate owns:
//!
//! - the `task` and `bot_config` persistence (SeaORM entities + repository)
//! - the lifecycle service (create / update / submit / delete / queries)
//!   with its state machine: Draft (−1) → Ready (0) → Running (1) →
//!   Completed (2) / Failed (3)
//! - the `bot_msg` fire handler fanning a task out into per-(chat, message)
//!   send jobs
//! - execution accounting driven by fire outcomes (expiry, success,
//!   failure backoff)
//! - restart restoration of cron registrations from the durable rows

pub mod accounting;
pub mod bot_config;
pub mod botmsg;
pub mod entity;
pub mod error;
pub mod models;
pub mod postgres;
pub mod repository;
pub mod restorer;
pub mod scheduling;
pub mod service;

pub use accounting::{ExecutionTracker, TaskFailureHook, task_backoff};
pub use bot_config::PgBotRegistry;
pub use botmsg::{BOT_MSG_TYPE, BotMsgHandler, BotMsgPayload};
pub use error::{TaskError, TaskResult};
pub use models::{
    CreateTask, CronPatternType, Task, TaskChanges, TaskFilter, TaskStats, TaskStatus, TriggerType,
    UpdateTask,
};
pub use postgres::PgTaskRepository;
pub use repository::TaskRepository;
pub use restorer::{RestoreReport, restore_tasks};
pub use scheduling::{DispatchScheduling, SchedulingPort};
pub use service::TaskService;
