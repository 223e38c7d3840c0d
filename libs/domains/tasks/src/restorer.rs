//! Restart-time restoration of scheduler registrations.

use tracing::{info, warn};

use crate::botmsg::BotMsgPayload;
use crate::error::TaskResult;
use crate::repository::TaskRepository;
use crate::scheduling::SchedulingPort;

/// What a restore pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Cron entries re-registered.
    pub restored_cron: usize,
    /// Live cron tasks already registered (dedup skips).
    pub already_registered: usize,
}

/// Re-register cron entries for every live cron task and observe the
/// durable one-shot set.
///
/// Runs once at startup, after the workers and scheduler loops are up.
/// One-shot registrations are not re-emitted: they survive in the store and
/// fire naturally.
pub async fn restore_tasks<R: TaskRepository>(
    repository: &R,
    scheduling: &dyn SchedulingPort,
) -> TaskResult<RestoreReport> {
    info!("Restoring scheduler registrations...");

    let mut report = RestoreReport::default();

    for task in repository.cron_tasks().await? {
        if task.cron_expression.is_empty() {
            continue;
        }

        let payload = BotMsgPayload {
            message_ids: task.message_ids.clone(),
            group_ids: task.group_ids.clone(),
            msg_type: "cron_restore".to_string(),
            task_id: task.id,
            expire_time: task
                .expire_time
                .map(|t| t.to_rfc3339())
                .unwrap_or_default(),
        };
        let payload_json = match payload.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "Restore payload serialization failed");
                continue;
            }
        };

        match scheduling
            .register_cron(&task.cron_expression, &payload_json, task.id)
            .await
        {
            Ok(true) => report.restored_cron += 1,
            Ok(false) => report.already_registered += 1,
            Err(e) => {
                // Left for the next restorer pass.
                warn!(task_id = %task.id, expression = %task.cron_expression, error = %e, "Cron restore failed");
            }
        }
    }

    match scheduling.scheduled_overview().await {
        Ok((count, Some(earliest))) => {
            info!(count = %count, earliest = %earliest, "Durable one-shot registrations observed");
        }
        Ok((count, None)) => {
            info!(count = %count, "Durable one-shot registrations observed");
        }
        Err(e) => warn!(error = %e, "One-shot overview failed"),
    }

    info!(
        restored_cron = %report.restored_cron,
        already_registered = %report.already_registered,
        "Restore finished"
    );
    Ok(report)
}
