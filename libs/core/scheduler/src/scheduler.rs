//! Cron entries, durable one-shot registrations, and the fire dispatch loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cron::CronEngine;
use crate::error::SchedulerError;
use crate::handler::JobHandler;

/// Durable one-shot registrations live here (score = fire-at epoch-ms).
/// Members survive restarts and fire naturally once due.
pub const ONESHOT_SET_KEY: &str = "sched:oneshot";

const ONESHOT_TICK: Duration = Duration::from_secs(1);
const ONESHOT_BATCH: isize = 100;
const SCAN_PAGE: isize = 100;

/// Member form of a one-shot registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct OneShotEntry {
    /// External id used for dedup and cancellation, e.g. `schedule:42`.
    id: String,
    task_type: String,
    payload: String,
}

/// Copy of a registered cron entry, for dedup scans and purges.
#[derive(Debug, Clone)]
pub struct CronEntrySnapshot {
    pub entry_id: String,
    pub expression: String,
    pub task_type: String,
    pub payload: Vec<u8>,
}

/// Observation of the one-shot set, reported by the restorer at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledOverview {
    pub count: usize,
    pub earliest: Option<DateTime<Utc>>,
}

struct CronEntry {
    expression: String,
    task_type: String,
    payload: Vec<u8>,
    handle: JoinHandle<()>,
}

type HandlerMap = HashMap<String, Arc<dyn JobHandler>>;

/// Owns cron entries and one-shot fires, dispatching each fire to the
/// handler registered for its task type.
///
/// Cron entries are in-memory (a restorer re-registers them from durable
/// task rows after a restart); one-shot registrations are store-backed and
/// fire naturally after a restart.
pub struct Scheduler {
    redis: ConnectionManager,
    engine: CronEngine,
    handlers: Arc<RwLock<HandlerMap>>,
    entries: Arc<RwLock<HashMap<String, CronEntry>>>,
    stop_tx: watch::Sender<bool>,
}

impl Scheduler {
    pub fn new(redis: ConnectionManager, engine: CronEngine) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            redis,
            engine,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            entries: Arc::new(RwLock::new(HashMap::new())),
            stop_tx,
        }
    }

    pub fn engine(&self) -> &CronEngine {
        &self.engine
    }

    /// Register a handler for its task type. Re-registration replaces the
    /// previous handler with a warning.
    pub async fn register_handler(&self, handler: Arc<dyn JobHandler>) {
        let task_type = handler.task_type().to_string();
        let mut handlers = self.handlers.write().await;
        if handlers.insert(task_type.clone(), handler).is_some() {
            warn!(task_type = %task_type, "Handler re-registered, replacing previous");
        } else {
            info!(task_type = %task_type, "Handler registered");
        }
    }

    pub async fn has_handler(&self, task_type: &str) -> bool {
        self.handlers.read().await.contains_key(task_type)
    }

    /// Register a cron entry. The expression must validate and a handler for
    /// `task_type` must already be registered. Returns the entry id.
    pub async fn register_cron(
        &self,
        expression: &str,
        task_type: &str,
        payload: &[u8],
    ) -> Result<String, SchedulerError> {
        self.engine.validate(expression)?;

        if !self.has_handler(task_type).await {
            return Err(SchedulerError::HandlerMissing(task_type.to_string()));
        }

        let entry_id = Uuid::new_v4().to_string();
        let engine = self.engine.clone();
        let handlers = Arc::clone(&self.handlers);
        let mut stop = self.stop_tx.subscribe();
        let expr = expression.to_string();
        let fire_type = task_type.to_string();
        let fire_payload = payload.to_vec();
        let log_entry_id = entry_id.clone();

        let handle = tokio::spawn(async move {
            loop {
                let next = match engine.next_after(&expr, Utc::now()) {
                    Ok(next) => next,
                    Err(e) => {
                        error!(entry_id = %log_entry_id, error = %e, "Cron entry cannot compute next fire, stopping");
                        break;
                    }
                };

                let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                debug!(entry_id = %log_entry_id, next = %next, "Cron entry armed");

                tokio::select! {
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(wait) => {
                        fire(&handlers, &fire_type, &fire_payload).await;
                    }
                }
            }
        });

        let mut entries = self.entries.write().await;
        entries.insert(
            entry_id.clone(),
            CronEntry {
                expression: expression.to_string(),
                task_type: task_type.to_string(),
                payload: payload.to_vec(),
                handle,
            },
        );

        info!(entry_id = %entry_id, expression = %expression, task_type = %task_type, "Cron entry registered");
        Ok(entry_id)
    }

    /// Remove a cron entry and stop its fire loop.
    pub async fn unregister_cron(&self, entry_id: &str) -> Result<(), SchedulerError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .remove(entry_id)
            .ok_or_else(|| SchedulerError::EntryNotFound(entry_id.to_string()))?;

        entry.handle.abort();
        info!(entry_id = %entry_id, expression = %entry.expression, "Cron entry unregistered");
        Ok(())
    }

    /// Snapshot of all registered cron entries.
    pub async fn entries(&self) -> Vec<CronEntrySnapshot> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(id, entry)| CronEntrySnapshot {
                entry_id: id.clone(),
                expression: entry.expression.clone(),
                task_type: entry.task_type.clone(),
                payload: entry.payload.clone(),
            })
            .collect()
    }

    /// Register a one-shot fire under a fixed external id.
    ///
    /// Idempotent on the id: re-submitting the same id is a no-op returning
    /// `false`. The registration is durable in the store.
    pub async fn schedule_at(
        &self,
        external_id: &str,
        task_type: &str,
        payload: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, SchedulerError> {
        if !self.has_handler(task_type).await {
            return Err(SchedulerError::HandlerMissing(task_type.to_string()));
        }

        if self.find_one_shot(external_id).await?.is_some() {
            info!(external_id = %external_id, "One-shot already scheduled, skipping");
            return Ok(false);
        }

        let entry = OneShotEntry {
            id: external_id.to_string(),
            task_type: task_type.to_string(),
            payload: payload.to_string(),
        };
        let member = serde_json::to_string(&entry)?;

        let mut conn = self.redis.clone();
        let _: i64 = conn
            .zadd(ONESHOT_SET_KEY, member, at.timestamp_millis())
            .await?;

        info!(external_id = %external_id, task_type = %task_type, at = %at, "One-shot scheduled");
        Ok(true)
    }

    /// Cancel a one-shot registration by external id. Returns whether a
    /// registration was removed.
    pub async fn cancel_one_shot(&self, external_id: &str) -> Result<bool, SchedulerError> {
        let Some(member) = self.find_one_shot(external_id).await? else {
            return Ok(false);
        };

        let mut conn = self.redis.clone();
        let removed: i64 = conn.zrem(ONESHOT_SET_KEY, member).await?;

        if removed > 0 {
            info!(external_id = %external_id, "One-shot cancelled");
        }
        Ok(removed > 0)
    }

    /// Count and earliest fire time of the one-shot set.
    pub async fn scheduled_overview(&self) -> Result<ScheduledOverview, SchedulerError> {
        let mut conn = self.redis.clone();

        let count: i64 = conn.zcard(ONESHOT_SET_KEY).await?;
        let head: Vec<(String, f64)> = conn.zrange_withscores(ONESHOT_SET_KEY, 0, 0).await?;

        let earliest = head
            .first()
            .and_then(|(_, score)| Utc.timestamp_millis_opt(*score as i64).single());

        Ok(ScheduledOverview {
            count: count as usize,
            earliest,
        })
    }

    /// Run the one-shot promotion loop until shutdown is signalled.
    ///
    /// Every tick, due members are claimed (ZREM first, so racing processes
    /// fire each registration at most once) and dispatched.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("One-shot scheduler loop started");
        let mut ticker = tokio::time::interval(ONESHOT_TICK);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.fire_due_one_shots().await {
                        warn!(error = %e, "One-shot tick failed");
                    }
                }
            }
        }

        info!("One-shot scheduler loop stopped");
    }

    /// Claim and dispatch all due one-shot members. Returns the fired count.
    pub async fn fire_due_one_shots(&self) -> Result<usize, SchedulerError> {
        let mut conn = self.redis.clone();
        let now_ms = Utc::now().timestamp_millis();

        let due: Vec<String> = conn
            .zrangebyscore_limit(ONESHOT_SET_KEY, "-inf", now_ms, 0, ONESHOT_BATCH)
            .await?;

        if due.is_empty() {
            return Ok(0);
        }

        let mut fired = 0;
        for member in due {
            // Claim by removal; a racing scheduler that loses the ZREM skips.
            let removed: i64 = conn.zrem(ONESHOT_SET_KEY, &member).await?;
            if removed == 0 {
                continue;
            }

            let entry: OneShotEntry = match serde_json::from_str(&member) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Unparseable one-shot member, dropping");
                    continue;
                }
            };

            info!(external_id = %entry.id, task_type = %entry.task_type, "One-shot due, firing");
            fire(&self.handlers, &entry.task_type, entry.payload.as_bytes()).await;
            fired += 1;
        }

        Ok(fired)
    }

    /// Stop all cron fire loops. Called first in the shutdown order so no
    /// new fires are produced while workers drain.
    pub async fn stop(&self) {
        let _ = self.stop_tx.send(true);
        let mut entries = self.entries.write().await;
        for (entry_id, entry) in entries.drain() {
            entry.handle.abort();
            debug!(entry_id = %entry_id, "Cron entry stopped");
        }
        info!("Scheduler stopped");
    }

    async fn find_one_shot(&self, external_id: &str) -> Result<Option<String>, SchedulerError> {
        let mut conn = self.redis.clone();
        let mut offset = 0isize;

        loop {
            let members: Vec<String> = conn
                .zrange(ONESHOT_SET_KEY, offset, offset + SCAN_PAGE - 1)
                .await?;
            if members.is_empty() {
                return Ok(None);
            }

            for member in &members {
                if let Ok(entry) = serde_json::from_str::<OneShotEntry>(member) {
                    if entry.id == external_id {
                        return Ok(Some(member.clone()));
                    }
                }
            }

            if members.len() < SCAN_PAGE as usize {
                return Ok(None);
            }
            offset += SCAN_PAGE;
        }
    }
}

/// Dispatch one fire to the registered handler. Handler errors are logged
/// and absorbed; the durable retry policy lives with the task rows.
async fn fire(handlers: &RwLock<HandlerMap>, task_type: &str, payload: &[u8]) {
    let handler = {
        let handlers = handlers.read().await;
        handlers.get(task_type).cloned()
    };

    let Some(handler) = handler else {
        error!(task_type = %task_type, "No handler registered for fire");
        return;
    };

    let started = std::time::Instant::now();
    match handler.process(payload).await {
        Ok(()) => {
            info!(
                task_type = %task_type,
                elapsed_ms = %started.elapsed().as_millis(),
                "Fire processed"
            );
        }
        Err(e) => {
            error!(
                task_type = %task_type,
                elapsed_ms = %started.elapsed().as_millis(),
                error = %e,
                "Fire failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_shot_entry_round_trip() {
        let entry = OneShotEntry {
            id: "schedule:42".to_string(),
            task_type: "bot_msg".to_string(),
            payload: r#"{"taskId":42}"#.to_string(),
        };

        let raw = serde_json::to_string(&entry).unwrap();
        let parsed: OneShotEntry = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.id, "schedule:42");
        assert_eq!(parsed.task_type, "bot_msg");
    }

    #[test]
    fn test_scheduled_overview_equality() {
        let a = ScheduledOverview { count: 0, earliest: None };
        let b = ScheduledOverview { count: 0, earliest: None };
        assert_eq!(a, b);
    }
}
