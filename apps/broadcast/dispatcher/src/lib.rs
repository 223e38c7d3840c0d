//! Broadcast Dispatcher Service
//!
//! One process running the whole send pipeline:
//!
//! ```text
//! Scheduler (cron entries + durable one-shots)
//!   ↓ fires bot_msg payloads
//! ExecutionTracker(BotMsgHandler)          task accounting + fan-out
//!   ↓ Producer.enqueue (backpressure-aware)
//! ready:<shard> / delayed:<shard>          one Mover + one Worker per shard
//!   ↓ rate gates + bot selection
//! TelegramSender                           idempotency marker on success
//! ```
//!
//! Startup order: consumer groups → movers → workers → scheduler loops →
//! restorer. Shutdown reverses the fire path: scheduler first (no new
//! fires), then workers drain, then movers, then the store clients drop.

mod health;
mod telegram;

use std::sync::Arc;

use core_config::{Environment, FromEnv};
use database::postgres::PostgresConfig;
use database::redis::RedisConfig;
use dispatch::{DispatchConfig, Producer, Purger, RateLimiter, Worker};
use domain_tasks::{
    BotMsgHandler, DispatchScheduling, ExecutionTracker, PgBotRegistry, PgTaskRepository,
    TaskFailureHook, restore_tasks,
};
use eyre::{Result, WrapErr};
use scheduler::{CronEngine, DEFAULT_TIMEZONE, Scheduler};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::{Semaphore, watch};
use tracing::{error, info, warn};

pub use telegram::TelegramSender;

/// Run the dispatcher until SIGINT/SIGTERM.
pub async fn run() -> Result<()> {
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);

    info!(
        name = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
        environment = ?environment,
        "Starting broadcast dispatcher"
    );

    // Configuration
    let pg_config = PostgresConfig::from_env().wrap_err("Failed to load PostgreSQL configuration")?;
    let redis_config = RedisConfig::from_env().wrap_err("Failed to load Redis configuration")?;
    let dispatch_config =
        DispatchConfig::from_env().wrap_err("Failed to load dispatch configuration")?;

    let timezone = core_config::env_or_default("DISPATCH_TIMEZONE", DEFAULT_TIMEZONE);
    let engine = CronEngine::with_zone_name(&timezone)
        .wrap_err_with(|| format!("Invalid DISPATCH_TIMEZONE '{}'", timezone))?;

    // Stores
    info!("Connecting to PostgreSQL...");
    let db = database::postgres::connect_from_config_with_retry(pg_config, None)
        .await
        .wrap_err("Failed to connect to PostgreSQL")?;
    database::postgres::run_migrations::<migration::Migrator>(&db, env!("CARGO_PKG_NAME"))
        .await
        .wrap_err("Failed to run migrations")?;

    info!("Connecting to Redis...");
    let redis = database::redis::connect_from_config_with_retry(redis_config, None)
        .await
        .wrap_err("Failed to connect to Redis")?;

    // Components
    let repository = Arc::new(PgTaskRepository::new(db.clone()));
    let limiter = RateLimiter::new(redis.clone(), dispatch_config.clone());
    let producer = Arc::new(Producer::new(redis.clone(), dispatch_config.clone()));
    let purger = Arc::new(Purger::new(redis.clone(), dispatch_config.clone()));
    let scheduler = Arc::new(Scheduler::new(redis.clone(), engine.clone()));
    let scheduling = Arc::new(DispatchScheduling::new(scheduler.clone(), purger.clone()));

    let sender = Arc::new(TelegramSender::new());
    let registry = Arc::new(PgBotRegistry::new(db.clone()));
    let failure_hook = Arc::new(TaskFailureHook::new(repository.clone()));

    // The bot_msg fire handler, wrapped with task row accounting.
    let handler = ExecutionTracker::new(
        Arc::new(BotMsgHandler::new(producer.clone())),
        repository.clone(),
        scheduling.clone(),
        engine.clone(),
    );
    scheduler.register_handler(Arc::new(handler)).await;

    producer
        .ensure_all_groups()
        .await
        .wrap_err("Failed to pre-create consumer groups")?;

    let (mover_tx, _) = watch::channel(false);
    let (worker_tx, _) = watch::channel(false);
    let (sched_tx, _) = watch::channel(false);

    // Movers, one per shard
    let mut mover_handles = Vec::new();
    for shard in producer.shards().names() {
        let mover = dispatch::Mover::new(redis.clone(), dispatch_config.clone(), shard);
        let rx = mover_tx.subscribe();
        mover_handles.push(tokio::spawn(async move { mover.run(rx).await }));
    }

    // Workers, one per shard, bounded by the shared concurrency semaphore
    let concurrency = Arc::new(Semaphore::new(dispatch_config.worker_concurrency));
    let mut worker_handles = Vec::new();
    for shard in producer.shards().names() {
        let worker = Worker::new(
            redis.clone(),
            dispatch_config.clone(),
            limiter.clone(),
            sender.clone(),
            registry.clone(),
            shard,
        )
        .with_failure_hook(failure_hook.clone())
        .with_concurrency_limit(concurrency.clone());

        let rx = worker_tx.subscribe();
        worker_handles.push(tokio::spawn(async move { worker.run(rx).await }));
    }

    // One-shot promotion loop
    let sched_handle = {
        let scheduler = scheduler.clone();
        let rx = sched_tx.subscribe();
        tokio::spawn(async move { scheduler.run(rx).await })
    };

    info!(
        shards = %dispatch_config.shard_count,
        worker_concurrency = %dispatch_config.worker_concurrency,
        timezone = %timezone,
        "Pipeline running"
    );

    // Health server
    let health_state = health::HealthState {
        redis: redis.clone(),
        db: db.clone(),
    };
    let health_port: u16 = core_config::env_parse_or("DISPATCHER_HEALTH_PORT", 8082)
        .wrap_err("Invalid DISPATCHER_HEALTH_PORT")?;
    tokio::spawn(async move {
        if let Err(e) = serve_health(health_state, health_port).await {
            error!(error = %e, "Health server failed");
        }
    });

    // Restore scheduler registrations once the loops are up.
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    match restore_tasks(repository.as_ref(), scheduling.as_ref()).await {
        Ok(report) => {
            info!(restored_cron = %report.restored_cron, "Restore pass complete");
        }
        Err(e) => warn!(error = %e, "Restore pass failed"),
    }

    shutdown_signal().await?;

    // Ordered shutdown: no new fires, drain sends, stop promotion.
    info!("Shutting down: stopping scheduler");
    scheduler.stop().await;
    let _ = sched_tx.send(true);
    let _ = sched_handle.await;

    info!("Shutting down: draining workers");
    let _ = worker_tx.send(true);
    for handle in worker_handles {
        let _ = handle.await;
    }

    info!("Shutting down: stopping movers");
    let _ = mover_tx.send(true);
    for handle in mover_handles {
        let _ = handle.await;
    }

    info!("Broadcast dispatcher stopped");
    Ok(())
}

async fn serve_health(state: health::HealthState, port: u16) -> Result<()> {
    let app = health::health_router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("Failed to bind health server to {}", addr))?;

    info!(port = %port, "Health server listening");

    axum::serve(listener, app).await.wrap_err("Health server failed")?;
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        },
    }

    Ok(())
}
