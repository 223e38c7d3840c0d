//! Liveness/readiness endpoints for the dispatcher process.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use redis::aio::ConnectionManager;
use sea_orm::DatabaseConnection;

#[derive(Clone)]
pub struct HealthState {
    pub redis: ConnectionManager,
    pub db: DatabaseConnection,
}

/// Router with `/health` (liveness) and `/ready` (store reachability).
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .with_state(state)
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn ready_handler(State(state): State<HealthState>) -> Result<&'static str, StatusCode> {
    let mut redis = state.redis.clone();
    if database::redis::check_health(&mut redis).await.is_err() {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    if database::postgres::check_health(&state.db).await.is_err() {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    Ok("ready")
}
