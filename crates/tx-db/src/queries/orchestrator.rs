//! Database query functions for the singleton `orchestrator_state` row
//! (§4.6).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::models::OrchestratorState;

pub async fn get_state(pool: &sqlx::SqlitePool) -> Result<OrchestratorState> {
    let state = sqlx::query_as::<_, OrchestratorState>(
        "SELECT running, worker_pool_size, heartbeat_interval_seconds, started_at \
         FROM orchestrator_state WHERE id = 1",
    )
    .fetch_one(pool)
    .await
    .context("failed to fetch orchestrator state")?;
    Ok(state)
}

/// Start the orchestrator. Idempotent: calling it while already running
/// simply rewrites the same configuration (§4.6 `start`).
pub async fn start(
    pool: &sqlx::SqlitePool,
    worker_pool_size: i64,
    heartbeat_interval_seconds: i64,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "UPDATE orchestrator_state SET running = 1, worker_pool_size = ?, \
         heartbeat_interval_seconds = ?, started_at = ? WHERE id = 1",
    )
    .bind(worker_pool_size)
    .bind(heartbeat_interval_seconds)
    .bind(now)
    .execute(pool)
    .await
    .context("failed to start orchestrator")?;
    Ok(())
}

pub async fn stop(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::query("UPDATE orchestrator_state SET running = 0 WHERE id = 1")
        .execute(pool)
        .await
        .context("failed to stop orchestrator")?;
    Ok(())
}
