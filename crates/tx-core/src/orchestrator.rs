//! Orchestrator service (§4.6): start/stop/status over the singleton
//! `orchestrator_state` row, plus the dead-worker sweep that reclaims
//! abandoned claims.

use chrono::{DateTime, Utc};

use tx_db::models::OrchestratorState;
use tx_db::queries::orchestrator as db;

use crate::error::{CoreError, Result};

pub async fn status(pool: &sqlx::SqlitePool) -> Result<OrchestratorState> {
    db::get_state(pool).await.map_err(CoreError::Database)
}

/// Start (or re-configure) the orchestrator (§4.6 `start`). Idempotent.
pub async fn start(
    pool: &sqlx::SqlitePool,
    worker_pool_size: i64,
    heartbeat_interval_seconds: i64,
    now: DateTime<Utc>,
) -> Result<OrchestratorState> {
    if worker_pool_size < 1 {
        return Err(CoreError::Validation { reason: "worker_pool_size must be at least 1".into() });
    }
    db::start(pool, worker_pool_size, heartbeat_interval_seconds, now).await.map_err(CoreError::Database)?;
    tracing::info!(worker_pool_size, heartbeat_interval_seconds, "orchestrator started");
    status(pool).await
}

pub async fn stop(pool: &sqlx::SqlitePool) -> Result<OrchestratorState> {
    db::stop(pool).await.map_err(CoreError::Database)?;
    tracing::info!("orchestrator stopped");
    status(pool).await
}

/// Workers missing this many consecutive heartbeats are considered dead
/// (§4.4, §4.6).
pub const MISSED_HEARTBEATS_THRESHOLD: i64 = 3;

/// A dead worker's claims were reclaimed, freeing its tasks.
#[derive(Debug, Clone)]
pub struct SweepResult {
    pub worker_id: String,
    pub freed_task_ids: Vec<String>,
}

/// Find dead workers, mark them dead, and release every claim they held
/// (§4.6 sweep step). Logically one transaction per worker: marking dead
/// and releasing its claims always happen together.
pub async fn sweep_dead_workers(
    pool: &sqlx::SqlitePool,
    now: DateTime<Utc>,
    heartbeat_interval_seconds: i64,
) -> Result<Vec<SweepResult>> {
    let dead = crate::workers::find_dead(
        pool,
        now,
        MISSED_HEARTBEATS_THRESHOLD as u32,
        heartbeat_interval_seconds,
    )
    .await?;

    let mut results = Vec::with_capacity(dead.len());
    for worker in dead {
        crate::workers::mark_dead(pool, &worker.id).await?;
        let freed_task_ids = crate::claims::release_by_worker_reclaiming(pool, &worker.id).await?;
        tracing::warn!(
            worker_id = %worker.id,
            freed_task_count = freed_task_ids.len(),
            "marked worker dead and reclaimed its claims"
        );
        results.push(SweepResult { worker_id: worker.id, freed_task_ids });
    }
    Ok(results)
}
