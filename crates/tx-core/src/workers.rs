//! Worker Registry service (§4.4): registration gated on orchestrator
//! state and pool capacity, heartbeats, dead-worker detection.

use chrono::{DateTime, Utc};
use rand::Rng;

use tx_db::models::{Worker, WorkerStatus};
use tx_db::queries::{orchestrator, workers as db};

use crate::error::{CoreError, Result};

fn generate_worker_id() -> String {
    let suffix: u64 = rand::rng().random();
    format!("worker-{suffix:016x}")
}

/// Register a new worker. Fails when the orchestrator is not running or the
/// pool is already at `worker_pool_size` (§4.4 `register`).
pub async fn register(
    pool: &sqlx::SqlitePool,
    id: Option<&str>,
    name: &str,
    hostname: &str,
    pid: i64,
    capabilities: &serde_json::Value,
) -> Result<Worker> {
    let state = orchestrator::get_state(pool).await.map_err(CoreError::Database)?;
    if !state.running {
        return Err(CoreError::Registration { worker_pool_size: state.worker_pool_size });
    }
    let non_dead = db::count_non_dead(pool).await.map_err(CoreError::Database)?;
    if non_dead >= state.worker_pool_size {
        return Err(CoreError::Registration { worker_pool_size: state.worker_pool_size });
    }

    let id = id.map(str::to_string).unwrap_or_else(generate_worker_id);
    let now = Utc::now();
    db::insert_worker(pool, &id, name, hostname, pid, capabilities, now)
        .await
        .map_err(CoreError::Database)
}

pub async fn get(pool: &sqlx::SqlitePool, id: &str) -> Result<Worker> {
    db::get_worker(pool, id)
        .await
        .map_err(CoreError::Database)?
        .ok_or_else(|| CoreError::WorkerNotFound { id: id.to_string() })
}

pub async fn list(pool: &sqlx::SqlitePool) -> Result<Vec<Worker>> {
    db::list_workers(pool).await.map_err(CoreError::Database)
}

/// Atomic heartbeat update (§4.4 `heartbeat`).
pub async fn heartbeat(
    pool: &sqlx::SqlitePool,
    worker_id: &str,
    timestamp: DateTime<Utc>,
    status: WorkerStatus,
    current_task_id: Option<&str>,
) -> Result<()> {
    let affected = db::heartbeat(pool, worker_id, timestamp, status, current_task_id)
        .await
        .map_err(CoreError::Database)?;
    if affected == 0 {
        return Err(CoreError::WorkerNotFound { id: worker_id.to_string() });
    }
    Ok(())
}

/// Remove a worker's row. Callers must release its claims first (§4.5).
pub async fn deregister(pool: &sqlx::SqlitePool, id: &str) -> Result<()> {
    let affected = db::deregister(pool, id).await.map_err(CoreError::Database)?;
    if affected == 0 {
        return Err(CoreError::WorkerNotFound { id: id.to_string() });
    }
    Ok(())
}

/// Non-dead workers past their heartbeat deadline (§4.4 `find_dead`).
pub async fn find_dead(
    pool: &sqlx::SqlitePool,
    now: DateTime<Utc>,
    missed_heartbeats: u32,
    heartbeat_interval_seconds: i64,
) -> Result<Vec<Worker>> {
    db::find_dead(pool, now, missed_heartbeats, heartbeat_interval_seconds)
        .await
        .map_err(CoreError::Database)
}

pub async fn mark_dead(pool: &sqlx::SqlitePool, id: &str) -> Result<()> {
    let affected = db::mark_dead(pool, id).await.map_err(CoreError::Database)?;
    if affected == 0 {
        return Err(CoreError::WorkerNotFound { id: id.to_string() });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tx_test_utils::create_memory_db;

    async fn start_orchestrator(pool: &sqlx::SqlitePool, pool_size: i64) {
        orchestrator::start(pool, pool_size, 10, Utc::now()).await.unwrap();
    }

    #[tokio::test]
    async fn register_fails_when_orchestrator_stopped() {
        let pool = create_memory_db().await;
        let err = register(&pool, None, "w", "h", 1, &serde_json::json!([])).await.unwrap_err();
        assert!(matches!(err, CoreError::Registration { .. }));
    }

    #[tokio::test]
    async fn register_fails_when_pool_is_full() {
        let pool = create_memory_db().await;
        start_orchestrator(&pool, 1).await;

        register(&pool, Some("w1"), "w1", "h", 1, &serde_json::json!([])).await.unwrap();
        let err = register(&pool, Some("w2"), "w2", "h", 1, &serde_json::json!([])).await.unwrap_err();
        assert!(matches!(err, CoreError::Registration { .. }));
    }

    #[tokio::test]
    async fn heartbeat_updates_status_and_current_task() {
        let pool = create_memory_db().await;
        start_orchestrator(&pool, 5).await;
        register(&pool, Some("w1"), "w1", "h", 1, &serde_json::json!([])).await.unwrap();

        heartbeat(&pool, "w1", Utc::now(), WorkerStatus::Busy, Some("t1")).await.unwrap();
        let w = get(&pool, "w1").await.unwrap();
        assert_eq!(w.status, WorkerStatus::Busy);
        assert_eq!(w.current_task_id.as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn find_dead_respects_threshold() {
        let pool = create_memory_db().await;
        start_orchestrator(&pool, 5).await;
        let now = Utc::now();
        register(&pool, Some("w1"), "w1", "h", 1, &serde_json::json!([])).await.unwrap();
        heartbeat(&pool, "w1", now - chrono::Duration::seconds(100), WorkerStatus::Idle, None)
            .await
            .unwrap();

        let dead = find_dead(&pool, now, 3, 10).await.unwrap();
        assert_eq!(dead.len(), 1);
    }
}
