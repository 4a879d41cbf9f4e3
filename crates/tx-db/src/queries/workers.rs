//! Database query functions for the `workers` table (§4.4).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::models::{Worker, WorkerStatus};

/// Count workers that are not `dead` (used to enforce `worker_pool_size`).
pub async fn count_non_dead(pool: &sqlx::SqlitePool) -> Result<i64> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM workers WHERE status != 'dead'")
        .fetch_one(pool)
        .await
        .context("failed to count non-dead workers")?;
    Ok(row.0)
}

#[allow(clippy::too_many_arguments)]
pub async fn insert_worker(
    pool: &sqlx::SqlitePool,
    id: &str,
    name: &str,
    hostname: &str,
    pid: i64,
    capabilities: &serde_json::Value,
    now: DateTime<Utc>,
) -> Result<Worker> {
    sqlx::query(
        "INSERT INTO workers (id, name, hostname, pid, status, registered_at, last_heartbeat_at, capabilities, metadata) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(name)
    .bind(hostname)
    .bind(pid)
    .bind(WorkerStatus::Starting)
    .bind(now)
    .bind(now)
    .bind(capabilities.to_string())
    .bind("{}")
    .execute(pool)
    .await
    .context("failed to insert worker")?;

    get_worker(pool, id)
        .await?
        .context("inserted worker vanished before it could be read back")
}

pub async fn get_worker(pool: &sqlx::SqlitePool, id: &str) -> Result<Option<Worker>> {
    let worker = sqlx::query_as::<_, Worker>("SELECT * FROM workers WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch worker")?;
    Ok(worker)
}

pub async fn list_workers(pool: &sqlx::SqlitePool) -> Result<Vec<Worker>> {
    let workers = sqlx::query_as::<_, Worker>("SELECT * FROM workers ORDER BY registered_at ASC")
        .fetch_all(pool)
        .await
        .context("failed to list workers")?;
    Ok(workers)
}

/// Atomic heartbeat update (§4.4): last_heartbeat_at, status, current task.
pub async fn heartbeat(
    pool: &sqlx::SqlitePool,
    id: &str,
    timestamp: DateTime<Utc>,
    status: WorkerStatus,
    current_task_id: Option<&str>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE workers SET last_heartbeat_at = ?, status = ?, current_task_id = ? WHERE id = ?",
    )
    .bind(timestamp)
    .bind(status)
    .bind(current_task_id)
    .bind(id)
    .execute(pool)
    .await
    .context("failed to record worker heartbeat")?;
    Ok(result.rows_affected())
}

pub async fn deregister(pool: &sqlx::SqlitePool, id: &str) -> Result<u64> {
    let result = sqlx::query("DELETE FROM workers WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .context("failed to deregister worker")?;
    Ok(result.rows_affected())
}

/// Workers that have missed `missed_heartbeats * heartbeat_interval_seconds`
/// and are not already marked dead.
pub async fn find_dead(
    pool: &sqlx::SqlitePool,
    now: DateTime<Utc>,
    missed_heartbeats: u32,
    heartbeat_interval_seconds: i64,
) -> Result<Vec<Worker>> {
    let threshold = now
        - chrono::Duration::seconds(i64::from(missed_heartbeats) * heartbeat_interval_seconds);
    let workers = sqlx::query_as::<_, Worker>(
        "SELECT * FROM workers WHERE status != 'dead' AND last_heartbeat_at < ?",
    )
    .bind(threshold)
    .fetch_all(pool)
    .await
    .context("failed to find dead workers")?;
    Ok(workers)
}

pub async fn mark_dead(pool: &sqlx::SqlitePool, id: &str) -> Result<u64> {
    let result = sqlx::query("UPDATE workers SET status = ? WHERE id = ?")
        .bind(WorkerStatus::Dead)
        .bind(id)
        .execute(pool)
        .await
        .context("failed to mark worker dead")?;
    Ok(result.rows_affected())
}

pub async fn set_current_task(
    pool: &sqlx::SqlitePool,
    id: &str,
    current_task_id: Option<&str>,
    status: WorkerStatus,
) -> Result<u64> {
    let result = sqlx::query("UPDATE workers SET current_task_id = ?, status = ? WHERE id = ?")
        .bind(current_task_id)
        .bind(status)
        .bind(id)
        .execute(pool)
        .await
        .context("failed to update worker's current task")?;
    Ok(result.rows_affected())
}
