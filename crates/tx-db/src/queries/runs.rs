//! Database query functions for the `runs` and `run_heartbeats` tables (§4.7).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::models::{Run, RunStatus};

#[allow(clippy::too_many_arguments)]
pub async fn create_run(
    pool: &sqlx::SqlitePool,
    id: &str,
    task_id: Option<&str>,
    agent: &str,
    started_at: DateTime<Utc>,
    pid: Option<i64>,
    transcript_path: Option<&str>,
    stdout_path: Option<&str>,
    stderr_path: Option<&str>,
) -> Result<Run> {
    sqlx::query(
        "INSERT INTO runs (id, task_id, agent, started_at, status, pid, transcript_path, stdout_path, stderr_path, metadata) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, '{}')",
    )
    .bind(id)
    .bind(task_id)
    .bind(agent)
    .bind(started_at)
    .bind(RunStatus::Running)
    .bind(pid)
    .bind(transcript_path)
    .bind(stdout_path)
    .bind(stderr_path)
    .execute(pool)
    .await
    .context("failed to insert run")?;

    get_run(pool, id)
        .await?
        .context("inserted run vanished before it could be read back")
}

pub async fn get_run(pool: &sqlx::SqlitePool, id: &str) -> Result<Option<Run>> {
    let run = sqlx::query_as::<_, Run>("SELECT * FROM runs WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch run")?;
    Ok(run)
}

pub async fn find_by_task(pool: &sqlx::SqlitePool, task_id: &str) -> Result<Vec<Run>> {
    let runs = sqlx::query_as::<_, Run>(
        "SELECT * FROM runs WHERE task_id = ? ORDER BY started_at DESC",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await
    .context("failed to find runs by task")?;
    Ok(runs)
}

pub async fn find_recent(pool: &sqlx::SqlitePool, limit: i64) -> Result<Vec<Run>> {
    let runs = sqlx::query_as::<_, Run>("SELECT * FROM runs ORDER BY started_at DESC LIMIT ?")
        .bind(limit)
        .fetch_all(pool)
        .await
        .context("failed to find recent runs")?;
    Ok(runs)
}

pub async fn count_by_status(pool: &sqlx::SqlitePool, status: RunStatus) -> Result<i64> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM runs WHERE status = ?")
        .bind(status)
        .fetch_one(pool)
        .await
        .context("failed to count runs by status")?;
    Ok(row.0)
}

/// Mark a run finished. Terminal statuses require `ended_at` (§3 invariant),
/// so this is the only way to set `status` away from `running`.
#[allow(clippy::too_many_arguments)]
pub async fn finish_run(
    pool: &sqlx::SqlitePool,
    id: &str,
    status: RunStatus,
    ended_at: DateTime<Utc>,
    exit_code: Option<i64>,
    summary: Option<&str>,
    error_message: Option<&str>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE runs SET status = ?, ended_at = ?, exit_code = ?, summary = ?, error_message = ? \
         WHERE id = ? AND status = 'running'",
    )
    .bind(status)
    .bind(ended_at)
    .bind(exit_code)
    .bind(summary)
    .bind(error_message)
    .bind(id)
    .execute(pool)
    .await
    .context("failed to finish run")?;
    Ok(result.rows_affected())
}

/// Record a heartbeat sample for a running run (§4.7 stall detection).
pub async fn record_heartbeat(
    pool: &sqlx::SqlitePool,
    run_id: &str,
    check_at: DateTime<Utc>,
    activity_at: Option<DateTime<Utc>>,
    stdout_bytes: i64,
    stderr_bytes: i64,
    transcript_bytes: i64,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO run_heartbeats (run_id, check_at, activity_at, stdout_bytes, stderr_bytes, transcript_bytes) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(run_id)
    .bind(check_at)
    .bind(activity_at)
    .bind(stdout_bytes)
    .bind(stderr_bytes)
    .bind(transcript_bytes)
    .execute(pool)
    .await
    .context("failed to record run heartbeat")?;
    Ok(())
}

/// The most recent heartbeat recorded for a run, if any.
pub async fn latest_heartbeat(
    pool: &sqlx::SqlitePool,
    run_id: &str,
) -> Result<Option<(DateTime<Utc>, Option<DateTime<Utc>>)>> {
    let row: Option<(DateTime<Utc>, Option<DateTime<Utc>>)> = sqlx::query_as(
        "SELECT check_at, activity_at FROM run_heartbeats WHERE run_id = ? \
         ORDER BY check_at DESC LIMIT 1",
    )
    .bind(run_id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch latest run heartbeat")?;
    Ok(row)
}

/// Running runs whose latest recorded activity is older than `stall_before`
/// (or that have no heartbeat at all and started before `stall_before`).
pub async fn list_stalled(pool: &sqlx::SqlitePool, stall_before: DateTime<Utc>) -> Result<Vec<Run>> {
    let runs = sqlx::query_as::<_, Run>(
        "SELECT r.* FROM runs r \
         WHERE r.status = 'running' \
           AND r.started_at < ? \
           AND NOT EXISTS ( \
               SELECT 1 FROM run_heartbeats h \
               WHERE h.run_id = r.id AND COALESCE(h.activity_at, h.check_at) >= ? \
           ) \
         ORDER BY r.started_at ASC",
    )
    .bind(stall_before)
    .bind(stall_before)
    .fetch_all(pool)
    .await
    .context("failed to list stalled runs")?;
    Ok(runs)
}
