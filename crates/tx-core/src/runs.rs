//! Run Recorder service (§4.7): execution attempts, heartbeats, and stall
//! detection, layered on `tx_db::queries::runs`.

use chrono::{DateTime, Utc};
use rand::Rng;

use tx_db::models::{Run, RunStatus};
use tx_db::queries::runs as db;

use crate::error::{CoreError, Result};

/// `run-` followed by 16 lowercase hex digits (§3).
fn generate_run_id() -> String {
    let suffix: u64 = rand::rng().random();
    format!("run-{suffix:016x}")
}

#[allow(clippy::too_many_arguments)]
pub async fn create(
    pool: &sqlx::SqlitePool,
    task_id: Option<&str>,
    agent: &str,
    pid: Option<i64>,
    transcript_path: Option<&str>,
    stdout_path: Option<&str>,
    stderr_path: Option<&str>,
) -> Result<Run> {
    let id = generate_run_id();
    let now = Utc::now();
    db::create_run(pool, &id, task_id, agent, now, pid, transcript_path, stdout_path, stderr_path)
        .await
        .map_err(CoreError::Database)
}

pub async fn get(pool: &sqlx::SqlitePool, id: &str) -> Result<Run> {
    db::get_run(pool, id)
        .await
        .map_err(CoreError::Database)?
        .ok_or_else(|| CoreError::RunNotFound { id: id.to_string() })
}

pub async fn find_by_task(pool: &sqlx::SqlitePool, task_id: &str) -> Result<Vec<Run>> {
    db::find_by_task(pool, task_id).await.map_err(CoreError::Database)
}

pub async fn find_recent(pool: &sqlx::SqlitePool, limit: i64) -> Result<Vec<Run>> {
    db::find_recent(pool, limit).await.map_err(CoreError::Database)
}

pub async fn count_by_status(pool: &sqlx::SqlitePool, status: RunStatus) -> Result<i64> {
    db::count_by_status(pool, status).await.map_err(CoreError::Database)
}

/// A patch describing how a run finished (§4.7 `update`). Setting a
/// terminal status without `ended_at` fills it with `now`.
#[derive(Debug)]
pub struct RunFinish {
    pub status: RunStatus,
    pub exit_code: Option<i64>,
    pub summary: Option<String>,
    pub error_message: Option<String>,
}

pub async fn finish(pool: &sqlx::SqlitePool, id: &str, patch: RunFinish, now: DateTime<Utc>) -> Result<Run> {
    let affected = db::finish_run(
        pool,
        id,
        patch.status,
        now,
        patch.exit_code,
        patch.summary.as_deref(),
        patch.error_message.as_deref(),
    )
    .await
    .map_err(CoreError::Database)?;
    if affected == 0 {
        return Err(CoreError::Validation {
            reason: format!("run {id} is not running or does not exist"),
        });
    }
    get(pool, id).await
}

#[allow(clippy::too_many_arguments)]
pub async fn heartbeat(
    pool: &sqlx::SqlitePool,
    run_id: &str,
    check_at: DateTime<Utc>,
    activity_at: Option<DateTime<Utc>>,
    stdout_bytes: i64,
    stderr_bytes: i64,
    transcript_bytes: i64,
) -> Result<()> {
    db::record_heartbeat(pool, run_id, check_at, activity_at, stdout_bytes, stderr_bytes, transcript_bytes)
        .await
        .map_err(CoreError::Database)
}

/// Running runs whose last activity precedes `idle_seconds` before `now`
/// (§4.7 `list_stalled`).
pub async fn list_stalled(pool: &sqlx::SqlitePool, now: DateTime<Utc>, idle_seconds: i64) -> Result<Vec<Run>> {
    let stall_before = now - chrono::Duration::seconds(idle_seconds);
    db::list_stalled(pool, stall_before).await.map_err(CoreError::Database)
}

/// Transition stalled runs to `timeout`, optionally resetting their task
/// back to `ready` (§4.7 `reap_stalled`).
pub async fn reap_stalled(
    pool: &sqlx::SqlitePool,
    now: DateTime<Utc>,
    idle_seconds: i64,
    dry_run: bool,
    reset_task: bool,
) -> Result<Vec<Run>> {
    let stalled = list_stalled(pool, now, idle_seconds).await?;
    if dry_run {
        return Ok(stalled);
    }
    for run in &stalled {
        finish(
            pool,
            &run.id,
            RunFinish {
                status: RunStatus::Timeout,
                exit_code: None,
                summary: None,
                error_message: Some("reaped: no activity within the idle window".into()),
            },
            now,
        )
        .await?;
        if reset_task {
            if let Some(task_id) = &run.task_id {
                // A claimed task's status is `active`, and `active -> ready` is not
                // in the lifecycle table (§3), so the reset goes through the
                // allowed `active -> blocked -> ready` hop. A task that stalled
                // before ever reaching `active` is already workable and needs no
                // transition.
                let task = crate::graph::get(pool, task_id).await?;
                if task.status == tx_db::models::TaskStatus::Active {
                    crate::graph::update(
                        pool,
                        task_id,
                        crate::graph::TaskPatch {
                            status: Some(tx_db::models::TaskStatus::Blocked),
                            ..Default::default()
                        },
                    )
                    .await?;
                    crate::graph::update(
                        pool,
                        task_id,
                        crate::graph::TaskPatch {
                            status: Some(tx_db::models::TaskStatus::Ready),
                            ..Default::default()
                        },
                    )
                    .await?;
                }
            }
        }
    }
    Ok(stalled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tx_test_utils::create_memory_db;

    #[tokio::test]
    async fn create_then_finish_sets_ended_at() {
        let pool = create_memory_db().await;
        let run = create(&pool, None, "claude", None, None, None, None).await.unwrap();
        assert_eq!(run.status, RunStatus::Running);

        let finished = finish(
            &pool,
            &run.id,
            RunFinish { status: RunStatus::Completed, exit_code: Some(0), summary: None, error_message: None },
            Utc::now(),
        )
        .await
        .unwrap();
        assert!(finished.ended_at.is_some());
    }

    #[tokio::test]
    async fn reap_stalled_dry_run_does_not_mutate() {
        let pool = create_memory_db().await;
        let now = Utc::now();
        let run = create(&pool, None, "claude", None, None, None, None).await.unwrap();
        heartbeat(&pool, &run.id, now - chrono::Duration::seconds(600), Some(now - chrono::Duration::seconds(600)), 0, 0, 0)
            .await
            .unwrap();

        let stalled = reap_stalled(&pool, now, 60, true, false).await.unwrap();
        assert_eq!(stalled.len(), 1);

        let refreshed = get(&pool, &run.id).await.unwrap();
        assert_eq!(refreshed.status, RunStatus::Running);
    }

    #[tokio::test]
    async fn reap_stalled_resets_active_task_to_ready() {
        let pool = create_memory_db().await;
        let now = Utc::now();
        let task = crate::graph::create(&pool, "t", "", None, 0).await.unwrap();
        crate::graph::update(
            &pool,
            &task.id,
            crate::graph::TaskPatch { status: Some(tx_db::models::TaskStatus::Active), ..Default::default() },
        )
        .await
        .unwrap();

        let run = create(&pool, Some(&task.id), "claude", None, None, None, None).await.unwrap();
        heartbeat(&pool, &run.id, now - chrono::Duration::seconds(600), Some(now - chrono::Duration::seconds(600)), 0, 0, 0)
            .await
            .unwrap();

        reap_stalled(&pool, now, 60, false, true).await.unwrap();

        let refreshed = crate::graph::get(&pool, &task.id).await.unwrap();
        assert_eq!(refreshed.status, tx_db::models::TaskStatus::Ready);
    }

    #[tokio::test]
    async fn reap_stalled_marks_timeout() {
        let pool = create_memory_db().await;
        let now = Utc::now();
        let run = create(&pool, None, "claude", None, None, None, None).await.unwrap();
        heartbeat(&pool, &run.id, now - chrono::Duration::seconds(600), Some(now - chrono::Duration::seconds(600)), 0, 0, 0)
            .await
            .unwrap();

        reap_stalled(&pool, now, 60, false, false).await.unwrap();
        let refreshed = get(&pool, &run.id).await.unwrap();
        assert_eq!(refreshed.status, RunStatus::Timeout);
    }
}
