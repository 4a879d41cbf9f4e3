//! Database query functions for the `tasks` and `task_dependencies` tables
//! (§4.2, §4.3).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::models::{Task, TaskStatus};

/// Insert a new task row.
#[allow(clippy::too_many_arguments)]
pub async fn insert_task(
    pool: &sqlx::SqlitePool,
    id: &str,
    title: &str,
    description: &str,
    parent_id: Option<&str>,
    score: i64,
    now: DateTime<Utc>,
) -> Result<Task> {
    let metadata = serde_json::json!({});
    sqlx::query(
        "INSERT INTO tasks (id, title, description, status, parent_id, score, created_at, updated_at, metadata) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(title)
    .bind(description)
    .bind(TaskStatus::Backlog)
    .bind(parent_id)
    .bind(score)
    .bind(now)
    .bind(now)
    .bind(metadata.to_string())
    .execute(pool)
    .await
    .context("failed to insert task")?;

    get_task(pool, id)
        .await?
        .context("inserted task vanished before it could be read back")
}

/// Fetch a single task by id.
pub async fn get_task(pool: &sqlx::SqlitePool, id: &str) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch task")?;
    Ok(task)
}

/// List every task, ordered by creation time.
pub async fn list_tasks(pool: &sqlx::SqlitePool) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>("SELECT * FROM tasks ORDER BY created_at ASC")
        .fetch_all(pool)
        .await
        .context("failed to list tasks")?;
    Ok(tasks)
}

/// Atomically transition a task's status, optionally stamping `completed_at`.
///
/// Optimistic lock: the `WHERE` clause includes `status = ?`, matching the
/// teacher's `transition_task_status` pattern, so the row only updates if
/// the caller's view of the current status is still accurate.
pub async fn transition_status(
    pool: &sqlx::SqlitePool,
    id: &str,
    from: TaskStatus,
    to: TaskStatus,
    now: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks SET status = ?, updated_at = ?, completed_at = ? WHERE id = ? AND status = ?",
    )
    .bind(to)
    .bind(now)
    .bind(completed_at)
    .bind(id)
    .bind(from)
    .execute(pool)
    .await
    .context("failed to transition task status")?;
    Ok(result.rows_affected())
}

/// Update a task's title, description, and score in place, bumping
/// `updated_at`. Unlike [`transition_status`] this touches no status column,
/// so it carries no optimistic lock.
pub async fn update_fields(
    pool: &sqlx::SqlitePool,
    id: &str,
    title: &str,
    description: &str,
    score: i64,
    now: DateTime<Utc>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks SET title = ?, description = ?, score = ?, updated_at = ? WHERE id = ?",
    )
    .bind(title)
    .bind(description)
    .bind(score)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await
    .context("failed to update task fields")?;
    Ok(result.rows_affected())
}

/// Delete a task row. Callers are responsible for cascading dependency
/// removal first (§4.2 `remove`).
pub async fn delete_task(pool: &sqlx::SqlitePool, id: &str) -> Result<u64> {
    let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .context("failed to delete task")?;
    Ok(result.rows_affected())
}

/// Child tasks whose `parent_id` is this task.
pub async fn list_children(pool: &sqlx::SqlitePool, parent_id: &str) -> Result<Vec<Task>> {
    let tasks =
        sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE parent_id = ? ORDER BY created_at ASC")
            .bind(parent_id)
            .fetch_all(pool)
            .await
            .context("failed to list children")?;
    Ok(tasks)
}

/// Tasks with no parent.
pub async fn list_roots(pool: &sqlx::SqlitePool) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks WHERE parent_id IS NULL ORDER BY created_at ASC",
    )
    .fetch_all(pool)
    .await
    .context("failed to list roots")?;
    Ok(tasks)
}

/// Insert a blocker dependency. Idempotent via `INSERT OR IGNORE`.
pub async fn insert_dependency(
    pool: &sqlx::SqlitePool,
    blocker_id: &str,
    blocked_id: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "INSERT OR IGNORE INTO task_dependencies (blocker_id, blocked_id, created_at) VALUES (?, ?, ?)",
    )
    .bind(blocker_id)
    .bind(blocked_id)
    .bind(now)
    .execute(pool)
    .await
    .context("failed to insert task dependency")?;
    Ok(())
}

/// Remove a blocker dependency. Idempotent: removing a non-existent pair is
/// not an error (§4.2 `remove_blocker`).
pub async fn remove_dependency(
    pool: &sqlx::SqlitePool,
    blocker_id: &str,
    blocked_id: &str,
) -> Result<u64> {
    let result = sqlx::query("DELETE FROM task_dependencies WHERE blocker_id = ? AND blocked_id = ?")
        .bind(blocker_id)
        .bind(blocked_id)
        .execute(pool)
        .await
        .context("failed to remove task dependency")?;
    Ok(result.rows_affected())
}

/// Remove every dependency row that mentions `task_id`, used when cascading
/// a task removal (§4.2 `remove`).
pub async fn remove_dependencies_touching(pool: &sqlx::SqlitePool, task_id: &str) -> Result<u64> {
    let result = sqlx::query("DELETE FROM task_dependencies WHERE blocker_id = ? OR blocked_id = ?")
        .bind(task_id)
        .bind(task_id)
        .execute(pool)
        .await
        .context("failed to remove dependencies touching task")?;
    Ok(result.rows_affected())
}

/// Ids of tasks that block `blocked_id` (its `blocked_by` set).
pub async fn list_blocker_ids(pool: &sqlx::SqlitePool, blocked_id: &str) -> Result<Vec<String>> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT blocker_id FROM task_dependencies WHERE blocked_id = ?")
            .bind(blocked_id)
            .fetch_all(pool)
            .await
            .context("failed to list blocker ids")?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Ids of tasks that `blocker_id` blocks (its `blocks` set).
pub async fn list_blocked_ids(pool: &sqlx::SqlitePool, blocker_id: &str) -> Result<Vec<String>> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT blocked_id FROM task_dependencies WHERE blocker_id = ?")
            .bind(blocker_id)
            .fetch_all(pool)
            .await
            .context("failed to list blocked ids")?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Tasks that are ready to work: workable status, every blocker done, and
/// (when `exclude_claimed`) no active claim. A single join against tasks,
/// dependencies, and claims, following the `NOT EXISTS` shape used by the
/// teacher's `get_ready_tasks` (adapted from `pending`/`passed` to the
/// eight-state lifecycle).
pub async fn get_ready(
    pool: &sqlx::SqlitePool,
    exclude_claimed: bool,
    limit: i64,
) -> Result<Vec<Task>> {
    let sql = if exclude_claimed {
        "SELECT t.* FROM tasks t \
         WHERE t.status IN ('backlog', 'ready', 'planning') \
           AND NOT EXISTS ( \
               SELECT 1 FROM task_dependencies td \
               JOIN tasks dep ON dep.id = td.blocker_id \
               WHERE td.blocked_id = t.id AND dep.status != 'done' \
           ) \
           AND NOT EXISTS ( \
               SELECT 1 FROM task_claims c WHERE c.task_id = t.id AND c.status = 'active' \
           ) \
         ORDER BY t.score DESC, t.id ASC \
         LIMIT ?"
    } else {
        "SELECT t.* FROM tasks t \
         WHERE t.status IN ('backlog', 'ready', 'planning') \
           AND NOT EXISTS ( \
               SELECT 1 FROM task_dependencies td \
               JOIN tasks dep ON dep.id = td.blocker_id \
               WHERE td.blocked_id = t.id AND dep.status != 'done' \
           ) \
         ORDER BY t.score DESC, t.id ASC \
         LIMIT ?"
    };

    let tasks = sqlx::query_as::<_, Task>(sql)
        .bind(limit)
        .fetch_all(pool)
        .await
        .context("failed to compute ready tasks")?;
    Ok(tasks)
}

/// Whether `task_id` is ready right now, per the same predicate as
/// [`get_ready`] (§4.3, used by `get_with_deps`'s `is_ready` field).
pub async fn is_ready(pool: &sqlx::SqlitePool, task_id: &str, exclude_claimed: bool) -> Result<bool> {
    let task = get_task(pool, task_id).await?;
    let Some(task) = task else {
        return Ok(false);
    };
    if !task.status.is_workable() {
        return Ok(false);
    }
    let blockers = list_blocker_ids(pool, task_id).await?;
    for blocker_id in blockers {
        let Some(blocker) = get_task(pool, &blocker_id).await? else {
            continue;
        };
        if blocker.status != TaskStatus::Done {
            return Ok(false);
        }
    }
    if exclude_claimed {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM task_claims WHERE task_id = ? AND status = 'active'")
                .bind(task_id)
                .fetch_optional(pool)
                .await
                .context("failed to check active claim")?;
        if row.is_some() {
            return Ok(false);
        }
    }
    Ok(true)
}
