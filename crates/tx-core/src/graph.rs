//! Task Graph service (§4.2): validation, lifecycle transitions, and cycle
//! detection layered on top of `tx_db::queries::tasks`'s raw SQL. Validate
//! first, then delegate to the Store's optimistic-lock update and treat a
//! zero-rows-affected result as either "not found" or "lock failed".

use std::collections::{HashSet, VecDeque};

use chrono::Utc;
use rand::Rng;

use tx_db::models::{Task, TaskStatus};
use tx_db::queries::tasks as db;

use crate::error::{CoreError, Result};

/// `tx-` followed by 8 lowercase hex digits, inside §3's 6-12 alphanumeric
/// id-length window.
fn generate_task_id() -> String {
    let suffix: u32 = rand::rng().random();
    format!("tx-{suffix:08x}")
}

/// A task plus the hierarchy/readiness context `get_with_deps` returns
/// (§4.2).
#[derive(Debug, Clone)]
pub struct TaskWithDeps {
    pub task: Task,
    pub blocked_by: Vec<String>,
    pub blocks: Vec<String>,
    pub children: Vec<Task>,
    pub is_ready: bool,
}

/// The eight-state lifecycle table (§3). `done -> backlog` is present (an
/// explicit reopen), but nothing auto-triggers it (§9 open question).
fn is_valid_transition(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;
    matches!(
        (from, to),
        (Backlog, Ready)
            | (Backlog, Planning)
            | (Backlog, Active)
            | (Backlog, Blocked)
            | (Backlog, Done)
            | (Ready, Planning)
            | (Ready, Active)
            | (Ready, Blocked)
            | (Ready, Done)
            | (Planning, Ready)
            | (Planning, Active)
            | (Planning, Blocked)
            | (Planning, Done)
            | (Active, Blocked)
            | (Active, Review)
            | (Active, Done)
            | (Blocked, Backlog)
            | (Blocked, Ready)
            | (Blocked, Planning)
            | (Blocked, Active)
            | (Review, Active)
            | (Review, HumanNeedsToReview)
            | (Review, Done)
            | (HumanNeedsToReview, Active)
            | (HumanNeedsToReview, Review)
            | (HumanNeedsToReview, Done)
            | (Done, Backlog)
    )
}

/// Create a task. Validates a non-empty title and, if given, that the
/// parent exists (§4.2 `create`).
pub async fn create(
    pool: &sqlx::SqlitePool,
    title: &str,
    description: &str,
    parent_id: Option<&str>,
    score: i64,
) -> Result<Task> {
    if title.trim().is_empty() {
        return Err(CoreError::Validation { reason: "title must not be empty".into() });
    }
    if let Some(parent_id) = parent_id {
        let parent = db::get_task(pool, parent_id).await.map_err(CoreError::Database)?;
        if parent.is_none() {
            return Err(CoreError::TaskNotFound { id: parent_id.to_string() });
        }
    }

    let id = generate_task_id();
    let now = Utc::now();
    db::insert_task(pool, &id, title, description, parent_id, score, now)
        .await
        .map_err(CoreError::Database)
}

pub async fn get(pool: &sqlx::SqlitePool, id: &str) -> Result<Task> {
    db::get_task(pool, id)
        .await
        .map_err(CoreError::Database)?
        .ok_or_else(|| CoreError::TaskNotFound { id: id.to_string() })
}

/// `get(id)` enriched with hierarchy and readiness context (§4.2
/// `get_with_deps`).
pub async fn get_with_deps(pool: &sqlx::SqlitePool, id: &str) -> Result<TaskWithDeps> {
    let task = get(pool, id).await?;
    let blocked_by = db::list_blocker_ids(pool, id).await.map_err(CoreError::Database)?;
    let blocks = db::list_blocked_ids(pool, id).await.map_err(CoreError::Database)?;
    let children = db::list_children(pool, id).await.map_err(CoreError::Database)?;
    let is_ready = db::is_ready(pool, id, true).await.map_err(CoreError::Database)?;
    Ok(TaskWithDeps { task, blocked_by, blocks, children, is_ready })
}

/// A patch to apply via `update` (§4.2). `None` fields are left unchanged.
#[derive(Debug, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub score: Option<i64>,
}

/// Validate and apply a status transition, and any accompanying field
/// changes, to a task (§4.2 `update`).
pub async fn update(pool: &sqlx::SqlitePool, id: &str, patch: TaskPatch) -> Result<Task> {
    let current = get(pool, id).await?;
    let now = Utc::now();

    if let Some(new_status) = patch.status {
        if new_status != current.status && !is_valid_transition(current.status, new_status) {
            return Err(CoreError::Validation {
                reason: format!("invalid transition {} -> {}", current.status, new_status),
            });
        }
        let completed_at = if new_status == TaskStatus::Done { Some(now) } else { None };
        let affected = db::transition_status(pool, id, current.status, new_status, now, completed_at)
            .await
            .map_err(CoreError::Database)?;
        if affected == 0 {
            return Err(CoreError::Validation {
                reason: format!("optimistic lock failed updating task {id}"),
            });
        }
    }

    if patch.title.is_some() || patch.description.is_some() || patch.score.is_some() {
        let title = patch.title.as_deref().unwrap_or(&current.title);
        if title.trim().is_empty() {
            return Err(CoreError::Validation { reason: "title must not be empty".into() });
        }
        let description = patch.description.as_deref().unwrap_or(&current.description);
        let score = patch.score.unwrap_or(current.score);
        db::update_fields(pool, id, title, description, score, now).await.map_err(CoreError::Database)?;
    }

    get(pool, id).await
}

/// Remove a task, cascading dependency rows. Fails with `HasChildren`
/// unless `cascade` is set (§4.2 `remove`).
pub async fn remove(pool: &sqlx::SqlitePool, id: &str, cascade: bool) -> Result<()> {
    get(pool, id).await?;
    let children = db::list_children(pool, id).await.map_err(CoreError::Database)?;
    if !children.is_empty() && !cascade {
        return Err(CoreError::HasChildren {
            id: id.to_string(),
            child_ids: children.into_iter().map(|c| c.id).collect(),
        });
    }
    db::remove_dependencies_touching(pool, id).await.map_err(CoreError::Database)?;
    db::delete_task(pool, id).await.map_err(CoreError::Database)?;
    Ok(())
}

/// Add a blocker dependency after the three checks in §4.2 `add_blocker`:
/// existence, non-self-blocking, and acyclicity.
pub async fn add_blocker(pool: &sqlx::SqlitePool, blocked_id: &str, blocker_id: &str) -> Result<()> {
    if db::get_task(pool, blocked_id).await.map_err(CoreError::Database)?.is_none() {
        return Err(CoreError::TaskNotFound { id: blocked_id.to_string() });
    }
    if db::get_task(pool, blocker_id).await.map_err(CoreError::Database)?.is_none() {
        return Err(CoreError::TaskNotFound { id: blocker_id.to_string() });
    }
    if blocked_id == blocker_id {
        return Err(CoreError::Validation { reason: "a task cannot block itself".into() });
    }
    if would_create_cycle(pool, blocked_id, blocker_id).await? {
        return Err(CoreError::CircularDependency {
            blocker_id: blocker_id.to_string(),
            blocked_id: blocked_id.to_string(),
        });
    }
    db::insert_dependency(pool, blocker_id, blocked_id, Utc::now())
        .await
        .map_err(CoreError::Database)
}

/// Breadth-first search from `blocked_id` following "what does this task
/// block" edges; a cycle would form iff `blocker_id` is reachable, since the
/// new edge would be `blocker_id -> blocked_id` (§4.2).
async fn would_create_cycle(pool: &sqlx::SqlitePool, blocked_id: &str, blocker_id: &str) -> Result<bool> {
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = VecDeque::new();
    queue.push_back(blocked_id.to_string());
    visited.insert(blocked_id.to_string());

    while let Some(current) = queue.pop_front() {
        let next_ids = db::list_blocked_ids(pool, &current).await.map_err(CoreError::Database)?;
        for next_id in next_ids {
            if next_id == blocker_id {
                return Ok(true);
            }
            if visited.insert(next_id.clone()) {
                queue.push_back(next_id);
            }
        }
    }
    Ok(false)
}

/// Idempotent removal of a blocker edge (§4.2 `remove_blocker`).
pub async fn remove_blocker(pool: &sqlx::SqlitePool, blocked_id: &str, blocker_id: &str) -> Result<()> {
    db::remove_dependency(pool, blocker_id, blocked_id).await.map_err(CoreError::Database)?;
    Ok(())
}

pub async fn children(pool: &sqlx::SqlitePool, id: &str) -> Result<Vec<Task>> {
    db::list_children(pool, id).await.map_err(CoreError::Database)
}

pub async fn roots(pool: &sqlx::SqlitePool) -> Result<Vec<Task>> {
    db::list_roots(pool).await.map_err(CoreError::Database)
}

/// Ancestor chain of `id`, nearest first, following `parent_id` up to a
/// root.
pub async fn ancestors(pool: &sqlx::SqlitePool, id: &str) -> Result<Vec<Task>> {
    let mut result = Vec::new();
    let mut current = get(pool, id).await?;
    while let Some(parent_id) = current.parent_id.clone() {
        let parent = get(pool, &parent_id).await?;
        result.push(parent.clone());
        current = parent;
    }
    Ok(result)
}

/// Depth of `id` in the hierarchy: 0 for a root.
pub async fn depth(pool: &sqlx::SqlitePool, id: &str) -> Result<usize> {
    Ok(ancestors(pool, id).await?.len())
}

/// A subtree rooted at `id`, recursively expanded over `parent_id` (§4.2
/// `tree(root)`).
#[derive(Debug, Clone)]
pub struct TaskTree {
    pub task: Task,
    pub children: Vec<TaskTree>,
}

pub async fn tree(pool: &sqlx::SqlitePool, root_id: &str) -> Result<TaskTree> {
    let task = get(pool, root_id).await?;
    let child_rows = db::list_children(pool, root_id).await.map_err(CoreError::Database)?;
    let mut children = Vec::with_capacity(child_rows.len());
    for child in child_rows {
        children.push(Box::pin(tree(pool, &child.id)).await?);
    }
    Ok(TaskTree { task, children })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tx_test_utils::create_memory_db;

    #[tokio::test]
    async fn create_rejects_empty_title() {
        let pool = create_memory_db().await;
        let err = create(&pool, "   ", "", None, 0).await.unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
    }

    #[tokio::test]
    async fn create_rejects_missing_parent() {
        let pool = create_memory_db().await;
        let err = create(&pool, "child", "", Some("nope"), 0).await.unwrap_err();
        assert!(matches!(err, CoreError::TaskNotFound { .. }));
    }

    #[tokio::test]
    async fn add_blocker_rejects_self_block() {
        let pool = create_memory_db().await;
        let t = create(&pool, "t", "", None, 0).await.unwrap();
        let err = add_blocker(&pool, &t.id, &t.id).await.unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
    }

    #[tokio::test]
    async fn add_blocker_detects_cycle() {
        let pool = create_memory_db().await;
        let a = create(&pool, "a", "", None, 0).await.unwrap();
        let b = create(&pool, "b", "", None, 0).await.unwrap();
        let c = create(&pool, "c", "", None, 0).await.unwrap();

        // a blocked by b, b blocked by c: c -> b -> a
        add_blocker(&pool, &a.id, &b.id).await.unwrap();
        add_blocker(&pool, &b.id, &c.id).await.unwrap();

        // a -> c would close the loop: a blocks c, but c already (indirectly) blocks a.
        let err = add_blocker(&pool, &c.id, &a.id).await.unwrap_err();
        assert!(matches!(err, CoreError::CircularDependency { .. }));
    }

    #[tokio::test]
    async fn remove_without_cascade_fails_with_children() {
        let pool = create_memory_db().await;
        let parent = create(&pool, "parent", "", None, 0).await.unwrap();
        create(&pool, "child", "", Some(&parent.id), 0).await.unwrap();

        let err = remove(&pool, &parent.id, false).await.unwrap_err();
        assert!(matches!(err, CoreError::HasChildren { .. }));
    }

    #[tokio::test]
    async fn update_done_stamps_completed_at() {
        let pool = create_memory_db().await;
        let t = create(&pool, "t", "", None, 0).await.unwrap();
        let updated = update(&pool, &t.id, TaskPatch { status: Some(TaskStatus::Done), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(updated.status, TaskStatus::Done);
        assert!(updated.completed_at.is_some());
    }

    #[tokio::test]
    async fn update_rejects_invalid_transition() {
        let pool = create_memory_db().await;
        let t = create(&pool, "t", "", None, 0).await.unwrap();
        let err = update(&pool, &t.id, TaskPatch { status: Some(TaskStatus::Review), ..Default::default() })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
    }

    #[tokio::test]
    async fn get_with_deps_reports_readiness() {
        let pool = create_memory_db().await;
        let blocker = create(&pool, "blocker", "", None, 0).await.unwrap();
        let blocked = create(&pool, "blocked", "", None, 0).await.unwrap();
        add_blocker(&pool, &blocked.id, &blocker.id).await.unwrap();

        let with_deps = get_with_deps(&pool, &blocked.id).await.unwrap();
        assert!(!with_deps.is_ready);
        assert_eq!(with_deps.blocked_by, vec![blocker.id.clone()]);

        update(&pool, &blocker.id, TaskPatch { status: Some(TaskStatus::Done), ..Default::default() })
            .await
            .unwrap();
        let with_deps = get_with_deps(&pool, &blocked.id).await.unwrap();
        assert!(with_deps.is_ready);
    }
}
