//! Database query functions for the `task_claims` table (§4.5).
//!
//! The exclusivity invariant ("at most one active claim per task") is
//! enforced by `idx_task_claims_active_per_task`, a unique partial index —
//! not by application logic. A claim attempt against an already-claimed task
//! simply fails the `INSERT` with a uniqueness violation.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::models::{Claim, ClaimStatus};

/// Attempt to claim a task for a worker. Returns `None` if the task already
/// has an active claim (unique index violation), rather than an error, so
/// callers can treat "already claimed" as an ordinary outcome.
pub async fn claim(
    pool: &sqlx::SqlitePool,
    task_id: &str,
    worker_id: &str,
    now: DateTime<Utc>,
    lease_expires_at: DateTime<Utc>,
) -> Result<Option<Claim>> {
    let result = sqlx::query(
        "INSERT INTO task_claims (task_id, worker_id, claimed_at, lease_expires_at, renewed_count, status) \
         VALUES (?, ?, ?, ?, 0, ?)",
    )
    .bind(task_id)
    .bind(worker_id)
    .bind(now)
    .bind(lease_expires_at)
    .bind(ClaimStatus::Active)
    .execute(pool)
    .await;

    match result {
        Ok(inserted) => {
            let id = inserted.last_insert_rowid();
            let claim = sqlx::query_as::<_, Claim>("SELECT * FROM task_claims WHERE id = ?")
                .bind(id)
                .fetch_optional(pool)
                .await
                .context("failed to fetch freshly inserted claim")?;
            Ok(claim)
        }
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Ok(None),
        Err(other) => Err(other).context("failed to claim task"),
    }
}

/// The active claim on a task, if any.
pub async fn get_active_claim(pool: &sqlx::SqlitePool, task_id: &str) -> Result<Option<Claim>> {
    let claim = sqlx::query_as::<_, Claim>(
        "SELECT * FROM task_claims WHERE task_id = ? AND status = 'active'",
    )
    .bind(task_id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch active claim")?;
    Ok(claim)
}

/// Extend an active claim's lease, incrementing `renewed_count`. The `WHERE`
/// clause re-checks `status = 'active'` so a claim that expired or was
/// released between read and write cannot be silently resurrected.
pub async fn renew(
    pool: &sqlx::SqlitePool,
    claim_id: i64,
    new_lease_expires_at: DateTime<Utc>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE task_claims SET lease_expires_at = ?, renewed_count = renewed_count + 1 \
         WHERE id = ? AND status = 'active'",
    )
    .bind(new_lease_expires_at)
    .bind(claim_id)
    .execute(pool)
    .await
    .context("failed to renew claim")?;
    Ok(result.rows_affected())
}

/// Voluntarily release a claim, e.g. on task completion or worker shutdown.
pub async fn release(pool: &sqlx::SqlitePool, claim_id: i64) -> Result<u64> {
    let result = sqlx::query("UPDATE task_claims SET status = ? WHERE id = ? AND status = 'active'")
        .bind(ClaimStatus::Released)
        .bind(claim_id)
        .execute(pool)
        .await
        .context("failed to release claim")?;
    Ok(result.rows_affected())
}

/// Active claims currently held by a worker, used by the orchestrator sweep
/// to learn which tasks to free before releasing them.
pub async fn list_active_by_worker(pool: &sqlx::SqlitePool, worker_id: &str) -> Result<Vec<Claim>> {
    let claims = sqlx::query_as::<_, Claim>(
        "SELECT * FROM task_claims WHERE worker_id = ? AND status = 'active'",
    )
    .bind(worker_id)
    .fetch_all(pool)
    .await
    .context("failed to list active claims by worker")?;
    Ok(claims)
}

/// Release every active claim held by a worker, used on deregistration.
pub async fn release_by_worker(pool: &sqlx::SqlitePool, worker_id: &str) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE task_claims SET status = ? WHERE worker_id = ? AND status = 'active'",
    )
    .bind(ClaimStatus::Released)
    .bind(worker_id)
    .execute(pool)
    .await
    .context("failed to release claims by worker")?;
    Ok(result.rows_affected())
}

/// Claims whose lease has expired but are still marked active — candidates
/// for the sweeper to expire (§4.5, §4.6). A lease expiring exactly at `now`
/// counts as expired.
pub async fn list_expired(pool: &sqlx::SqlitePool, now: DateTime<Utc>) -> Result<Vec<Claim>> {
    let claims = sqlx::query_as::<_, Claim>(
        "SELECT * FROM task_claims WHERE status = 'active' AND lease_expires_at <= ?",
    )
    .bind(now)
    .fetch_all(pool)
    .await
    .context("failed to list expired claims")?;
    Ok(claims)
}

/// Mark a claim expired. Distinct from [`release`] so the Orchestrator can
/// tell voluntary releases and lease timeouts apart when recording events.
pub async fn sweep_expired(pool: &sqlx::SqlitePool, claim_id: i64) -> Result<u64> {
    let result = sqlx::query("UPDATE task_claims SET status = ? WHERE id = ? AND status = 'active'")
        .bind(ClaimStatus::Expired)
        .bind(claim_id)
        .execute(pool)
        .await
        .context("failed to expire claim")?;
    Ok(result.rows_affected())
}

/// Claim history for a task, most recent first.
pub async fn list_for_task(pool: &sqlx::SqlitePool, task_id: &str) -> Result<Vec<Claim>> {
    let claims = sqlx::query_as::<_, Claim>(
        "SELECT * FROM task_claims WHERE task_id = ? ORDER BY claimed_at DESC",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await
    .context("failed to list claims for task")?;
    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tx_test_utils::create_memory_db;

    async fn seed_task(pool: &sqlx::SqlitePool, id: &str) {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO tasks (id, title, description, status, score, created_at, updated_at) \
             VALUES (?, 't', '', 'ready', 0, ?, ?)",
        )
        .bind(id)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .unwrap();
    }

    async fn seed_worker(pool: &sqlx::SqlitePool, id: &str) {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO workers (id, name, hostname, pid, status, registered_at, last_heartbeat_at) \
             VALUES (?, 'w', 'h', 1, 'idle', ?, ?)",
        )
        .bind(id)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn second_claim_on_same_task_is_rejected() {
        let pool = create_memory_db().await;
        seed_task(&pool, "t1").await;
        seed_worker(&pool, "w1").await;
        seed_worker(&pool, "w2").await;

        let now = Utc::now();
        let lease = now + Duration::seconds(60);

        let first = claim(&pool, "t1", "w1", now, lease).await.unwrap();
        assert!(first.is_some());

        let second = claim(&pool, "t1", "w2", now, lease).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn release_then_reclaim_succeeds() {
        let pool = create_memory_db().await;
        seed_task(&pool, "t1").await;
        seed_worker(&pool, "w1").await;
        seed_worker(&pool, "w2").await;

        let now = Utc::now();
        let lease = now + Duration::seconds(60);

        let first = claim(&pool, "t1", "w1", now, lease).await.unwrap().unwrap();
        let released = release(&pool, first.id).await.unwrap();
        assert_eq!(released, 1);

        let second = claim(&pool, "t1", "w2", now, lease).await.unwrap();
        assert!(second.is_some());
    }

    #[tokio::test]
    async fn renew_extends_lease_and_bumps_count() {
        let pool = create_memory_db().await;
        seed_task(&pool, "t1").await;
        seed_worker(&pool, "w1").await;

        let now = Utc::now();
        let lease = now + Duration::seconds(60);
        let c = claim(&pool, "t1", "w1", now, lease).await.unwrap().unwrap();

        let new_lease = now + Duration::seconds(120);
        let affected = renew(&pool, c.id, new_lease).await.unwrap();
        assert_eq!(affected, 1);

        let refreshed = get_active_claim(&pool, "t1").await.unwrap().unwrap();
        assert_eq!(refreshed.renewed_count, 1);
        assert_eq!(refreshed.lease_expires_at, new_lease);
    }

    #[tokio::test]
    async fn list_expired_only_returns_active_past_lease() {
        let pool = create_memory_db().await;
        seed_task(&pool, "t1").await;
        seed_worker(&pool, "w1").await;

        let now = Utc::now();
        let past = now - Duration::seconds(10);
        claim(&pool, "t1", "w1", now, past).await.unwrap();

        let expired = list_expired(&pool, now).await.unwrap();
        assert_eq!(expired.len(), 1);
    }
}
