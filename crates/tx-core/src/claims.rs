//! Claim Manager service (§4.5): claim/renew/release layered on the Store's
//! unique-partial-index primitive, plus the worker-state side effects
//! required alongside each transition.

use chrono::{DateTime, Utc};

use tx_db::models::{Claim, WorkerStatus};
use tx_db::queries::{claims as claims_db, tasks as tasks_db, workers as workers_db};

use crate::error::{CoreError, Result};

/// Default lease duration, used when callers don't override it (§9).
pub const DEFAULT_LEASE_DURATION_SECONDS: i64 = 60;
pub const DEFAULT_MAX_RENEWALS: u32 = 5;

/// Claim a task for a worker (§4.5 `claim`).
pub async fn claim(
    pool: &sqlx::SqlitePool,
    task_id: &str,
    worker_id: &str,
    now: DateTime<Utc>,
    lease_duration_seconds: i64,
) -> Result<Claim> {
    if tasks_db::get_task(pool, task_id).await.map_err(CoreError::Database)?.is_none() {
        return Err(CoreError::TaskNotFound { id: task_id.to_string() });
    }
    let worker = workers_db::get_worker(pool, worker_id)
        .await
        .map_err(CoreError::Database)?
        .ok_or_else(|| CoreError::WorkerNotFound { id: worker_id.to_string() })?;
    if worker.status == WorkerStatus::Dead {
        return Err(CoreError::WorkerNotFound { id: worker_id.to_string() });
    }

    let lease_expires_at = now + chrono::Duration::seconds(lease_duration_seconds);
    let claim = claims_db::claim(pool, task_id, worker_id, now, lease_expires_at)
        .await
        .map_err(CoreError::Database)?;

    let Some(claim) = claim else {
        let existing = claims_db::get_active_claim(pool, task_id)
            .await
            .map_err(CoreError::Database)?;
        let claimed_by = existing.map(|c| c.worker_id).unwrap_or_default();
        return Err(CoreError::AlreadyClaimed { task_id: task_id.to_string(), claimed_by });
    };

    workers_db::set_current_task(pool, worker_id, Some(task_id), WorkerStatus::Busy)
        .await
        .map_err(CoreError::Database)?;

    Ok(claim)
}

/// Renew an active claim's lease (§4.5 `renew`).
pub async fn renew(
    pool: &sqlx::SqlitePool,
    task_id: &str,
    worker_id: &str,
    now: DateTime<Utc>,
    lease_duration_seconds: i64,
    max_renewals: u32,
) -> Result<Claim> {
    let claim = claims_db::get_active_claim(pool, task_id)
        .await
        .map_err(CoreError::Database)?
        .filter(|c| c.worker_id == worker_id)
        .ok_or_else(|| CoreError::ClaimNotFound {
            task_id: task_id.to_string(),
            worker_id: worker_id.to_string(),
        })?;

    if claim.lease_expires_at <= now {
        return Err(CoreError::LeaseExpired {
            task_id: task_id.to_string(),
            worker_id: worker_id.to_string(),
        });
    }
    if claim.renewed_count as u32 >= max_renewals {
        return Err(CoreError::MaxRenewalsExceeded { task_id: task_id.to_string(), max: max_renewals });
    }

    let new_lease_expires_at = now + chrono::Duration::seconds(lease_duration_seconds);
    let affected = claims_db::renew(pool, claim.id, new_lease_expires_at)
        .await
        .map_err(CoreError::Database)?;
    if affected == 0 {
        return Err(CoreError::LeaseExpired {
            task_id: task_id.to_string(),
            worker_id: worker_id.to_string(),
        });
    }

    claims_db::get_active_claim(pool, task_id)
        .await
        .map_err(CoreError::Database)?
        .ok_or_else(|| CoreError::ClaimNotFound {
            task_id: task_id.to_string(),
            worker_id: worker_id.to_string(),
        })
}

/// Release a claim voluntarily (§4.5 `release`).
pub async fn release(pool: &sqlx::SqlitePool, task_id: &str, worker_id: &str) -> Result<()> {
    let claim = claims_db::get_active_claim(pool, task_id)
        .await
        .map_err(CoreError::Database)?
        .filter(|c| c.worker_id == worker_id)
        .ok_or_else(|| CoreError::ClaimNotFound {
            task_id: task_id.to_string(),
            worker_id: worker_id.to_string(),
        })?;

    claims_db::release(pool, claim.id).await.map_err(CoreError::Database)?;
    workers_db::set_current_task(pool, worker_id, None, WorkerStatus::Idle)
        .await
        .map_err(CoreError::Database)?;
    Ok(())
}

/// Bulk-release every active claim held by a worker, e.g. on shutdown or
/// dead-worker reclamation (§4.5 `release_by_worker`).
pub async fn release_by_worker(pool: &sqlx::SqlitePool, worker_id: &str) -> Result<u64> {
    claims_db::release_by_worker(pool, worker_id).await.map_err(CoreError::Database)
}

/// Like [`release_by_worker`], but also returns the freed task ids and clears
/// the worker's `current_task_id`. Used by the orchestrator's dead-worker
/// sweep (§4.6), after the worker has already been marked dead, so it keeps
/// the worker's status as [`WorkerStatus::Dead`] rather than resetting it to
/// idle.
pub async fn release_by_worker_reclaiming(pool: &sqlx::SqlitePool, worker_id: &str) -> Result<Vec<String>> {
    let active = claims_db::list_active_by_worker(pool, worker_id).await.map_err(CoreError::Database)?;
    let task_ids: Vec<String> = active.iter().map(|c| c.task_id.clone()).collect();
    claims_db::release_by_worker(pool, worker_id).await.map_err(CoreError::Database)?;
    workers_db::set_current_task(pool, worker_id, None, WorkerStatus::Dead)
        .await
        .map_err(CoreError::Database)?;
    Ok(task_ids)
}

pub async fn get_active_claim(pool: &sqlx::SqlitePool, task_id: &str) -> Result<Option<Claim>> {
    claims_db::get_active_claim(pool, task_id).await.map_err(CoreError::Database)
}

/// Expire every claim past its lease and clear the owning worker's current
/// task, returning the freed task ids (§4.5 `sweep_expired`).
pub async fn sweep_expired(pool: &sqlx::SqlitePool, now: DateTime<Utc>) -> Result<Vec<String>> {
    let expired = claims_db::list_expired(pool, now).await.map_err(CoreError::Database)?;
    let mut freed = Vec::with_capacity(expired.len());
    for claim in expired {
        claims_db::sweep_expired(pool, claim.id).await.map_err(CoreError::Database)?;
        if let Some(worker) = workers_db::get_worker(pool, &claim.worker_id)
            .await
            .map_err(CoreError::Database)?
        {
            if worker.current_task_id.as_deref() == Some(claim.task_id.as_str()) {
                workers_db::set_current_task(pool, &claim.worker_id, None, WorkerStatus::Idle)
                    .await
                    .map_err(CoreError::Database)?;
            }
        }
        freed.push(claim.task_id);
    }
    Ok(freed)
}
