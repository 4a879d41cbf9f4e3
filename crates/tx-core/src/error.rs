//! Error types for the `tx-core` service layer (§4.2-§4.11).
//!
//! The Store (`tx-db`) surfaces `anyhow::Error` for I/O and constraint
//! failures; this layer wraps those alongside named, structured errors so
//! callers can match on failure kind instead of parsing messages.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("task {id} not found")]
    TaskNotFound { id: String },

    #[error("worker {id} not found")]
    WorkerNotFound { id: String },

    #[error("claim not found for task {task_id} and worker {worker_id}")]
    ClaimNotFound { task_id: String, worker_id: String },

    #[error("run {id} not found")]
    RunNotFound { id: String },

    #[error("learning {id} not found")]
    LearningNotFound { id: String },

    #[error("validation failed: {reason}")]
    Validation { reason: String },

    #[error("task {id} has children and no cascade flag was set")]
    HasChildren { id: String, child_ids: Vec<String> },

    #[error("adding blocker {blocker_id} to {blocked_id} would create a cycle")]
    CircularDependency { blocker_id: String, blocked_id: String },

    #[error("task {task_id} is already claimed by worker {claimed_by}")]
    AlreadyClaimed { task_id: String, claimed_by: String },

    #[error("lease for task {task_id} held by worker {worker_id} has expired")]
    LeaseExpired { task_id: String, worker_id: String },

    #[error("claim for task {task_id} has exhausted its {max} renewals")]
    MaxRenewalsExceeded { task_id: String, max: u32 },

    #[error("cannot register worker: pool is at capacity ({worker_pool_size}) or orchestrator is not running")]
    Registration { worker_pool_size: i64 },

    #[error("learning {id} has embedding dimension {got}, expected {expected}")]
    EmbeddingDimensionMismatch { id: String, expected: usize, got: usize },

    #[error(transparent)]
    Database(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
