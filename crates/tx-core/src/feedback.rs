//! Feedback Tracker service (§4.11): a thin validating layer over
//! `tx_db::queries::feedback`'s Bayesian aggregation.

use chrono::Utc;
use std::collections::HashMap;

pub use tx_db::queries::feedback::FeedbackEntry;
use tx_db::queries::feedback as db;

use crate::error::{CoreError, Result};

/// Record the outcome of using a set of learnings in a run (§4.11
/// `record_usage`). Rejects an unknown run id.
pub async fn record_usage(pool: &sqlx::SqlitePool, run_id: &str, entries: &[FeedbackEntry<'_>]) -> Result<()> {
    if tx_db::queries::runs::get_run(pool, run_id).await.map_err(CoreError::Database)?.is_none() {
        return Err(CoreError::RunNotFound { id: run_id.to_string() });
    }
    db::record_usage(pool, run_id, entries, Utc::now()).await.map_err(CoreError::Database)
}

pub async fn get_feedback_score(pool: &sqlx::SqlitePool, learning_id: &str) -> Result<f64> {
    db::get_feedback_score(pool, learning_id).await.map_err(CoreError::Database)
}

pub async fn get_feedback_scores(
    pool: &sqlx::SqlitePool,
    learning_ids: &[String],
) -> Result<HashMap<String, f64>> {
    db::get_feedback_scores(pool, learning_ids).await.map_err(CoreError::Database)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tx_test_utils::create_memory_db;

    #[tokio::test]
    async fn record_usage_rejects_unknown_run() {
        let pool = create_memory_db().await;
        let entries = [FeedbackEntry { learning_id: "l1", helpful: true, position: 0 }];
        let err = record_usage(&pool, "missing-run", &entries).await.unwrap_err();
        assert!(matches!(err, CoreError::RunNotFound { .. }));
    }

    #[tokio::test]
    async fn record_usage_then_score_reflects_feedback() {
        let pool = create_memory_db().await;
        let learning = crate::learnings::create(
            &pool,
            "c",
            tx_db::models::LearningSourceType::Manual,
            None,
            &serde_json::json!([]),
            None,
        )
        .await
        .unwrap();
        let run = crate::runs::create(&pool, None, "claude", None, None, None, None).await.unwrap();

        let entries = [FeedbackEntry { learning_id: &learning.id, helpful: true, position: 0 }];
        record_usage(&pool, &run.id, &entries).await.unwrap();

        let score = get_feedback_score(&pool, &learning.id).await.unwrap();
        assert!(score > 0.5);
    }
}
