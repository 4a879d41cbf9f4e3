//! Aggregation queries backing the Feedback Tracker (§4.11).
//!
//! Feedback itself is stored as ordinary `USED_IN_RUN` edges (weight 1.0 for
//! helpful, 0.0 otherwise); this module only aggregates them into Bayesian
//! scores. `record_usage` lives here too since it's a thin wrapper over
//! [`edges::insert_edge`] specialized to the feedback shape.

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{EdgeType, EntityType};

/// Prior pseudo-observations (m) at rate 0.5, i.e. α = β = 1.
const PRIOR_OBSERVATIONS: f64 = 2.0;
const PRIOR_RATE: f64 = 0.5;

/// A single feedback entry for [`record_usage`].
pub struct FeedbackEntry<'a> {
    pub learning_id: &'a str,
    pub helpful: bool,
    pub position: i64,
}

/// Record the outcome of using a set of learnings in a run. Empty input is a
/// no-op (§4.11).
pub async fn record_usage(
    pool: &sqlx::SqlitePool,
    run_id: &str,
    entries: &[FeedbackEntry<'_>],
    now: DateTime<Utc>,
) -> Result<()> {
    for entry in entries {
        let weight = if entry.helpful { 1.0 } else { 0.0 };
        let metadata = serde_json::json!({
            "position": entry.position,
            "recorded_at": now.to_rfc3339(),
        });
        sqlx::query(
            "INSERT INTO edges (id, edge_type, source_type, source_id, target_type, target_id, weight, metadata, valid, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(EdgeType::UsedInRun)
        .bind(EntityType::Learning)
        .bind(entry.learning_id)
        .bind(EntityType::Run)
        .bind(run_id)
        .bind(weight)
        .bind(metadata.to_string())
        .bind(now)
        .execute(pool)
        .await
        .context("failed to record feedback edge")?;
    }
    Ok(())
}

fn bayesian_average(helpful_count: f64, total_count: f64) -> f64 {
    (helpful_count + PRIOR_RATE * PRIOR_OBSERVATIONS) / (total_count + PRIOR_OBSERVATIONS)
}

/// Bayesian-averaged helpfulness for a single learning. Neutral (0.5) when
/// there's no feedback yet.
pub async fn get_feedback_score(pool: &sqlx::SqlitePool, learning_id: &str) -> Result<f64> {
    let row: (i64, f64) = sqlx::query_as(
        "SELECT COUNT(*), COALESCE(SUM(weight), 0.0) FROM edges \
         WHERE edge_type = 'USED_IN_RUN' AND valid = 1 AND source_type = 'learning' AND source_id = ?",
    )
    .bind(learning_id)
    .fetch_one(pool)
    .await
    .context("failed to aggregate feedback score")?;
    let (total_count, helpful_count) = row;
    Ok(bayesian_average(helpful_count, total_count as f64))
}

/// Batch form of [`get_feedback_score`], one aggregation query over every
/// requested id. Missing ids fill with the neutral 0.5 (§4.11).
pub async fn get_feedback_scores(
    pool: &sqlx::SqlitePool,
    learning_ids: &[String],
) -> Result<HashMap<String, f64>> {
    let mut scores: HashMap<String, f64> =
        learning_ids.iter().map(|id| (id.clone(), 0.5)).collect();
    if learning_ids.is_empty() {
        return Ok(scores);
    }

    let placeholders = std::iter::repeat("?")
        .take(learning_ids.len())
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT source_id, COUNT(*), COALESCE(SUM(weight), 0.0) FROM edges \
         WHERE edge_type = 'USED_IN_RUN' AND valid = 1 AND source_type = 'learning' \
           AND source_id IN ({placeholders}) \
         GROUP BY source_id"
    );

    let mut query = sqlx::query_as::<_, (String, i64, f64)>(&sql);
    for id in learning_ids {
        query = query.bind(id);
    }
    let rows = query
        .fetch_all(pool)
        .await
        .context("failed to batch-aggregate feedback scores")?;

    for (id, total_count, helpful_count) in rows {
        scores.insert(id, bayesian_average(helpful_count, total_count as f64));
    }
    Ok(scores)
}
