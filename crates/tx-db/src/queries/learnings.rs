//! Database query functions for the `learnings` table and its FTS5 index
//! (§4.8).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::models::{Learning, LearningSourceType};

#[allow(clippy::too_many_arguments)]
pub async fn insert_learning(
    pool: &sqlx::SqlitePool,
    id: &str,
    content: &str,
    source_type: LearningSourceType,
    source_ref: Option<&str>,
    keywords: &serde_json::Value,
    category: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Learning> {
    sqlx::query(
        "INSERT INTO learnings (id, content, source_type, source_ref, created_at, keywords, category, usage_count) \
         VALUES (?, ?, ?, ?, ?, ?, ?, 0)",
    )
    .bind(id)
    .bind(content)
    .bind(source_type)
    .bind(source_ref)
    .bind(now)
    .bind(keywords.to_string())
    .bind(category)
    .execute(pool)
    .await
    .context("failed to insert learning")?;

    get_learning(pool, id)
        .await?
        .context("inserted learning vanished before it could be read back")
}

pub async fn get_learning(pool: &sqlx::SqlitePool, id: &str) -> Result<Option<Learning>> {
    let learning = sqlx::query_as::<_, Learning>("SELECT * FROM learnings WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch learning")?;
    Ok(learning)
}

pub async fn delete_learning(pool: &sqlx::SqlitePool, id: &str) -> Result<u64> {
    let result = sqlx::query("DELETE FROM learnings WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .context("failed to delete learning")?;
    Ok(result.rows_affected())
}

pub async fn count(pool: &sqlx::SqlitePool) -> Result<i64> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM learnings")
        .fetch_one(pool)
        .await
        .context("failed to count learnings")?;
    Ok(row.0)
}

/// Most recently created learnings, used as a recency fallback candidate
/// source in the retrieval pipeline (§4.9 step 1).
pub async fn get_recent(pool: &sqlx::SqlitePool, limit: i64) -> Result<Vec<Learning>> {
    let learnings = sqlx::query_as::<_, Learning>(
        "SELECT * FROM learnings ORDER BY created_at DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("failed to fetch recent learnings")?;
    Ok(learnings)
}

/// Record that a learning was surfaced and (eventually) used.
pub async fn increment_usage(pool: &sqlx::SqlitePool, id: &str, now: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE learnings SET usage_count = usage_count + 1, last_used_at = ? WHERE id = ?",
    )
    .bind(now)
    .bind(id)
    .execute(pool)
    .await
    .context("failed to increment learning usage")?;
    Ok(result.rows_affected())
}

/// Update the Bayesian-averaged outcome score (§4.11) computed by the
/// Feedback Tracker.
pub async fn update_outcome_score(pool: &sqlx::SqlitePool, id: &str, score: f64) -> Result<u64> {
    let result = sqlx::query("UPDATE learnings SET outcome_score = ? WHERE id = ?")
        .bind(score)
        .bind(id)
        .execute(pool)
        .await
        .context("failed to update learning outcome score")?;
    Ok(result.rows_affected())
}

/// Attach (or clear) a learning's embedding vector.
pub async fn set_embedding(
    pool: &sqlx::SqlitePool,
    id: &str,
    embedding: Option<&serde_json::Value>,
) -> Result<u64> {
    let result = sqlx::query("UPDATE learnings SET embedding = ? WHERE id = ?")
        .bind(embedding.map(|v| v.to_string()))
        .bind(id)
        .execute(pool)
        .await
        .context("failed to set learning embedding")?;
    Ok(result.rows_affected())
}

/// Count of learnings that still lack an embedding, used to report
/// embedding-backfill progress.
pub async fn count_missing_embeddings(pool: &sqlx::SqlitePool) -> Result<i64> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM learnings WHERE embedding IS NULL")
        .fetch_one(pool)
        .await
        .context("failed to count learnings missing embeddings")?;
    Ok(row.0)
}

/// Every learning that carries a stored embedding, used by the Retriever's
/// vector candidate step (§4.9 step 2) to compute similarity in-core rather
/// than via an external index.
pub async fn list_with_embeddings(pool: &sqlx::SqlitePool) -> Result<Vec<Learning>> {
    let learnings = sqlx::query_as::<_, Learning>("SELECT * FROM learnings WHERE embedding IS NOT NULL")
        .fetch_all(pool)
        .await
        .context("failed to list learnings with embeddings")?;
    Ok(learnings)
}

/// A learning ranked by its BM25 score against an FTS5 query (§4.9 step 2).
#[derive(Debug, Clone)]
pub struct FtsHit {
    pub learning: Learning,
    /// SQLite's `bm25()` is a cost, lower is a better match; this is the raw
    /// value exposed so the caller can normalize and combine via RRF.
    pub bm25_rank: f64,
}

/// Full-text search against `learnings_fts`, joined back to `learnings` via
/// the external-content `rowid` link.
pub async fn bm25_search(pool: &sqlx::SqlitePool, query: &str, k: i64) -> Result<Vec<FtsHit>> {
    let rows: Vec<(String, f64)> = sqlx::query_as(
        "SELECT l.id, bm25(learnings_fts) AS rank \
         FROM learnings_fts \
         JOIN learnings l ON l.rowid = learnings_fts.rowid \
         WHERE learnings_fts MATCH ? \
         ORDER BY rank LIMIT ?",
    )
    .bind(query)
    .bind(k)
    .fetch_all(pool)
    .await
    .context("failed to run bm25 search")?;

    let mut hits = Vec::with_capacity(rows.len());
    for (id, bm25_rank) in rows {
        if let Some(learning) = get_learning(pool, &id).await? {
            hits.push(FtsHit { learning, bm25_rank });
        }
    }
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tx_test_utils::create_memory_db;

    #[tokio::test]
    async fn insert_and_fts_search_roundtrip() {
        let pool = create_memory_db().await;
        let now = Utc::now();
        insert_learning(
            &pool,
            "l1",
            "retrying flaky network calls with exponential backoff",
            LearningSourceType::Manual,
            None,
            &serde_json::json!([]),
            None,
            now,
        )
        .await
        .unwrap();
        insert_learning(
            &pool,
            "l2",
            "always validate user input at system boundaries",
            LearningSourceType::Manual,
            None,
            &serde_json::json!([]),
            None,
            now,
        )
        .await
        .unwrap();

        let hits = bm25_search(&pool, "backoff", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].learning.id, "l1");
    }

    #[tokio::test]
    async fn delete_removes_from_fts_too() {
        let pool = create_memory_db().await;
        let now = Utc::now();
        insert_learning(
            &pool,
            "l1",
            "exponential backoff retry strategy",
            LearningSourceType::Manual,
            None,
            &serde_json::json!([]),
            None,
            now,
        )
        .await
        .unwrap();

        delete_learning(&pool, "l1").await.unwrap();
        let hits = bm25_search(&pool, "backoff", 10).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn usage_and_outcome_updates() {
        let pool = create_memory_db().await;
        let now = Utc::now();
        insert_learning(
            &pool,
            "l1",
            "content",
            LearningSourceType::Run,
            None,
            &serde_json::json!([]),
            None,
            now,
        )
        .await
        .unwrap();

        increment_usage(&pool, "l1", now).await.unwrap();
        update_outcome_score(&pool, "l1", 0.8).await.unwrap();

        let learning = get_learning(&pool, "l1").await.unwrap().unwrap();
        assert_eq!(learning.usage_count, 1);
        assert_eq!(learning.outcome_score, Some(0.8));
    }
}
