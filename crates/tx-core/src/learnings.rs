//! Learning Store service (§4.8): CRUD plus usage/outcome bookkeeping on
//! top of `tx_db::queries::learnings`.

use chrono::Utc;
use uuid::Uuid;

use tx_db::models::{Learning, LearningSourceType};
use tx_db::queries::learnings as db;

use crate::error::{CoreError, Result};

pub async fn create(
    pool: &sqlx::SqlitePool,
    content: &str,
    source_type: LearningSourceType,
    source_ref: Option<&str>,
    keywords: &serde_json::Value,
    category: Option<&str>,
) -> Result<Learning> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    db::insert_learning(pool, &id, content, source_type, source_ref, keywords, category, now)
        .await
        .map_err(CoreError::Database)
}

pub async fn get(pool: &sqlx::SqlitePool, id: &str) -> Result<Learning> {
    db::get_learning(pool, id)
        .await
        .map_err(CoreError::Database)?
        .ok_or_else(|| CoreError::LearningNotFound { id: id.to_string() })
}

pub async fn delete(pool: &sqlx::SqlitePool, id: &str) -> Result<()> {
    let affected = db::delete_learning(pool, id).await.map_err(CoreError::Database)?;
    if affected == 0 {
        return Err(CoreError::LearningNotFound { id: id.to_string() });
    }
    Ok(())
}

pub async fn count(pool: &sqlx::SqlitePool) -> Result<i64> {
    db::count(pool).await.map_err(CoreError::Database)
}

pub async fn get_recent(pool: &sqlx::SqlitePool, limit: i64) -> Result<Vec<Learning>> {
    db::get_recent(pool, limit).await.map_err(CoreError::Database)
}

/// Update the stored outcome score (0..1) (§4.8 `update_outcome`).
pub async fn update_outcome(pool: &sqlx::SqlitePool, id: &str, score: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&score) {
        return Err(CoreError::Validation { reason: "outcome score must be in [0, 1]".into() });
    }
    let affected = db::update_outcome_score(pool, id, score).await.map_err(CoreError::Database)?;
    if affected == 0 {
        return Err(CoreError::LearningNotFound { id: id.to_string() });
    }
    Ok(())
}

pub async fn increment_usage(pool: &sqlx::SqlitePool, id: &str) -> Result<()> {
    let affected = db::increment_usage(pool, id, Utc::now()).await.map_err(CoreError::Database)?;
    if affected == 0 {
        return Err(CoreError::LearningNotFound { id: id.to_string() });
    }
    Ok(())
}

/// Attach an embedding vector to a learning (§4.8 `set_embedding`).
pub async fn set_embedding(pool: &sqlx::SqlitePool, id: &str, vector: &[f64]) -> Result<()> {
    let json = serde_json::to_value(vector).expect("f64 vector always serializes");
    let affected = db::set_embedding(pool, id, Some(&json)).await.map_err(CoreError::Database)?;
    if affected == 0 {
        return Err(CoreError::LearningNotFound { id: id.to_string() });
    }
    Ok(())
}

/// Count of learnings with and without an embedding (§4.8
/// `embedding_status`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbeddingStatus {
    pub with_embedding: i64,
    pub without_embedding: i64,
}

pub async fn embedding_status(pool: &sqlx::SqlitePool) -> Result<EmbeddingStatus> {
    let total = db::count(pool).await.map_err(CoreError::Database)?;
    let without_embedding = db::count_missing_embeddings(pool).await.map_err(CoreError::Database)?;
    Ok(EmbeddingStatus { with_embedding: total - without_embedding, without_embedding })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tx_test_utils::create_memory_db;

    #[tokio::test]
    async fn update_outcome_rejects_out_of_range() {
        let pool = create_memory_db().await;
        let l = create(&pool, "c", LearningSourceType::Manual, None, &serde_json::json!([]), None)
            .await
            .unwrap();
        let err = update_outcome(&pool, &l.id, 1.5).await.unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
    }

    #[tokio::test]
    async fn embedding_status_tracks_missing_count() {
        let pool = create_memory_db().await;
        let l1 = create(&pool, "c1", LearningSourceType::Manual, None, &serde_json::json!([]), None)
            .await
            .unwrap();
        create(&pool, "c2", LearningSourceType::Manual, None, &serde_json::json!([]), None)
            .await
            .unwrap();

        let status = embedding_status(&pool).await.unwrap();
        assert_eq!(status, EmbeddingStatus { with_embedding: 0, without_embedding: 2 });

        set_embedding(&pool, &l1.id, &[0.1, 0.2]).await.unwrap();
        let status = embedding_status(&pool).await.unwrap();
        assert_eq!(status, EmbeddingStatus { with_embedding: 1, without_embedding: 1 });
    }
}
