//! Database query functions for the `edges` table (§4.10).
//!
//! This module provides raw adjacency primitives only. Graph traversal (BFS
//! neighbor expansion, path existence) is a `tx-core` service concern built
//! on top of [`neighbors_from`] and [`neighbors_into`].

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::models::{Edge, EdgeType, EntityType};

#[allow(clippy::too_many_arguments)]
pub async fn insert_edge(
    pool: &sqlx::SqlitePool,
    id: &str,
    edge_type: EdgeType,
    source_type: EntityType,
    source_id: &str,
    target_type: EntityType,
    target_id: &str,
    weight: f64,
    now: DateTime<Utc>,
) -> Result<Edge> {
    sqlx::query(
        "INSERT INTO edges (id, edge_type, source_type, source_id, target_type, target_id, weight, valid, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?)",
    )
    .bind(id)
    .bind(edge_type)
    .bind(source_type)
    .bind(source_id)
    .bind(target_type)
    .bind(target_id)
    .bind(weight)
    .bind(now)
    .execute(pool)
    .await
    .context("failed to insert edge")?;

    get_edge(pool, id)
        .await?
        .context("inserted edge vanished before it could be read back")
}

pub async fn get_edge(pool: &sqlx::SqlitePool, id: &str) -> Result<Option<Edge>> {
    let edge = sqlx::query_as::<_, Edge>("SELECT * FROM edges WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch edge")?;
    Ok(edge)
}

/// Valid edges pointing outward from an entity (its direct successors).
pub async fn neighbors_from(
    pool: &sqlx::SqlitePool,
    source_type: EntityType,
    source_id: &str,
) -> Result<Vec<Edge>> {
    let edges = sqlx::query_as::<_, Edge>(
        "SELECT * FROM edges WHERE source_type = ? AND source_id = ? AND valid = 1",
    )
    .bind(source_type)
    .bind(source_id)
    .fetch_all(pool)
    .await
    .context("failed to list outgoing edges")?;
    Ok(edges)
}

/// Valid edges pointing inward at an entity (its direct predecessors).
pub async fn neighbors_into(
    pool: &sqlx::SqlitePool,
    target_type: EntityType,
    target_id: &str,
) -> Result<Vec<Edge>> {
    let edges = sqlx::query_as::<_, Edge>(
        "SELECT * FROM edges WHERE target_type = ? AND target_id = ? AND valid = 1",
    )
    .bind(target_type)
    .bind(target_id)
    .fetch_all(pool)
    .await
    .context("failed to list incoming edges")?;
    Ok(edges)
}

/// All valid edges of a given type touching an entity, either direction.
pub async fn by_type_and_entity(
    pool: &sqlx::SqlitePool,
    edge_type: EdgeType,
    entity_type: EntityType,
    entity_id: &str,
) -> Result<Vec<Edge>> {
    let edges = sqlx::query_as::<_, Edge>(
        "SELECT * FROM edges WHERE edge_type = ? AND valid = 1 \
         AND ((source_type = ? AND source_id = ?) OR (target_type = ? AND target_id = ?))",
    )
    .bind(edge_type)
    .bind(entity_type)
    .bind(entity_id)
    .bind(entity_type)
    .bind(entity_id)
    .fetch_all(pool)
    .await
    .context("failed to list edges by type and entity")?;
    Ok(edges)
}

/// Mark an edge invalid, e.g. once its source learning is superseded (§4.10
/// `INVALIDATED_BY`).
pub async fn invalidate(pool: &sqlx::SqlitePool, id: &str) -> Result<u64> {
    let result = sqlx::query("UPDATE edges SET valid = 0 WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .context("failed to invalidate edge")?;
    Ok(result.rows_affected())
}

pub async fn restore(pool: &sqlx::SqlitePool, id: &str) -> Result<u64> {
    let result = sqlx::query("UPDATE edges SET valid = 1 WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .context("failed to restore edge")?;
    Ok(result.rows_affected())
}

pub async fn delete_edge(pool: &sqlx::SqlitePool, id: &str) -> Result<u64> {
    let result = sqlx::query("DELETE FROM edges WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .context("failed to delete edge")?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tx_test_utils::create_memory_db;

    #[tokio::test]
    async fn insert_and_fetch_neighbors() {
        let pool = create_memory_db().await;
        let now = Utc::now();
        insert_edge(
            &pool,
            "e1",
            EdgeType::AnchoredTo,
            EntityType::Learning,
            "l1",
            EntityType::File,
            "src/main.rs",
            1.0,
            now,
        )
        .await
        .unwrap();

        let out = neighbors_from(&pool, EntityType::Learning, "l1").await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].target_id, "src/main.rs");

        let into = neighbors_into(&pool, EntityType::File, "src/main.rs").await.unwrap();
        assert_eq!(into.len(), 1);
    }

    #[tokio::test]
    async fn invalidated_edges_are_excluded_from_neighbors() {
        let pool = create_memory_db().await;
        let now = Utc::now();
        insert_edge(
            &pool,
            "e1",
            EdgeType::SimilarTo,
            EntityType::Learning,
            "l1",
            EntityType::Learning,
            "l2",
            0.5,
            now,
        )
        .await
        .unwrap();

        invalidate(&pool, "e1").await.unwrap();
        let out = neighbors_from(&pool, EntityType::Learning, "l1").await.unwrap();
        assert!(out.is_empty());

        restore(&pool, "e1").await.unwrap();
        let out = neighbors_from(&pool, EntityType::Learning, "l1").await.unwrap();
        assert_eq!(out.len(), 1);
    }
}
