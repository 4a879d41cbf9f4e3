//! Edge/Graph service (§4.10): typed-edge CRUD plus BFS traversal over the
//! entity graph (learnings, files, tasks, runs) that the Store's adjacency
//! primitives don't themselves provide.

use std::collections::{HashSet, VecDeque};

use chrono::Utc;
use rand::Rng;

use tx_db::models::{Edge, EdgeType, EntityType};
use tx_db::queries::edges as db;

use crate::error::{CoreError, Result};

fn generate_edge_id() -> String {
    let suffix: u64 = rand::rng().random();
    format!("edge-{suffix:016x}")
}

/// Create an edge. Validates non-empty endpoint ids and a `weight` within
/// `[0, 1]` (§4.10 `create_edge`).
pub async fn create(
    pool: &sqlx::SqlitePool,
    edge_type: EdgeType,
    source_type: EntityType,
    source_id: &str,
    target_type: EntityType,
    target_id: &str,
    weight: f64,
) -> Result<Edge> {
    if source_id.trim().is_empty() || target_id.trim().is_empty() {
        return Err(CoreError::Validation { reason: "edge endpoint ids must not be empty".into() });
    }
    if !(0.0..=1.0).contains(&weight) {
        return Err(CoreError::Validation { reason: format!("edge weight {weight} is out of range [0, 1]") });
    }

    let id = generate_edge_id();
    db::insert_edge(pool, &id, edge_type, source_type, source_id, target_type, target_id, weight, Utc::now())
        .await
        .map_err(CoreError::Database)
}

pub async fn invalidate(pool: &sqlx::SqlitePool, id: &str) -> Result<()> {
    db::invalidate(pool, id).await.map_err(CoreError::Database)?;
    Ok(())
}

/// Undo [`invalidate`] (§4.10 `restore`).
pub async fn restore(pool: &sqlx::SqlitePool, id: &str) -> Result<()> {
    db::restore(pool, id).await.map_err(CoreError::Database)?;
    Ok(())
}

/// Direction to walk when expanding neighbors (§4.10 `find_neighbors`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

/// A node reached during BFS expansion, annotated with its hop distance.
#[derive(Debug, Clone)]
pub struct NeighborNode {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub depth: u32,
    pub via_edge: Edge,
}

/// Breadth-first expansion from an entity out to `max_depth` hops (§4.10
/// `find_neighbors`). Optionally restricted to a set of edge types. The
/// starting node itself is never included in the result.
pub async fn find_neighbors(
    pool: &sqlx::SqlitePool,
    entity_type: EntityType,
    entity_id: &str,
    max_depth: u32,
    direction: Direction,
    edge_types: Option<&[EdgeType]>,
) -> Result<Vec<NeighborNode>> {
    let mut visited: HashSet<(EntityType, String)> = HashSet::new();
    visited.insert((entity_type, entity_id.to_string()));
    let mut queue: VecDeque<(EntityType, String, u32)> = VecDeque::new();
    queue.push_back((entity_type, entity_id.to_string(), 0));
    let mut out = Vec::new();

    while let Some((cur_type, cur_id, depth)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }
        let mut edges = Vec::new();
        if matches!(direction, Direction::Outgoing | Direction::Both) {
            edges.extend(db::neighbors_from(pool, cur_type, &cur_id).await.map_err(CoreError::Database)?);
        }
        if matches!(direction, Direction::Incoming | Direction::Both) {
            edges.extend(db::neighbors_into(pool, cur_type, &cur_id).await.map_err(CoreError::Database)?);
        }

        for edge in edges {
            if let Some(allowed) = edge_types {
                if !allowed.contains(&edge.edge_type) {
                    continue;
                }
            }
            let (next_type, next_id) = if edge.source_type == cur_type && edge.source_id == cur_id {
                (edge.target_type, edge.target_id.clone())
            } else {
                (edge.source_type, edge.source_id.clone())
            };
            let key = (next_type, next_id.clone());
            if visited.contains(&key) {
                continue;
            }
            visited.insert(key);
            let next_depth = depth + 1;
            out.push(NeighborNode {
                entity_type: next_type,
                entity_id: next_id.clone(),
                depth: next_depth,
                via_edge: edge,
            });
            queue.push_back((next_type, next_id, next_depth));
        }
    }

    Ok(out)
}

/// Shortest edge path between two entities, or `None` if unreachable within
/// `max_depth` hops (§4.10 `find_path`).
pub async fn find_path(
    pool: &sqlx::SqlitePool,
    from_type: EntityType,
    from_id: &str,
    to_type: EntityType,
    to_id: &str,
    max_depth: u32,
) -> Result<Option<Vec<Edge>>> {
    if from_type == to_type && from_id == to_id {
        return Ok(Some(Vec::new()));
    }

    let mut visited: HashSet<(EntityType, String)> = HashSet::new();
    visited.insert((from_type, from_id.to_string()));
    let mut queue: VecDeque<(EntityType, String, u32, Vec<Edge>)> = VecDeque::new();
    queue.push_back((from_type, from_id.to_string(), 0, Vec::new()));

    while let Some((cur_type, cur_id, depth, path)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }
        let mut edges = db::neighbors_from(pool, cur_type, &cur_id).await.map_err(CoreError::Database)?;
        edges.extend(db::neighbors_into(pool, cur_type, &cur_id).await.map_err(CoreError::Database)?);

        for edge in edges {
            let (next_type, next_id) = if edge.source_type == cur_type && edge.source_id == cur_id {
                (edge.target_type, edge.target_id.clone())
            } else {
                (edge.source_type, edge.source_id.clone())
            };
            if next_type == to_type && next_id == to_id {
                let mut full_path = path.clone();
                full_path.push(edge);
                return Ok(Some(full_path));
            }
            let key = (next_type, next_id.clone());
            if visited.contains(&key) {
                continue;
            }
            visited.insert(key);
            let mut next_path = path.clone();
            next_path.push(edge);
            queue.push_back((next_type, next_id, depth + 1, next_path));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tx_test_utils::create_memory_db;

    #[tokio::test]
    async fn create_rejects_out_of_range_weight() {
        let pool = create_memory_db().await;
        let err = create(&pool, EdgeType::LinksTo, EntityType::File, "a.rs", EntityType::File, "b.rs", 1.5)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
    }

    #[tokio::test]
    async fn create_rejects_empty_endpoint_id() {
        let pool = create_memory_db().await;
        let err = create(&pool, EdgeType::LinksTo, EntityType::File, "", EntityType::File, "b.rs", 0.5)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
    }

    #[tokio::test]
    async fn invalidate_then_restore_roundtrips() {
        let pool = create_memory_db().await;
        let edge = create(&pool, EdgeType::LinksTo, EntityType::File, "a.rs", EntityType::File, "b.rs", 1.0)
            .await
            .unwrap();

        invalidate(&pool, &edge.id).await.unwrap();
        let after_invalidate = find_neighbors(&pool, EntityType::File, "a.rs", 1, Direction::Outgoing, None)
            .await
            .unwrap();
        assert!(after_invalidate.is_empty());

        restore(&pool, &edge.id).await.unwrap();
        let after_restore = find_neighbors(&pool, EntityType::File, "a.rs", 1, Direction::Outgoing, None)
            .await
            .unwrap();
        assert_eq!(after_restore.len(), 1);
    }

    #[tokio::test]
    async fn find_neighbors_respects_max_depth() {
        let pool = create_memory_db().await;
        create(&pool, EdgeType::LinksTo, EntityType::File, "a.rs", EntityType::File, "b.rs", 1.0)
            .await
            .unwrap();
        create(&pool, EdgeType::LinksTo, EntityType::File, "b.rs", EntityType::File, "c.rs", 1.0)
            .await
            .unwrap();

        let one_hop = find_neighbors(&pool, EntityType::File, "a.rs", 1, Direction::Outgoing, None)
            .await
            .unwrap();
        assert_eq!(one_hop.len(), 1);
        assert_eq!(one_hop[0].entity_id, "b.rs");

        let two_hop = find_neighbors(&pool, EntityType::File, "a.rs", 2, Direction::Outgoing, None)
            .await
            .unwrap();
        assert_eq!(two_hop.len(), 2);
        assert!(two_hop.iter().any(|n| n.entity_id == "c.rs" && n.depth == 2));
    }

    #[tokio::test]
    async fn find_neighbors_filters_by_edge_type() {
        let pool = create_memory_db().await;
        create(&pool, EdgeType::LinksTo, EntityType::File, "a.rs", EntityType::File, "b.rs", 1.0)
            .await
            .unwrap();
        create(&pool, EdgeType::Imports, EntityType::File, "a.rs", EntityType::File, "d.rs", 1.0)
            .await
            .unwrap();

        let filtered = find_neighbors(
            &pool,
            EntityType::File,
            "a.rs",
            1,
            Direction::Outgoing,
            Some(&[EdgeType::Imports]),
        )
        .await
        .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].entity_id, "d.rs");
    }

    #[tokio::test]
    async fn find_path_returns_shortest_chain() {
        let pool = create_memory_db().await;
        create(&pool, EdgeType::LinksTo, EntityType::File, "a.rs", EntityType::File, "b.rs", 1.0)
            .await
            .unwrap();
        create(&pool, EdgeType::LinksTo, EntityType::File, "b.rs", EntityType::File, "c.rs", 1.0)
            .await
            .unwrap();

        let path = find_path(&pool, EntityType::File, "a.rs", EntityType::File, "c.rs", 5)
            .await
            .unwrap();
        assert_eq!(path.map(|p| p.len()), Some(2));
    }

    #[tokio::test]
    async fn find_path_returns_none_when_unreachable() {
        let pool = create_memory_db().await;
        create(&pool, EdgeType::LinksTo, EntityType::File, "a.rs", EntityType::File, "b.rs", 1.0)
            .await
            .unwrap();

        let path = find_path(&pool, EntityType::File, "a.rs", EntityType::File, "zzz.rs", 5)
            .await
            .unwrap();
        assert!(path.is_none());
    }
}
