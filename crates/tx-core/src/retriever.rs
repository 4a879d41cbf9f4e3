//! Retriever (§4.9): BM25 + optional vector candidates, fused by
//! Reciprocal Rank Fusion, boosted by recency/outcome/frequency/feedback
//! signals, optionally reranked, graph-expanded, and MMR-diversified.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use tx_db::models::{EdgeType, EntityType, Learning};
use tx_db::queries::learnings as learnings_db;

use crate::edges::{find_neighbors, Direction};
use crate::error::{CoreError, Result};
use crate::numerics::{
    cosine_similarity, frequency_score, mmr_select, outcome_score, recency_score, relevance_score,
    rrf_score, MmrCandidate, RelevanceWeights,
};
use crate::retrieval_plugins::{CandidateExtractor, Embedder, Reranker};

/// Tunables for a single [`retrieve`] call (§4.9, §9).
#[derive(Debug, Clone)]
pub struct RetrievalOptions {
    pub bm25_k: i64,
    pub vector_k: i64,
    pub half_life_days: f64,
    pub frequency_scale: f64,
    pub weights: RelevanceWeights,
    pub min_score: f64,
    pub limit: usize,
    pub expand_graph: bool,
    pub expansion_depth: u32,
    pub expansion_edge_types: Option<Vec<EdgeType>>,
    pub expansion_decay_factor: f64,
    pub expansion_max_nodes: usize,
    pub mmr_lambda: Option<f64>,
    pub max_per_category: Option<usize>,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            bm25_k: 50,
            vector_k: 50,
            half_life_days: 30.0,
            frequency_scale: 10.0,
            weights: RelevanceWeights::default(),
            min_score: 0.1,
            limit: 10,
            expand_graph: false,
            expansion_depth: 2,
            expansion_edge_types: None,
            expansion_decay_factor: 0.7,
            expansion_max_nodes: 100,
            mmr_lambda: None,
            max_per_category: None,
        }
    }
}

/// A single scored result, carrying every component so ranking stays
/// explainable (§4.9 closing paragraph).
#[derive(Debug, Clone)]
pub struct RetrievedLearning {
    pub learning: Learning,
    pub bm25_rank: u32,
    pub vector_rank: u32,
    pub rrf: f64,
    pub recency: f64,
    pub outcome: f64,
    pub frequency: f64,
    pub feedback: f64,
    pub relevance_score: f64,
    pub expansion_hops: u32,
    pub expansion_path: Vec<String>,
}

struct Candidate {
    learning: Learning,
    bm25_rank: u32,
    vector_rank: u32,
}

/// Retrieve the top learnings for `query`. An `Embedder` alone is enough to
/// produce vector candidates via in-core cosine similarity; a
/// `CandidateExtractor` is an optional additional source layered on top
/// (e.g. a real ANN index), and a `Reranker` gives a final reordering pass
/// (§4.9).
pub async fn retrieve(
    pool: &sqlx::SqlitePool,
    query: &str,
    opts: &RetrievalOptions,
    embedder: Option<&dyn Embedder>,
    extractor: Option<&dyn CandidateExtractor>,
    reranker: Option<&dyn Reranker>,
) -> Result<Vec<RetrievedLearning>> {
    let now = Utc::now();

    // Step 1: BM25 candidates.
    let bm25_hits = learnings_db::bm25_search(pool, query, opts.bm25_k).await.map_err(CoreError::Database)?;
    let mut candidates: HashMap<String, Candidate> = HashMap::new();
    for (idx, hit) in bm25_hits.into_iter().enumerate() {
        candidates.insert(
            hit.learning.id.clone(),
            Candidate { learning: hit.learning, bm25_rank: idx as u32 + 1, vector_rank: 0 },
        );
    }

    // Step 2: optional vector candidates. Cosine similarity against every
    // learning's stored embedding, computed in-core; a `CandidateExtractor`
    // is an optional extra source (e.g. a real ANN index) layered on top,
    // not a requirement for the embedder path to produce anything.
    if let Some(embedder) = embedder {
        let query_embedding = embedder.embed(query).await.map_err(CoreError::Database)?;

        let mut vector_scores: HashMap<String, f64> = HashMap::new();
        for learning in learnings_db::list_with_embeddings(pool).await.map_err(CoreError::Database)? {
            let Some(raw) = learning.embedding.clone() else { continue };
            let Ok(embedding) = serde_json::from_value::<Vec<f64>>(raw) else { continue };
            if embedding.len() != query_embedding.len() {
                let err = CoreError::EmbeddingDimensionMismatch {
                    id: learning.id.clone(),
                    expected: query_embedding.len(),
                    got: embedding.len(),
                };
                tracing::warn!(%err, "skipping learning with mismatched embedding dimension");
                continue;
            }
            vector_scores.insert(learning.id, cosine_similarity(&query_embedding, &embedding));
        }

        if let Some(extractor) = extractor {
            let hits = extractor
                .search(&query_embedding, opts.vector_k as usize)
                .await
                .map_err(CoreError::Database)?;
            for hit in hits {
                vector_scores
                    .entry(hit.learning_id)
                    .and_modify(|s| *s = s.max(hit.similarity))
                    .or_insert(hit.similarity);
            }
        }

        let mut vector_hits: Vec<(String, f64)> = vector_scores.into_iter().collect();
        vector_hits.sort_by(|a, b| b.1.total_cmp(&a.1));
        vector_hits.truncate(opts.vector_k as usize);

        for (idx, (learning_id, _)) in vector_hits.into_iter().enumerate() {
            let rank = idx as u32 + 1;
            if let Some(existing) = candidates.get_mut(&learning_id) {
                existing.vector_rank = rank;
            } else if let Some(learning) =
                learnings_db::get_learning(pool, &learning_id).await.map_err(CoreError::Database)?
            {
                candidates.insert(learning_id.clone(), Candidate { learning, bm25_rank: 0, vector_rank: rank });
            }
        }
    }

    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    // Steps 3-5: RRF fusion plus signal boosts, combined into a final score.
    let ids: Vec<String> = candidates.keys().cloned().collect();
    let feedback_scores =
        crate::feedback::get_feedback_scores(pool, &ids).await?;

    let mut scored: Vec<RetrievedLearning> = candidates
        .into_values()
        .map(|c| {
            let rrf = rrf_score(&[c.bm25_rank, c.vector_rank], crate::numerics::RRF_K);
            let recency = recency_score(c.learning.created_at, now, opts.half_life_days);
            let outcome = outcome_score(c.learning.outcome_score);
            let frequency = frequency_score(c.learning.usage_count, opts.frequency_scale);
            let feedback = feedback_scores.get(&c.learning.id).copied().unwrap_or(0.5);
            let relevance = relevance_score(rrf, recency, outcome, frequency, feedback, opts.weights);
            RetrievedLearning {
                learning: c.learning,
                bm25_rank: c.bm25_rank,
                vector_rank: c.vector_rank,
                rrf,
                recency,
                outcome,
                frequency,
                feedback,
                relevance_score: relevance,
                expansion_hops: 0,
                expansion_path: Vec::new(),
            }
        })
        .collect();

    // Step 6: filter and sort.
    scored.retain(|r| r.relevance_score >= opts.min_score);
    scored.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
    scored.truncate(opts.limit);

    // Step 7: optional reranker.
    if let Some(reranker) = reranker {
        let candidate_ids: Vec<String> = scored.iter().map(|r| r.learning.id.clone()).collect();
        let rerank_scores = reranker
            .rerank(query, &candidate_ids)
            .await
            .map_err(CoreError::Database)?;
        for r in &mut scored {
            if let Some(&score) = rerank_scores.get(&r.learning.id) {
                r.relevance_score = score;
            }
        }
        scored.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
    }

    // Step 8: optional graph expansion.
    if opts.expand_graph {
        scored = expand_via_graph(pool, scored, opts, now).await?;
    }

    // Step 9: optional MMR diversification.
    if let Some(lambda) = opts.mmr_lambda {
        let embeddings: Vec<Option<Vec<f64>>> = scored
            .iter()
            .map(|r| {
                r.learning
                    .embedding
                    .as_ref()
                    .and_then(|v| serde_json::from_value::<Vec<f64>>(v.clone()).ok())
            })
            .collect();
        let mmr_candidates: Vec<MmrCandidate<'_, RetrievedLearning>> = scored
            .iter()
            .zip(embeddings.iter())
            .map(|(r, emb)| MmrCandidate {
                item: r,
                relevance: r.relevance_score,
                embedding: emb.as_deref(),
            })
            .collect();
        // Rank everything via MMR first, then (if capped) re-sequence the top
        // 5 so no category exceeds `max_per_category`, pulling skipped items
        // back in once the limit allows.
        let ranked = mmr_select(&mmr_candidates, lambda, mmr_candidates.len());
        let ordered: Vec<&RetrievedLearning> = match opts.max_per_category {
            Some(cap) => {
                let mut final_order: Vec<&RetrievedLearning> = Vec::new();
                let mut deferred: Vec<&RetrievedLearning> = Vec::new();
                let mut category_counts: HashMap<Option<String>, usize> = HashMap::new();
                for item in ranked {
                    if final_order.len() < 5 {
                        let count = category_counts.entry(item.learning.category.clone()).or_insert(0);
                        if *count >= cap {
                            deferred.push(item);
                            continue;
                        }
                        *count += 1;
                    }
                    final_order.push(item);
                    if final_order.len() >= opts.limit {
                        break;
                    }
                }
                for item in deferred {
                    if final_order.len() >= opts.limit {
                        break;
                    }
                    final_order.push(item);
                }
                final_order
            }
            None => ranked.into_iter().take(opts.limit).collect(),
        };
        let selected_ids: Vec<String> = ordered.into_iter().map(|r| r.learning.id.clone()).collect();
        scored.retain(|r| selected_ids.contains(&r.learning.id));
        scored.sort_by_key(|r| selected_ids.iter().position(|id| id == &r.learning.id).unwrap_or(usize::MAX));
    }

    Ok(scored)
}

/// Expand the seed set by walking `ANCHORED_TO`/`SIMILAR_TO`/etc. edges out
/// to `expansion_depth` hops, decaying the propagated score each hop and
/// deduping by learning id (§4.10 "Graph expansion in retrieval").
async fn expand_via_graph(
    pool: &sqlx::SqlitePool,
    seed: Vec<RetrievedLearning>,
    opts: &RetrievalOptions,
    now: DateTime<Utc>,
) -> Result<Vec<RetrievedLearning>> {
    let mut by_id: HashMap<String, RetrievedLearning> =
        seed.into_iter().map(|r| (r.learning.id.clone(), r)).collect();

    let seed_ids: Vec<(String, f64)> =
        by_id.values().map(|r| (r.learning.id.clone(), r.relevance_score)).collect();

    for (seed_id, seed_score) in seed_ids {
        let neighbors = find_neighbors(
            pool,
            EntityType::Learning,
            &seed_id,
            opts.expansion_depth,
            Direction::Both,
            opts.expansion_edge_types.as_deref(),
        )
        .await?;

        for node in neighbors {
            if node.entity_type != EntityType::Learning {
                continue;
            }
            if by_id.len() >= opts.expansion_max_nodes && !by_id.contains_key(&node.entity_id) {
                continue;
            }
            let propagated = seed_score * opts.expansion_decay_factor.powi(node.depth as i32);

            let should_insert = match by_id.get(&node.entity_id) {
                Some(existing) => propagated > existing.relevance_score,
                None => true,
            };
            if !should_insert {
                continue;
            }

            let Some(learning) =
                learnings_db::get_learning(pool, &node.entity_id).await.map_err(CoreError::Database)?
            else {
                continue;
            };
            by_id.insert(
                node.entity_id.clone(),
                RetrievedLearning {
                    recency: recency_score(learning.created_at, now, opts.half_life_days),
                    outcome: outcome_score(learning.outcome_score),
                    frequency: frequency_score(learning.usage_count, opts.frequency_scale),
                    feedback: 0.5,
                    learning,
                    bm25_rank: 0,
                    vector_rank: 0,
                    rrf: 0.0,
                    relevance_score: propagated,
                    expansion_hops: node.depth,
                    expansion_path: vec![node.via_edge.id.clone()],
                },
            );
        }
    }

    let mut out: Vec<RetrievedLearning> = by_id.into_values().collect();
    out.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
    out.truncate(opts.expansion_max_nodes);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tx_test_utils::create_memory_db;

    async fn seed(pool: &sqlx::SqlitePool, content: &str) -> Learning {
        crate::learnings::create(
            pool,
            content,
            tx_db::models::LearningSourceType::Manual,
            None,
            &serde_json::json!([]),
            None,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn bm25_only_retrieval_ranks_matches() {
        let pool = create_memory_db().await;
        seed(&pool, "retrying flaky network calls with exponential backoff").await;
        seed(&pool, "always validate user input at system boundaries").await;

        let opts = RetrievalOptions { min_score: 0.0, ..Default::default() };
        let results = retrieve(&pool, "backoff retry", &opts, None, None, None).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].relevance_score > 0.0);
    }

    #[tokio::test]
    async fn empty_corpus_returns_empty() {
        let pool = create_memory_db().await;
        let opts = RetrievalOptions::default();
        let results = retrieve(&pool, "anything", &opts, None, None, None).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn min_score_filters_out_weak_matches() {
        let pool = create_memory_db().await;
        seed(&pool, "a completely unrelated sentence about gardening").await;

        let opts = RetrievalOptions { min_score: 10.0, ..Default::default() };
        let results = retrieve(&pool, "gardening", &opts, None, None, None).await.unwrap();
        assert!(results.is_empty());
    }

    struct StubEmbedder(Vec<f64>);

    #[async_trait::async_trait]
    impl Embedder for StubEmbedder {
        fn name(&self) -> &str {
            "stub"
        }

        fn dimensions(&self) -> usize {
            self.0.len()
        }

        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f64>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn vector_candidates_rank_by_cosine_similarity_alone() {
        let pool = create_memory_db().await;
        let close = seed(&pool, "unrelated text for the closest vector").await;
        let far = seed(&pool, "unrelated text for the farthest vector").await;
        crate::learnings::set_embedding(&pool, &close.id, &[1.0, 0.0]).await.unwrap();
        crate::learnings::set_embedding(&pool, &far.id, &[0.0, 1.0]).await.unwrap();

        let embedder = StubEmbedder(vec![1.0, 0.0]);
        let opts = RetrievalOptions { min_score: 0.0, ..Default::default() };
        let results = retrieve(&pool, "no bm25 match at all", &opts, Some(&embedder), None, None).await.unwrap();

        assert!(results.iter().any(|r| r.learning.id == close.id && r.vector_rank == 1));
    }

    #[tokio::test]
    async fn vector_candidates_skip_dimension_mismatch() {
        let pool = create_memory_db().await;
        let mismatched = seed(&pool, "unrelated text with a mismatched embedding").await;
        crate::learnings::set_embedding(&pool, &mismatched.id, &[1.0, 0.0, 0.0]).await.unwrap();

        let embedder = StubEmbedder(vec![1.0, 0.0]);
        let opts = RetrievalOptions { min_score: 0.0, ..Default::default() };
        let results = retrieve(&pool, "no bm25 match at all", &opts, Some(&embedder), None, None).await.unwrap();

        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn graph_expansion_pulls_in_linked_learning() {
        let pool = create_memory_db().await;
        let seed_learning = seed(&pool, "exponential backoff retry strategy").await;
        let linked = crate::learnings::create(
            &pool,
            "circuit breakers complement retry backoff",
            tx_db::models::LearningSourceType::Manual,
            None,
            &serde_json::json!([]),
            None,
        )
        .await
        .unwrap();
        crate::edges::create(
            &pool,
            EdgeType::SimilarTo,
            EntityType::Learning,
            &seed_learning.id,
            EntityType::Learning,
            &linked.id,
            0.9,
        )
        .await
        .unwrap();

        let opts = RetrievalOptions { min_score: 0.0, expand_graph: true, ..Default::default() };
        let results = retrieve(&pool, "backoff", &opts, None, None, None).await.unwrap();
        assert!(results.iter().any(|r| r.learning.id == linked.id));
    }
}
