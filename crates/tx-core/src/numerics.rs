//! Pure scoring functions backing the Retriever (§4.9) and Feedback Tracker
//! (§4.11). No I/O, no database handle — kept separate so the formulas can
//! be unit-tested in isolation.

use chrono::{DateTime, Utc};

/// Reciprocal Rank Fusion default constant (§4.9 step 3).
pub const RRF_K: f64 = 60.0;

/// `Σ 1/(k + rank_i)` over the given 1-indexed ranks. A rank of `0` means
/// "not present in that candidate set" and contributes nothing.
pub fn rrf_score(ranks: &[u32], k: f64) -> f64 {
    ranks
        .iter()
        .filter(|&&rank| rank > 0)
        .map(|&rank| 1.0 / (k + rank as f64))
        .sum()
}

/// Exponential decay on elapsed time, normalized to `[0, 1]`, with the given
/// half-life (§4.9 step 4 `recency_score`).
pub fn recency_score(created_at: DateTime<Utc>, now: DateTime<Utc>, half_life_days: f64) -> f64 {
    let elapsed_days = (now - created_at).num_seconds() as f64 / 86_400.0;
    let elapsed_days = elapsed_days.max(0.0);
    0.5_f64.powf(elapsed_days / half_life_days)
}

/// Monotone-increasing, saturating function of usage count (§4.9 step 4
/// `frequency_score`). `1 - e^{-usage_count / scale}` saturates toward 1
/// without ever reaching it for finite usage.
pub fn frequency_score(usage_count: i64, scale: f64) -> f64 {
    let usage_count = usage_count.max(0) as f64;
    1.0 - (-usage_count / scale).exp()
}

/// The stored outcome score, or 0 if absent (§4.9 step 4 `outcome_score`).
pub fn outcome_score(outcome: Option<f64>) -> f64 {
    outcome.unwrap_or(0.0)
}

/// Bayesian average with `m` pseudo-observations at `rate` (§4.11).
/// `(hits + rate*m) / (tries + m)`.
pub fn bayesian_average(hits: f64, tries: f64, m: f64, rate: f64) -> f64 {
    (hits + rate * m) / (tries + m)
}

/// Weights for combining RRF with the signal boosts (§4.9 step 5, §9).
#[derive(Debug, Clone, Copy)]
pub struct RelevanceWeights {
    pub recency: f64,
    pub outcome: f64,
    pub frequency: f64,
    pub feedback: f64,
}

impl Default for RelevanceWeights {
    fn default() -> Self {
        Self { recency: 0.15, outcome: 0.2, frequency: 0.1, feedback: 0.15 }
    }
}

/// `relevance_score = rrf_score + w_r*recency + w_o*outcome + w_f*frequency
/// + w_b*feedback_score` (§4.9 step 5).
#[allow(clippy::too_many_arguments)]
pub fn relevance_score(
    rrf: f64,
    recency: f64,
    outcome: f64,
    frequency: f64,
    feedback: f64,
    weights: RelevanceWeights,
) -> f64 {
    rrf + weights.recency * recency
        + weights.outcome * outcome
        + weights.frequency * frequency
        + weights.feedback * feedback
}

/// Cosine similarity between two equal-length vectors. Returns 0 if either
/// is the zero vector.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// One candidate in a Maximal Marginal Relevance selection round.
pub struct MmrCandidate<'a, T> {
    pub item: &'a T,
    pub relevance: f64,
    pub embedding: Option<&'a [f64]>,
}

/// Greedily select up to `limit` items maximizing `λ*relevance -
/// (1-λ)*max(similarity_to_selected)` (§4.9 step 9). Items without an
/// embedding are treated as maximally dissimilar to everything already
/// selected (similarity 0), so they are never penalized for diversity.
pub fn mmr_select<'a, T>(candidates: &[MmrCandidate<'a, T>], lambda: f64, limit: usize) -> Vec<&'a T> {
    let mut remaining: Vec<usize> = (0..candidates.len()).collect();
    let mut selected: Vec<usize> = Vec::new();

    while selected.len() < limit && !remaining.is_empty() {
        let mut best_idx = 0usize;
        let mut best_score = f64::NEG_INFINITY;

        for (pos, &idx) in remaining.iter().enumerate() {
            let candidate = &candidates[idx];
            let max_sim = selected
                .iter()
                .map(|&sel_idx| {
                    match (candidate.embedding, candidates[sel_idx].embedding) {
                        (Some(a), Some(b)) => cosine_similarity(a, b),
                        _ => 0.0,
                    }
                })
                .fold(0.0_f64, f64::max);

            let mmr = lambda * candidate.relevance - (1.0 - lambda) * max_sim;
            if mmr > best_score {
                best_score = mmr;
                best_idx = pos;
            }
        }

        let chosen = remaining.remove(best_idx);
        selected.push(chosen);
    }

    selected.into_iter().map(|idx| candidates[idx].item).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn rrf_ignores_absent_ranks() {
        let score = rrf_score(&[1, 0], 60.0);
        assert_eq!(score, 1.0 / 61.0);
    }

    #[test]
    fn rrf_sums_both_ranks() {
        let score = rrf_score(&[1, 1], 60.0);
        assert!((score - 2.0 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn recency_is_one_at_zero_elapsed() {
        let now = Utc::now();
        assert_eq!(recency_score(now, now, 30.0), 1.0);
    }

    #[test]
    fn recency_halves_at_half_life() {
        let now = Utc::now();
        let created = now - Duration::days(30);
        let score = recency_score(created, now, 30.0);
        assert!((score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn frequency_is_monotone_increasing() {
        let low = frequency_score(1, 10.0);
        let high = frequency_score(100, 10.0);
        assert!(high > low);
        assert!(high < 1.0);
    }

    #[test]
    fn bayesian_average_matches_feedback_example() {
        let score = bayesian_average(3.0, 3.0, 2.0, 0.5);
        assert!((score - 0.8).abs() < 1e-12);
    }

    #[test]
    fn bayesian_average_is_neutral_with_no_observations() {
        let score = bayesian_average(0.0, 0.0, 2.0, 0.5);
        assert_eq!(score, 0.5);
    }

    #[test]
    fn cosine_similarity_identical_vectors_is_one() {
        let v = [1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn cosine_similarity_orthogonal_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn relevance_score_is_monotone_in_each_boost() {
        let weights = RelevanceWeights::default();
        let base = relevance_score(0.1, 0.0, 0.0, 0.0, 0.0, weights);
        let boosted = relevance_score(0.1, 1.0, 1.0, 1.0, 1.0, weights);
        assert!(boosted > base);
    }

    #[test]
    fn mmr_select_respects_limit() {
        let items = [1, 2, 3];
        let candidates = vec![
            MmrCandidate { item: &items[0], relevance: 0.9, embedding: None },
            MmrCandidate { item: &items[1], relevance: 0.8, embedding: None },
            MmrCandidate { item: &items[2], relevance: 0.7, embedding: None },
        ];
        let selected = mmr_select(&candidates, 0.5, 2);
        assert_eq!(selected.len(), 2);
        assert_eq!(*selected[0], 1);
    }

    #[test]
    fn mmr_diversifies_away_from_near_duplicates() {
        let items = [1, 2, 3];
        let emb_a = [1.0, 0.0];
        let emb_b = [1.0, 0.0];
        let emb_c = [0.0, 1.0];
        let candidates = vec![
            MmrCandidate { item: &items[0], relevance: 0.9, embedding: Some(&emb_a) },
            MmrCandidate { item: &items[1], relevance: 0.85, embedding: Some(&emb_b) },
            MmrCandidate { item: &items[2], relevance: 0.5, embedding: Some(&emb_c) },
        ];
        // With lambda=0.5, the near-duplicate of item 1 should lose to the
        // orthogonal (dissimilar) item 3 on the second pick.
        let selected = mmr_select(&candidates, 0.5, 2);
        assert_eq!(*selected[0], 1);
        assert_eq!(*selected[1], 3);
    }
}
