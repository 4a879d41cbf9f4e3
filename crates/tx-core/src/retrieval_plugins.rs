//! External plugin traits for the Retriever (§4.9): embedding, reranking,
//! and vector candidate extraction are pluggable so the Store doesn't need
//! to depend on any particular model backend. Each trait is object-safe so
//! implementations can be stored as `Box<dyn Trait>` in a keyed registry.

use std::collections::HashMap;

use async_trait::async_trait;

/// Turns text into a fixed-dimension embedding vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;

    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f64>>;

    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f64>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// A candidate surfaced by vector similarity search, scored independently
/// of BM25 so the two rankings can be fused with [`crate::numerics::rrf_score`].
#[derive(Debug, Clone)]
pub struct VectorCandidate {
    pub learning_id: String,
    pub similarity: f64,
}

/// Supplies vector-similarity candidates for a query embedding. Kept
/// separate from [`Embedder`] because the index backing it (in-memory,
/// sqlite-vec, an external service) is an orthogonal concern.
#[async_trait]
pub trait CandidateExtractor: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, query_embedding: &[f64], limit: usize) -> anyhow::Result<Vec<VectorCandidate>>;
}

/// Re-scores a fused candidate list, e.g. via a cross-encoder.
#[async_trait]
pub trait Reranker: Send + Sync {
    fn name(&self) -> &str;

    /// Returns relevance scores parallel to `candidates`, one per id.
    async fn rerank(&self, query: &str, candidates: &[String]) -> anyhow::Result<HashMap<String, f64>>;
}

// Compile-time object-safety assertions.
const _: () = {
    fn _assert_embedder_object_safe(_: &dyn Embedder) {}
    fn _assert_extractor_object_safe(_: &dyn CandidateExtractor) {}
    fn _assert_reranker_object_safe(_: &dyn Reranker) {}
};

/// A registry of named plugins of one kind, mirroring the harness registry
/// pattern used elsewhere for pluggable adapters.
pub struct PluginRegistry<T: ?Sized> {
    plugins: HashMap<String, Box<T>>,
}

impl<T: ?Sized> Default for PluginRegistry<T> {
    fn default() -> Self {
        Self { plugins: HashMap::new() }
    }
}

impl<T: ?Sized> PluginRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, plugin: Box<T>) -> Option<Box<T>> {
        self.plugins.insert(name.into(), plugin)
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.plugins.get(name).map(|b| b.as_ref())
    }

    pub fn list(&self) -> Vec<&str> {
        self.plugins.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ConstantEmbedder;

    #[async_trait]
    impl Embedder for ConstantEmbedder {
        fn name(&self) -> &str {
            "constant"
        }

        fn dimensions(&self) -> usize {
            3
        }

        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f64>> {
            Ok(vec![1.0, 0.0, 0.0])
        }
    }

    #[test]
    fn embedder_is_object_safe() {
        let embedder: Box<dyn Embedder> = Box::new(ConstantEmbedder);
        assert_eq!(embedder.name(), "constant");
        assert_eq!(embedder.dimensions(), 3);
    }

    #[tokio::test]
    async fn default_embed_batch_calls_embed_per_item() {
        let embedder = ConstantEmbedder;
        let out = embedder.embed_batch(&["a".into(), "b".into()]).await.unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], vec![1.0, 0.0, 0.0]);
    }

    #[test]
    fn plugin_registry_register_and_get() {
        let mut registry: PluginRegistry<dyn Embedder> = PluginRegistry::new();
        assert!(registry.is_empty());
        registry.register("constant", Box::new(ConstantEmbedder));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("constant").is_some());
        assert!(registry.get("missing").is_none());
    }
}
