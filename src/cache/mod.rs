//! Semantic deduplication cache.
//!
//! Vector-indexed key→value store shared by every run in the process.
//! Keys are embedded through the gateway, L2-normalized, and matched by
//! inner product (cosine on unit vectors); a lookup only counts as a hit at
//! or above the similarity threshold. Entries keep insertion order per
//! namespace and the oldest entry is evicted on overflow, so the scan index
//! never drifts from the eviction queue.
//!
//! Embedding failures are absorbed: a lookup that cannot embed reports a
//! miss and an insert that cannot embed is skipped, leaving the caller on
//! the direct-computation path.

use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

use tokio_util::sync::CancellationToken;

use crate::error::TotResult;
use crate::gateway::LlmGateway;
use crate::metrics::MetricsSink;
use crate::types::CacheConfig;

/// Which caller a cache entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Propose,
    Evaluate,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Propose => "propose",
            Namespace::Evaluate => "evaluate",
        }
    }
}

/// A successful lookup.
#[derive(Debug, Clone)]
pub struct CacheHit {
    pub payload: serde_json::Value,
    pub similarity: f32,
}

struct CacheEntry {
    vector: Vec<f32>,
    payload: serde_json::Value,
}

#[derive(Default)]
struct NamespaceIndex {
    entries: VecDeque<CacheEntry>,
}

impl NamespaceIndex {
    /// Top-k matches by inner product, best first.
    fn top_k(&self, query: &[f32], k: usize) -> Vec<(f32, &CacheEntry)> {
        let mut scored: Vec<(f32, &CacheEntry)> = self
            .entries
            .iter()
            .map(|entry| {
                let dot: f32 = entry
                    .vector
                    .iter()
                    .zip(query.iter())
                    .map(|(a, b)| a * b)
                    .sum();
                (dot, entry)
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }
}

/// Process-wide, namespace-partitioned semantic cache.
pub struct SemanticCache {
    gateway: Arc<LlmGateway>,
    metrics: Arc<dyn MetricsSink>,
    embedding_model: String,
    embedding_dim: usize,
    config: CacheConfig,
    propose: RwLock<NamespaceIndex>,
    evaluate: RwLock<NamespaceIndex>,
}

impl SemanticCache {
    pub fn new(
        gateway: Arc<LlmGateway>,
        metrics: Arc<dyn MetricsSink>,
        embedding_model: impl Into<String>,
        embedding_dim: usize,
        config: CacheConfig,
    ) -> Self {
        Self {
            gateway,
            metrics,
            embedding_model: embedding_model.into(),
            embedding_dim,
            config,
            propose: RwLock::new(NamespaceIndex::default()),
            evaluate: RwLock::new(NamespaceIndex::default()),
        }
    }

    fn index(&self, ns: Namespace) -> &RwLock<NamespaceIndex> {
        match ns {
            Namespace::Propose => &self.propose,
            Namespace::Evaluate => &self.evaluate,
        }
    }

    /// Embed one text to a unit vector. Any failure (transport, dimension
    /// mismatch, zero norm) is reported as `None`.
    async fn embed_unit(&self, text: &str, cancel: &CancellationToken) -> Option<Vec<f32>> {
        let texts = [text.to_string()];
        let result = self.gateway.embed(&texts, &self.embedding_model, cancel).await;

        let mut vectors = match result {
            Ok(v) => v,
            Err(e) => {
                self.metrics.increment("cache_embed_errors", &[], 1);
                tracing::debug!(error = %e, "cache embedding failed, treating as miss");
                return None;
            }
        };
        let vector = vectors.pop()?;
        if vector.len() != self.embedding_dim {
            self.metrics.increment("cache_embed_errors", &[], 1);
            tracing::warn!(
                expected = self.embedding_dim,
                actual = vector.len(),
                "embedding dimension mismatch, entry dropped"
            );
            return None;
        }
        normalize(vector)
    }

    /// Top-1 lookup gated by the similarity threshold.
    pub async fn lookup(
        &self,
        ns: Namespace,
        query_text: &str,
        cancel: &CancellationToken,
    ) -> Option<CacheHit> {
        self.lookup_top_k(ns, query_text, 1, cancel)
            .await
            .into_iter()
            .next()
    }

    /// Top-k lookup; only entries at or above the threshold are returned,
    /// best first.
    pub async fn lookup_top_k(
        &self,
        ns: Namespace,
        query_text: &str,
        k: usize,
        cancel: &CancellationToken,
    ) -> Vec<CacheHit> {
        let labels = [("namespace", ns.as_str())];
        let Some(query) = self.embed_unit(query_text, cancel).await else {
            self.metrics.increment("cache_misses", &labels, 1);
            return Vec::new();
        };

        let hits: Vec<CacheHit> = {
            let index = self.index(ns).read().expect("cache lock poisoned");
            index
                .top_k(&query, k)
                .into_iter()
                .filter(|(similarity, _)| *similarity >= self.config.similarity_threshold)
                .map(|(similarity, entry)| CacheHit {
                    payload: entry.payload.clone(),
                    similarity,
                })
                .collect()
        };

        if hits.is_empty() {
            self.metrics.increment("cache_misses", &labels, 1);
        } else {
            self.metrics.increment("cache_hits", &labels, 1);
        }
        hits
    }

    /// Insert a payload under a key text. Best-effort: embedding failures
    /// skip the insert. Oldest entry is evicted past `max_entries`.
    pub async fn insert(
        &self,
        ns: Namespace,
        key_text: &str,
        payload: serde_json::Value,
        cancel: &CancellationToken,
    ) -> TotResult<()> {
        let Some(vector) = self.embed_unit(key_text, cancel).await else {
            return Ok(());
        };

        let mut index = self.index(ns).write().expect("cache lock poisoned");
        index.entries.push_back(CacheEntry { vector, payload });
        if index.entries.len() > self.config.max_entries {
            index.entries.pop_front();
            self.metrics
                .increment("cache_evictions", &[("namespace", ns.as_str())], 1);
        }
        Ok(())
    }

    /// Number of live entries in a namespace.
    pub fn len(&self, ns: Namespace) -> usize {
        self.index(ns).read().expect("cache lock poisoned").entries.len()
    }

    pub fn is_empty(&self, ns: Namespace) -> bool {
        self.len(ns) == 0
    }
}

/// L2-normalize; `None` for the zero vector.
fn normalize(mut vector: Vec<f32>) -> Option<Vec<f32>> {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return None;
    }
    for x in &mut vector {
        *x /= norm;
    }
    Some(vector)
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use serde_json::json;

    use crate::error::{TotError, TotResult};
    use crate::gateway::LlmBackend;
    use crate::metrics::MemoryMetrics;

    const DIM: usize = 8;

    /// Deterministic text-derived embeddings: identical texts map to
    /// identical vectors, distinct texts to (almost surely) distant ones.
    struct StubEmbedder;

    fn embed_text(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; DIM];
        for (i, b) in text.bytes().enumerate() {
            v[(i + b as usize) % DIM] += f32::from(b) / 255.0;
        }
        v
    }

    #[async_trait]
    impl LlmBackend for StubEmbedder {
        async fn chat(&self, _: &str, _: f32, _: &str) -> TotResult<String> {
            Ok("unused".into())
        }

        async fn embed(&self, texts: &[String], _: &str) -> TotResult<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| embed_text(t)).collect())
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl LlmBackend for FailingEmbedder {
        async fn chat(&self, _: &str, _: f32, _: &str) -> TotResult<String> {
            Ok("unused".into())
        }

        async fn embed(&self, _: &[String], _: &str) -> TotResult<Vec<Vec<f32>>> {
            Err(TotError::Quota("no embeddings for you".into()))
        }
    }

    fn cache_with(
        backend: Arc<dyn LlmBackend>,
        config: CacheConfig,
    ) -> (SemanticCache, Arc<MemoryMetrics>) {
        let metrics = Arc::new(MemoryMetrics::new());
        let gateway = Arc::new(LlmGateway::new(backend, metrics.clone()));
        (
            SemanticCache::new(gateway, metrics.clone(), "stub-embed", DIM, config),
            metrics,
        )
    }

    #[tokio::test]
    async fn insert_then_exact_lookup_hits() {
        let (cache, metrics) = cache_with(Arc::new(StubEmbedder), CacheConfig::default());
        let cancel = CancellationToken::new();

        cache
            .insert(
                Namespace::Propose,
                "propose | make 24 | 4 6 7 8",
                json!(["a", "b"]),
                &cancel,
            )
            .await
            .unwrap();

        let hit = cache
            .lookup(Namespace::Propose, "propose | make 24 | 4 6 7 8", &cancel)
            .await
            .expect("identical key must hit");
        assert!(hit.similarity >= 0.95);
        assert_eq!(hit.payload, json!(["a", "b"]));
        assert_eq!(metrics.counter("cache_hits"), 1);
    }

    #[tokio::test]
    async fn dissimilar_query_misses() {
        let (cache, metrics) = cache_with(Arc::new(StubEmbedder), CacheConfig::default());
        let cancel = CancellationToken::new();

        cache
            .insert(Namespace::Propose, "alpha", json!(1), &cancel)
            .await
            .unwrap();

        let hit = cache
            .lookup(
                Namespace::Propose,
                "something else entirely, much longer and different",
                &cancel,
            )
            .await;
        assert!(hit.is_none());
        assert_eq!(metrics.counter("cache_misses"), 1);
    }

    #[tokio::test]
    async fn namespaces_are_isolated() {
        let (cache, _) = cache_with(Arc::new(StubEmbedder), CacheConfig::default());
        let cancel = CancellationToken::new();

        cache
            .insert(Namespace::Propose, "shared key", json!("propose"), &cancel)
            .await
            .unwrap();

        assert!(cache
            .lookup(Namespace::Evaluate, "shared key", &cancel)
            .await
            .is_none());
        assert_eq!(cache.len(Namespace::Propose), 1);
        assert!(cache.is_empty(Namespace::Evaluate));
    }

    #[tokio::test]
    async fn fifo_eviction_drops_oldest() {
        let config = CacheConfig {
            similarity_threshold: 0.95,
            max_entries: 2,
        };
        let (cache, metrics) = cache_with(Arc::new(StubEmbedder), config);
        let cancel = CancellationToken::new();

        for key in ["first entry", "second entry", "third entry"] {
            cache
                .insert(Namespace::Evaluate, key, json!(key), &cancel)
                .await
                .unwrap();
        }

        assert_eq!(cache.len(Namespace::Evaluate), 2);
        assert_eq!(metrics.counter("cache_evictions"), 1);
        assert!(cache
            .lookup(Namespace::Evaluate, "first entry", &cancel)
            .await
            .is_none());
        assert!(cache
            .lookup(Namespace::Evaluate, "third entry", &cancel)
            .await
            .is_some());
    }

    #[tokio::test]
    async fn embedding_failure_is_a_miss_not_an_error() {
        let (cache, metrics) = cache_with(Arc::new(FailingEmbedder), CacheConfig::default());
        let cancel = CancellationToken::new();

        cache
            .insert(Namespace::Propose, "key", json!(1), &cancel)
            .await
            .unwrap();
        assert!(cache.is_empty(Namespace::Propose));

        assert!(cache.lookup(Namespace::Propose, "key", &cancel).await.is_none());
        assert!(metrics.counter("cache_embed_errors") >= 2);
    }

    #[tokio::test]
    async fn top_k_returns_best_first() {
        let config = CacheConfig {
            similarity_threshold: 0.0001,
            max_entries: 16,
        };
        let (cache, _) = cache_with(Arc::new(StubEmbedder), config);
        let cancel = CancellationToken::new();

        cache
            .insert(Namespace::Propose, "query text", json!("exact"), &cancel)
            .await
            .unwrap();
        cache
            .insert(Namespace::Propose, "query texx", json!("near"), &cancel)
            .await
            .unwrap();

        let hits = cache
            .lookup_top_k(Namespace::Propose, "query text", 2, &cancel)
            .await;
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].payload, json!("exact"));
        assert!(hits[0].similarity >= hits[1].similarity);
    }

    #[test]
    fn normalize_unit_length() {
        let v = normalize(vec![3.0, 4.0]).unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn normalize_rejects_zero_vector() {
        assert!(normalize(vec![0.0, 0.0, 0.0]).is_none());
    }
}
