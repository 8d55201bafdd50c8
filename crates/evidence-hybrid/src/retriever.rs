//! Hybrid lexical + vector retrieval with optional re-ranking.
//!
//! The retriever never returns an error. A failing stage is dropped, the
//! mode records what actually contributed, and a degradation event says why.
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use tokio::task::spawn_blocking;
use tokio::time::timeout_at;
use tracing::{debug, warn};

use evidence_core::config::RetrievalSettings;
use evidence_core::{Embedder, NoopReranker, Reranker, RetrievalResult};
use evidence_index::ChunkIndex;

use crate::degradation::{DegradationEvent, DegradationReason, Retrieval, RetrievalMode, StageTrace};
use crate::fusion::{apply_rerank, fuse_stages};

fn ms_since(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Lexical candidate generator: `(index, query terms, m) -> [(row, bm25)]`.
pub type LexicalStage = Arc<dyn Fn(&ChunkIndex, &[String], usize) -> Vec<(usize, f32)> + Send + Sync>;

pub struct HybridRetriever {
    index: Arc<ChunkIndex>,
    embedder: Arc<dyn Embedder>,
    reranker: Arc<dyn Reranker>,
    lexical: LexicalStage,
    settings: RetrievalSettings,
}

impl HybridRetriever {
    pub fn new(index: Arc<ChunkIndex>, embedder: Arc<dyn Embedder>, settings: RetrievalSettings) -> Self {
        let lexical: LexicalStage = Arc::new(|index: &ChunkIndex, terms: &[String], m: usize| index.lexical_top_m(terms, m));
        Self { index, embedder, reranker: Arc::new(NoopReranker), lexical, settings }
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = reranker;
        self
    }

    /// Replace BM25 candidate generation. A panicking stage degrades the
    /// query to vector-only.
    pub fn with_lexical_stage(mut self, stage: LexicalStage) -> Self {
        self.lexical = stage;
        self
    }

    pub fn index(&self) -> &Arc<ChunkIndex> { &self.index }
    pub fn settings(&self) -> &RetrievalSettings { &self.settings }

    /// Top `top_k` chunks for `query` (`top_k == 0` is treated as 1).
    pub async fn retrieve(&self, query: &str, top_k: usize) -> Retrieval {
        let started = Instant::now();
        let top_k = top_k.max(1);
        if self.index.is_empty() {
            let mut empty = Retrieval::empty(RetrievalMode::Full);
            empty.trace.total_ms = ms_since(started);
            return empty;
        }
        let m = self.settings.candidate_pool(top_k);
        let mut trace = StageTrace::default();
        let mut events = Vec::new();

        // Start the query embedding first so it overlaps the lexical stage.
        let vector_started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.settings.embed_timeout();
        let embedder = Arc::clone(&self.embedder);
        let owned_query = query.to_string();
        let embedding = spawn_blocking(move || embedder.embed_query(&owned_query));

        let lexical_started = Instant::now();
        let index = Arc::clone(&self.index);
        let stage = Arc::clone(&self.lexical);
        let lexical = catch_unwind(AssertUnwindSafe(|| {
            let terms = index.query_terms(query);
            let hits = (stage.as_ref())(index.as_ref(), &terms, m);
            (terms, hits)
        }));
        trace.lexical_ms = ms_since(lexical_started);
        let (terms, lexical_hits) = match lexical {
            Ok((terms, hits)) => (terms, Some(hits)),
            Err(_) => {
                events.push(DegradationEvent::new(DegradationReason::LexicalUnavailable, "lexical stage panicked"));
                (Vec::new(), None)
            }
        };

        let query_vector = match timeout_at(deadline, embedding).await {
            Err(_) => Err(format!("query embedding exceeded {} ms", self.settings.embed_timeout_ms)),
            Ok(Err(join)) => Err(format!("query embedding task failed: {join}")),
            Ok(Ok(Err(e))) => Err(format!("query embedding failed: {e:#}")),
            Ok(Ok(Ok(v))) => self.index.prepare_query(v).map_err(|e| e.to_string()),
        };
        let vector_hits = match &query_vector {
            Ok(q) => Some(self.index.vector_top_m(q, m)),
            Err(detail) => {
                events.push(DegradationEvent::new(DegradationReason::EmbeddingUnavailable, detail.clone()));
                None
            }
        };
        trace.vector_ms = ms_since(vector_started);
        trace.lexical_candidates = lexical_hits.as_ref().map_or(0, Vec::len);
        trace.vector_candidates = vector_hits.as_ref().map_or(0, Vec::len);

        let fusion_started = Instant::now();
        let empty_query: Vec<f32> = Vec::new();
        let q = query_vector.as_ref().unwrap_or(&empty_query);
        let (mode, rows) = fuse_stages(
            lexical_hits.as_deref(),
            vector_hits.as_deref(),
            self.settings.candidate_strategy,
            self.settings.alpha,
            |row| self.index.lexical_score(&terms, row),
            |row| self.index.vector_score(q, row),
        );
        let mut results: Vec<RetrievalResult> = rows
            .into_iter()
            .filter_map(|r| {
                self.index.chunk(r.row).map(|chunk| RetrievalResult {
                    chunk: chunk.clone(),
                    score: r.fused,
                    lexical_score: r.lexical,
                    vector_score: r.vector,
                    rerank_score: None,
                })
            })
            .collect();
        results.sort_by(RetrievalResult::rank_cmp);
        trace.fused_candidates = results.len();
        trace.fusion_ms = ms_since(fusion_started);

        if self.reranker.enabled() && !results.is_empty() && self.settings.rerank_top_r > 0 {
            let rerank_started = Instant::now();
            match self.rerank(query, &results).await {
                Ok(scores) => {
                    trace.reranked = scores.len();
                    apply_rerank(&mut results, &scores);
                }
                Err(event) => events.push(event),
            }
            trace.rerank_ms = ms_since(rerank_started);
        }

        results.truncate(top_k);
        trace.total_ms = ms_since(started);
        for e in &events {
            warn!(reason = e.reason.as_str(), detail = %e.detail, "retrieval degraded");
        }
        debug!(mode = mode.as_str(), results = results.len(), total_ms = trace.total_ms, "retrieval finished");
        Retrieval { results, mode, degradations: events, trace }
    }

    async fn rerank(&self, query: &str, results: &[RetrievalResult]) -> Result<Vec<f32>, DegradationEvent> {
        let r = self.settings.rerank_top_r.min(results.len());
        let texts: Vec<String> = results[..r].iter().map(|res| res.chunk.text.clone()).collect();
        let reranker = Arc::clone(&self.reranker);
        let owned_query = query.to_string();
        let task = spawn_blocking(move || reranker.score(&owned_query, &texts));
        let failed = |detail: String| DegradationEvent::new(DegradationReason::RerankFailed, detail);
        match tokio::time::timeout(self.settings.rerank_timeout(), task).await {
            Err(_) => Err(DegradationEvent::new(
                DegradationReason::RerankTimeout,
                format!("re-rank exceeded {} ms", self.settings.rerank_timeout_ms),
            )),
            Ok(Err(join)) => Err(failed(format!("re-rank task failed: {join}"))),
            Ok(Ok(Err(e))) => Err(failed(format!("re-rank failed: {e:#}"))),
            Ok(Ok(Ok(scores))) if scores.len() != r => Err(failed(format!("reranker returned {} scores for {r} candidates", scores.len()))),
            Ok(Ok(Ok(scores))) if scores.iter().any(|s| !s.is_finite()) => Err(failed("reranker returned non-finite scores".to_string())),
            Ok(Ok(Ok(scores))) => Ok(scores),
        }
    }
}
