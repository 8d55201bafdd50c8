//! Consumer-facing evidence API.
//!
//! Owns the index state, the retriever and the metrics sink. Errors never
//! cross `retrieve_evidence`: an unavailable index yields an empty evidence
//! set with a warning, a degraded query yields what the surviving stage found.
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use evidence_core::config::{resolve_with_base, Settings};
use evidence_core::data_processor::{Corpus, DataProcessor};
use evidence_core::{Chunker, Embedder, EvidenceItem, NoopReranker, Reranker};
use evidence_index::{BuildOptions, CacheOrigin, ChunkIndex, IndexCache};

use crate::degradation::{DegradationEvent, DegradationReason, Retrieval, RetrievalMode};
use crate::metrics::{BuildOrigin, BuildRecord, MetricRecord, MetricsSink, QueryRecord};
use crate::retriever::HybridRetriever;

#[derive(Debug, Clone)]
pub enum IndexState {
    Ready(Arc<ChunkIndex>),
    Unavailable { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceSet {
    pub items: Vec<EvidenceItem>,
    pub mode: RetrievalMode,
    pub degradation: Option<DegradationReason>,
    pub warnings: Vec<String>,
}

pub struct EvidenceService {
    state: IndexState,
    retriever: Option<HybridRetriever>,
    sink: Arc<dyn MetricsSink>,
    default_top_k: usize,
}

impl EvidenceService {
    /// Wrap an already-opened index state.
    pub fn new(state: IndexState, embedder: Arc<dyn Embedder>, reranker: Arc<dyn Reranker>, settings: &Settings, sink: Arc<dyn MetricsSink>) -> Self {
        let retriever = match &state {
            IndexState::Ready(index) => {
                Some(HybridRetriever::new(Arc::clone(index), embedder, settings.retrieval.clone()).with_reranker(reranker))
            }
            IndexState::Unavailable { .. } => None,
        };
        Self { state, retriever, sink, default_top_k: settings.retrieval.default_top_k }
    }

    /// Load the corpus under `settings.data.corpus_dir` (relative to `base`)
    /// and open its snapshot from the cache, building it when missing.
    pub fn open(base: &Path, settings: &Settings, embedder: Arc<dyn Embedder>, sink: Arc<dyn MetricsSink>) -> Self {
        let corpus_dir = resolve_with_base(base, &settings.data.corpus_dir);
        match DataProcessor::new().process_directory(&corpus_dir) {
            Ok(corpus) => Self::open_corpus(base, settings, &corpus, embedder, sink),
            Err(e) => {
                error!(dir = %corpus_dir.display(), error = %e, "corpus unavailable");
                sink.emit(MetricRecord::Build(BuildRecord {
                    timestamp: Utc::now(),
                    cache_key: None,
                    origin: BuildOrigin::Failed,
                    chunk_count: 0,
                    skipped_documents: 0,
                    latency_ms: 0.0,
                    error: Some(e.to_string()),
                }));
                Self::new(IndexState::Unavailable { reason: e.to_string() }, embedder, Arc::new(NoopReranker), settings, sink)
            }
        }
    }

    pub fn open_corpus(base: &Path, settings: &Settings, corpus: &Corpus, embedder: Arc<dyn Embedder>, sink: Arc<dyn MetricsSink>) -> Self {
        let started = Instant::now();
        let cache = IndexCache::from_settings(resolve_with_base(base, &settings.index.cache_dir), &settings.index);
        let chunker = Chunker::new(settings.chunking);
        let options = BuildOptions::from_settings(&settings.index);
        let (state, record) = match cache.get_or_build(corpus, &chunker, embedder.as_ref(), &options) {
            Ok(outcome) => {
                info!(cache_key = %outcome.cache_key, chunks = outcome.index.len(), origin = ?outcome.origin, "evidence index ready");
                let record = BuildRecord {
                    timestamp: Utc::now(),
                    cache_key: Some(outcome.cache_key.clone()),
                    origin: match outcome.origin {
                        CacheOrigin::Loaded => BuildOrigin::Loaded,
                        CacheOrigin::Built => BuildOrigin::Built,
                    },
                    chunk_count: outcome.index.len(),
                    skipped_documents: corpus.skipped.len(),
                    latency_ms: outcome.elapsed.as_secs_f64() * 1000.0,
                    error: None,
                };
                (IndexState::Ready(outcome.index), record)
            }
            Err(e) => {
                error!(error = %e, "evidence index unavailable");
                let record = BuildRecord {
                    timestamp: Utc::now(),
                    cache_key: Some(cache.key_for(corpus, &chunker, embedder.as_ref())),
                    origin: BuildOrigin::Failed,
                    chunk_count: 0,
                    skipped_documents: corpus.skipped.len(),
                    latency_ms: started.elapsed().as_secs_f64() * 1000.0,
                    error: Some(e.to_string()),
                };
                (IndexState::Unavailable { reason: e.to_string() }, record)
            }
        };
        sink.emit(MetricRecord::Build(record));
        Self::new(state, embedder, Arc::new(NoopReranker), settings, sink)
    }

    /// Replace the reranker on a ready service.
    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.retriever = self.retriever.map(|r| r.with_reranker(reranker));
        self
    }

    pub fn state(&self) -> &IndexState { &self.state }

    pub fn is_ready(&self) -> bool { matches!(self.state, IndexState::Ready(_)) }

    pub fn default_top_k(&self) -> usize { self.default_top_k }

    pub fn total_chunks(&self) -> usize {
        match &self.state {
            IndexState::Ready(index) => index.len(),
            IndexState::Unavailable { .. } => 0,
        }
    }

    pub async fn retrieve_evidence(&self, query: &str, top_k: usize) -> EvidenceSet {
        self.retrieve_traced(query, top_k).await.0
    }

    /// Like [`Self::retrieve_evidence`], also returning the emitted record.
    pub async fn retrieve_traced(&self, query: &str, top_k: usize) -> (EvidenceSet, QueryRecord) {
        let retrieval = match (&self.retriever, &self.state) {
            (Some(retriever), _) => retriever.retrieve(query, top_k).await,
            (None, IndexState::Unavailable { reason }) => {
                let mut r = Retrieval::empty(RetrievalMode::Empty);
                r.degradations.push(DegradationEvent::new(DegradationReason::IndexUnavailable, reason.clone()));
                warn!(reason = %reason, "query against unavailable index");
                r
            }
            (None, IndexState::Ready(_)) => Retrieval::empty(RetrievalMode::Empty),
        };
        let record = QueryRecord::from_retrieval(query, top_k.max(1), self.total_chunks(), &retrieval);
        self.sink.emit(MetricRecord::Query(record.clone()));

        let mut warnings: Vec<String> = Vec::new();
        for event in &retrieval.degradations {
            let note = event.reason.warning().to_string();
            if !warnings.contains(&note) {
                warnings.push(note);
            }
        }
        let set = EvidenceSet {
            items: retrieval.results.iter().map(EvidenceItem::from).collect(),
            mode: retrieval.mode,
            degradation: retrieval.primary_reason(),
            warnings,
        };
        (set, record)
    }

    pub fn flush_metrics(&self) {
        self.sink.flush();
    }
}
