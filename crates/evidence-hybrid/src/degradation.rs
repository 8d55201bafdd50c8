//! Retrieval modes, degradation reasons and the per-query stage trace.
use serde::{Deserialize, Serialize};

use evidence_core::RetrievalResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    /// Both signals contributed.
    Full,
    LexicalOnly,
    VectorOnly,
    /// Nothing could be searched.
    Empty,
}

impl RetrievalMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::LexicalOnly => "lexical_only",
            Self::VectorOnly => "vector_only",
            Self::Empty => "empty",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationReason {
    /// Query embedding failed, timed out or had the wrong dimension.
    EmbeddingUnavailable,
    LexicalUnavailable,
    IndexUnavailable,
    RerankFailed,
    RerankTimeout,
}

impl DegradationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EmbeddingUnavailable => "embedding_unavailable",
            Self::LexicalUnavailable => "lexical_unavailable",
            Self::IndexUnavailable => "index_unavailable",
            Self::RerankFailed => "rerank_failed",
            Self::RerankTimeout => "rerank_timeout",
        }
    }

    /// Human-readable note carried on evidence sets.
    pub fn warning(self) -> &'static str {
        match self {
            Self::EmbeddingUnavailable => "semantic search unavailable; results ranked by keyword match only",
            Self::LexicalUnavailable => "keyword search unavailable; results ranked by semantic similarity only",
            Self::IndexUnavailable => "evidence index unavailable; no evidence retrieved",
            Self::RerankFailed => "re-ranking failed; results use fused ranking",
            Self::RerankTimeout => "re-ranking timed out; results use fused ranking",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradationEvent {
    pub reason: DegradationReason,
    pub detail: String,
}

impl DegradationEvent {
    pub fn new(reason: DegradationReason, detail: impl Into<String>) -> Self {
        Self { reason, detail: detail.into() }
    }
}

/// Candidate counts and stage latencies for one query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageTrace {
    pub lexical_candidates: usize,
    pub vector_candidates: usize,
    pub fused_candidates: usize,
    pub reranked: usize,
    pub lexical_ms: f64,
    pub vector_ms: f64,
    pub fusion_ms: f64,
    pub rerank_ms: f64,
    pub total_ms: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Retrieval {
    pub results: Vec<RetrievalResult>,
    pub mode: RetrievalMode,
    pub degradations: Vec<DegradationEvent>,
    pub trace: StageTrace,
}

impl Retrieval {
    pub fn empty(mode: RetrievalMode) -> Self {
        Self { results: Vec::new(), mode, degradations: Vec::new(), trace: StageTrace::default() }
    }

    /// The first degradation recorded, if any.
    pub fn primary_reason(&self) -> Option<DegradationReason> {
        self.degradations.first().map(|e| e.reason)
    }

    pub fn is_degraded(&self) -> bool {
        !self.degradations.is_empty()
    }
}
