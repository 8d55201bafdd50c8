//! evidence-hybrid
//!
//! Query side: lexical and vector candidate generation, score fusion,
//! optional re-ranking, degradation handling and retrieval metrics.
pub mod degradation;
pub mod fusion;
pub mod metrics;
pub mod retriever;
pub mod service;

pub use degradation::{DegradationEvent, DegradationReason, Retrieval, RetrievalMode, StageTrace};
pub use metrics::{BuildOrigin, BuildRecord, JsonlSink, MemorySink, MetricRecord, MetricsSink, NullSink, QueryRecord, RunStats, RunSummary};
pub use retriever::{HybridRetriever, LexicalStage};
pub use service::{EvidenceService, EvidenceSet, IndexState};
