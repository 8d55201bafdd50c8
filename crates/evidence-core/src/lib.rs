//! evidence-core
//!
//! Data model, ports, error taxonomy, configuration, corpus loading and the
//! chunker shared by the index and retrieval crates.
pub mod chunker;
pub mod config;
pub mod data_processor;
pub mod error;
pub mod traits;
pub mod types;

pub use chunker::Chunker;
pub use error::{Error, Result};
pub use traits::{Embedder, NoopReranker, Reranker};
pub use types::{ChunkId, DocumentChunk, EvidenceItem, LoadedDocument, RetrievalResult};
