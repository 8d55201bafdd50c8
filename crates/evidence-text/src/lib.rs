//! evidence-text
//!
//! Lexical side of retrieval: the tantivy analyzer chain extended with CJK
//! bigrams, and BM25 scoring over per-chunk postings.
pub mod tantivy_utils;
pub mod analyzer;
pub mod bm25;

pub use analyzer::LexicalAnalyzer;
pub use bm25::{Bm25Index, ChunkPostings};

use evidence_core::DocumentChunk;

/// Postings for every chunk, in chunk order.
pub fn analyze_chunks(analyzer: &LexicalAnalyzer, chunks: &[DocumentChunk]) -> Vec<ChunkPostings> {
    chunks.iter().map(|c| ChunkPostings::analyze(analyzer, &c.text)).collect()
}
