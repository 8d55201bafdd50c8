//! Domain types shared by the chunker, the index and the retriever.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub type ChunkId = String;

/// A bounded, provenance-tagged span of source text; the unit of retrieval.
///
/// - `id`: `"{source_file}#{sequence_index:04}"`, stable for a snapshot
/// - `text`: exactly the characters `[char_offset_start, char_offset_end)` of the source
/// - `source_file`/`section_title`: provenance, either may be empty
/// - `sequence_index`: position among the chunks of the same source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: ChunkId,
    pub text: String,
    pub source_file: String,
    pub section_title: String,
    pub char_offset_start: usize,
    pub char_offset_end: usize,
    pub sequence_index: usize,
}

impl DocumentChunk {
    pub fn make_id(source_file: &str, sequence_index: usize) -> ChunkId {
        format!("{source_file}#{sequence_index:04}")
    }

    /// Length in characters, which is how chunk bounds are measured.
    pub fn char_len(&self) -> usize {
        self.char_offset_end - self.char_offset_start
    }
}

/// A chunk with its final score and the component scores that produced it.
///
/// Component scores are raw (BM25, cosine, reranker output); `score` is the
/// fused value or, for re-ranked rows, the rerank score lifted to no lower
/// than the best row that was not re-ranked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub chunk: DocumentChunk,
    pub score: f32,
    pub lexical_score: Option<f32>,
    pub vector_score: Option<f32>,
    pub rerank_score: Option<f32>,
}

impl RetrievalResult {
    /// Descending score, then ascending `sequence_index`, then ascending `id`.
    pub fn rank_cmp(a: &Self, b: &Self) -> Ordering {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.chunk.sequence_index.cmp(&b.chunk.sequence_index))
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    }
}

/// What downstream generation and evaluation stages see. Evidence is
/// referenced by `chunk_id` only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub chunk_id: ChunkId,
    pub text: String,
    pub source_file: String,
    pub section_title: String,
    pub score: f32,
}

impl From<&RetrievalResult> for EvidenceItem {
    fn from(r: &RetrievalResult) -> Self {
        Self {
            chunk_id: r.chunk.id.clone(),
            text: r.chunk.text.clone(),
            source_file: r.chunk.source_file.clone(),
            section_title: r.chunk.section_title.clone(),
            score: r.score,
        }
    }
}

/// A loaded source document, already sanitized (no BOM, `\n` line endings).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedDocument {
    pub source_file: String,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, seq: usize, score: f32) -> RetrievalResult {
        RetrievalResult {
            chunk: DocumentChunk {
                id: id.to_string(),
                text: "t".to_string(),
                source_file: "a.md".to_string(),
                section_title: String::new(),
                char_offset_start: 0,
                char_offset_end: 1,
                sequence_index: seq,
            },
            score,
            lexical_score: None,
            vector_score: None,
            rerank_score: None,
        }
    }

    #[test]
    fn ties_break_by_sequence_then_id() {
        let mut rows = vec![result("b#0001", 1, 0.5), result("a#0001", 1, 0.5), result("c#0000", 0, 0.5), result("d#0009", 9, 0.9)];
        rows.sort_by(RetrievalResult::rank_cmp);
        let ids: Vec<&str> = rows.iter().map(|r| r.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["d#0009", "c#0000", "a#0001", "b#0001"]);
    }

    #[test]
    fn chunk_id_is_zero_padded() {
        assert_eq!(DocumentChunk::make_id("notes/q3.md", 7), "notes/q3.md#0007");
    }
}
