//! In-memory snapshot of chunks, lexical postings and embedding vectors.
//!
//! A `ChunkIndex` is immutable once built or loaded; share it as
//! `Arc<ChunkIndex>`. BM25 inverted lists and the id lookup are derived on
//! construction and never persisted.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};

use evidence_core::config::IndexSettings;
use evidence_core::{DocumentChunk, Embedder, Error, Result};
use evidence_text::{analyze_chunks, Bm25Index, ChunkPostings, LexicalAnalyzer};

/// Cooperative cancellation for long builds, checked between embedding batches.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self { Self::default() }
    pub fn cancel(&self) { self.0.store(true, Ordering::SeqCst); }
    pub fn is_cancelled(&self) -> bool { self.0.load(Ordering::SeqCst) }
}

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub batch_size: usize,
    pub normalize: bool,
    pub show_progress: bool,
    pub cancel: CancelFlag,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self::from_settings(&IndexSettings::default())
    }
}

impl BuildOptions {
    pub fn from_settings(settings: &IndexSettings) -> Self {
        Self {
            batch_size: settings.embed_batch_size.max(1),
            normalize: settings.normalize_embeddings,
            show_progress: settings.show_progress,
            cancel: CancelFlag::new(),
        }
    }
}

pub struct ChunkIndex {
    chunks: Vec<DocumentChunk>,
    postings: Vec<ChunkPostings>,
    vectors: Vec<f32>,
    dim: usize,
    model_id: String,
    normalized: bool,
    bm25: Bm25Index,
    row_by_id: HashMap<String, usize>,
    analyzer: LexicalAnalyzer,
}

impl std::fmt::Debug for ChunkIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkIndex")
            .field("chunks", &self.chunks.len())
            .field("dim", &self.dim)
            .field("model_id", &self.model_id)
            .field("normalized", &self.normalized)
            .finish()
    }
}

pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() { *x /= norm; }
    }
}

impl ChunkIndex {
    /// Assemble an index from its persisted components, checking that they agree.
    pub fn from_parts(
        chunks: Vec<DocumentChunk>,
        postings: Vec<ChunkPostings>,
        vectors: Vec<f32>,
        dim: usize,
        model_id: String,
        normalized: bool,
    ) -> Result<Self> {
        if postings.len() != chunks.len() {
            return Err(Error::InvalidConfig(format!("{} chunks but {} postings", chunks.len(), postings.len())));
        }
        if vectors.len() != chunks.len() * dim {
            return Err(Error::InvalidConfig(format!("{} chunks of dim {dim} but {} vector values", chunks.len(), vectors.len())));
        }
        let mut row_by_id = HashMap::with_capacity(chunks.len());
        for (row, chunk) in chunks.iter().enumerate() {
            if row_by_id.insert(chunk.id.clone(), row).is_some() {
                return Err(Error::DuplicateChunkId(chunk.id.clone()));
            }
        }
        let bm25 = Bm25Index::from_postings(&postings);
        Ok(Self { chunks, postings, vectors, dim, model_id, normalized, bm25, row_by_id, analyzer: LexicalAnalyzer::new() })
    }

    /// Analyse and embed `chunks`. Nothing is kept if any batch fails or the
    /// build is cancelled.
    pub fn build(chunks: Vec<DocumentChunk>, embedder: &dyn Embedder, options: &BuildOptions) -> Result<Self> {
        let mut seen = std::collections::HashSet::with_capacity(chunks.len());
        if let Some(dup) = chunks.iter().find(|c| !seen.insert(c.id.as_str())) {
            return Err(Error::DuplicateChunkId(dup.id.clone()));
        }
        let analyzer = LexicalAnalyzer::new();
        let postings = analyze_chunks(&analyzer, &chunks);
        let dim = embedder.dim();
        let model_id = embedder.model_id().to_string();
        if chunks.is_empty() {
            info!(%model_id, "building empty index");
            return Self::from_parts(chunks, postings, Vec::new(), dim, model_id, options.normalize);
        }

        let pb = if options.show_progress { ProgressBar::new(chunks.len() as u64) } else { ProgressBar::hidden() };
        if let Ok(style) = ProgressStyle::default_bar().template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chunks ({percent}%) {msg}") {
            pb.set_style(style.progress_chars("#>-"));
        }
        let batch_size = options.batch_size.max(1);
        let mut vectors = Vec::with_capacity(chunks.len() * dim);
        for (batch_no, batch) in chunks.chunks(batch_size).enumerate() {
            if options.cancel.is_cancelled() {
                pb.abandon_with_message("cancelled");
                info!(batch = batch_no, "index build cancelled");
                return Err(Error::Cancelled);
            }
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let rows = embedder.embed_batch(&texts).map_err(|e| {
                pb.abandon_with_message("embedding failed");
                Error::Embedding(format!("batch {batch_no}: {e:#}"))
            })?;
            if rows.len() != texts.len() {
                pb.abandon();
                return Err(Error::Embedding(format!("batch {batch_no}: embedder returned {} vectors for {} texts", rows.len(), texts.len())));
            }
            for mut row in rows {
                if row.len() != dim {
                    pb.abandon();
                    return Err(Error::Embedding(format!("dim mismatch: got {} expected {dim}", row.len())));
                }
                if options.normalize { l2_normalize(&mut row); }
                vectors.extend(row);
            }
            pb.inc(batch.len() as u64);
            debug!(batch = batch_no, size = batch.len(), "embedded batch");
        }
        pb.finish_with_message("embedded");
        info!(chunks = chunks.len(), dim, %model_id, "index built");
        Self::from_parts(chunks, postings, vectors, dim, model_id, options.normalize)
    }

    pub fn len(&self) -> usize { self.chunks.len() }
    pub fn is_empty(&self) -> bool { self.chunks.is_empty() }
    pub fn chunks(&self) -> &[DocumentChunk] { &self.chunks }
    pub fn chunk(&self, row: usize) -> Option<&DocumentChunk> { self.chunks.get(row) }
    pub fn postings(&self) -> &[ChunkPostings] { &self.postings }
    pub fn vectors(&self) -> &[f32] { &self.vectors }
    pub fn vector_dim(&self) -> usize { self.dim }
    pub fn embedding_model_id(&self) -> &str { &self.model_id }
    pub fn is_normalized(&self) -> bool { self.normalized }

    pub fn row_of(&self, chunk_id: &str) -> Option<usize> {
        self.row_by_id.get(chunk_id).copied()
    }

    pub fn vector(&self, row: usize) -> Option<&[f32]> {
        let start = row.checked_mul(self.dim)?;
        self.vectors.get(start..start + self.dim)
    }

    /// Analyse a query with the same chain used at build time.
    pub fn query_terms(&self, query: &str) -> Vec<String> {
        self.analyzer.tokenize(query)
    }

    /// Top `m` rows with positive BM25 score.
    pub fn lexical_top_m(&self, terms: &[String], m: usize) -> Vec<(usize, f32)> {
        self.bm25.top_m(terms, m)
    }

    pub fn lexical_score(&self, terms: &[String], row: usize) -> f32 {
        self.postings.get(row).map_or(0.0, |p| self.bm25.score_row(terms, row, p))
    }

    /// Check the query vector's shape and normalise it like the stored rows.
    pub fn prepare_query(&self, mut query: Vec<f32>) -> Result<Vec<f32>> {
        if query.len() != self.dim {
            return Err(Error::Embedding(format!("query dim {} does not match index dim {}", query.len(), self.dim)));
        }
        if self.normalized { l2_normalize(&mut query); }
        Ok(query)
    }

    /// Inner product of a prepared query against one row.
    pub fn vector_score(&self, query: &[f32], row: usize) -> f32 {
        self.vector(row).map_or(0.0, |v| v.iter().zip(query).map(|(a, b)| a * b).sum())
    }

    /// Top `m` rows by inner product, ties by row.
    pub fn vector_top_m(&self, query: &[f32], m: usize) -> Vec<(usize, f32)> {
        let mut hits: Vec<(usize, f32)> = (0..self.len()).map(|row| (row, self.vector_score(query, row))).collect();
        hits.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        hits.truncate(m);
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_leaves_zero_vectors_alone() {
        let mut v = vec![0.0, 0.0];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0]);
        let mut w = vec![3.0, 4.0];
        l2_normalize(&mut w);
        assert!((w[0] - 0.6).abs() < 1e-6 && (w[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn cancel_flag_is_shared_between_clones() {
        let flag = CancelFlag::new();
        let other = flag.clone();
        other.cancel();
        assert!(flag.is_cancelled());
    }
}
