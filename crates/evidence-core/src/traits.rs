/// Embedding port. Providers must return vectors of the same dimensionality
/// for a given `model_id`; the index invalidates snapshots built by another id.
pub trait Embedder: Send + Sync {
    /// Stable identifier for the provider/model (e.g. `bge-m3:d1024`).
    fn model_id(&self) -> &str;
    fn dim(&self) -> usize;
    fn max_len(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;

    fn embed_query(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("embedder returned no vector for query"))
    }
}

/// Optional second-pass relevance scoring over a narrowed candidate set.
///
/// `score` returns one value per candidate, in input order.
pub trait Reranker: Send + Sync {
    fn enabled(&self) -> bool {
        true
    }
    fn score(&self, query: &str, candidates: &[String]) -> anyhow::Result<Vec<f32>>;
}

/// The default reranker: disabled, so fused ordering is used unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReranker;

impl Reranker for NoopReranker {
    fn enabled(&self) -> bool {
        false
    }

    fn score(&self, _query: &str, candidates: &[String]) -> anyhow::Result<Vec<f32>> {
        Ok(vec![0.0; candidates.len()])
    }
}
