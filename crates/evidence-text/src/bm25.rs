//! Okapi BM25 over per-chunk postings.
//!
//! Only [`ChunkPostings`] are persisted. Inverted lists, document
//! frequencies and the average length are rebuilt from them whenever an
//! index is constructed or loaded.
use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::analyzer::LexicalAnalyzer;

pub const K1: f32 = 1.2;
pub const B: f32 = 0.75;

/// Term frequencies of one chunk, sorted by term, plus its token length.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPostings {
    pub terms: Vec<(String, u32)>,
    pub length: u32,
}

impl ChunkPostings {
    pub fn from_tokens(tokens: Vec<String>) -> Self {
        let length = tokens.len() as u32;
        let mut counts: BTreeMap<String, u32> = BTreeMap::new();
        for t in tokens {
            *counts.entry(t).or_insert(0) += 1;
        }
        Self { terms: counts.into_iter().collect(), length }
    }

    pub fn analyze(analyzer: &LexicalAnalyzer, text: &str) -> Self {
        Self::from_tokens(analyzer.tokenize(text))
    }

    /// `terms` strictly increasing and frequencies summing to `length`.
    pub fn is_well_formed(&self) -> bool {
        let sorted = self.terms.windows(2).all(|w| w[0].0 < w[1].0);
        let total: u64 = self.terms.iter().map(|(_, tf)| u64::from(*tf)).sum();
        sorted && self.terms.iter().all(|(_, tf)| *tf > 0) && total == u64::from(self.length)
    }

    fn tf(&self, term: &str) -> u32 {
        self.terms
            .binary_search_by(|(t, _)| t.as_str().cmp(term))
            .map_or(0, |i| self.terms[i].1)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Bm25Index {
    /// term -> [(row, tf)] in row order
    inverted: HashMap<String, Vec<(usize, u32)>>,
    lengths: Vec<u32>,
    avg_len: f32,
}

impl Bm25Index {
    pub fn from_postings(postings: &[ChunkPostings]) -> Self {
        let mut inverted: HashMap<String, Vec<(usize, u32)>> = HashMap::new();
        for (row, p) in postings.iter().enumerate() {
            for (term, tf) in &p.terms {
                inverted.entry(term.clone()).or_default().push((row, *tf));
            }
        }
        let lengths: Vec<u32> = postings.iter().map(|p| p.length).collect();
        let total: u64 = lengths.iter().map(|&l| u64::from(l)).sum();
        let avg_len = if lengths.is_empty() { 0.0 } else { total as f32 / lengths.len() as f32 };
        Self { inverted, lengths, avg_len }
    }

    pub fn len(&self) -> usize {
        self.lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }

    pub fn doc_freq(&self, term: &str) -> usize {
        self.inverted.get(term).map_or(0, Vec::len)
    }

    /// Lucene-style idf, always positive.
    pub fn idf(&self, term: &str) -> f32 {
        let n = self.len() as f32;
        let df = self.doc_freq(term) as f32;
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
    }

    fn term_weight(&self, idf: f32, tf: u32, row: usize) -> f32 {
        let tf = tf as f32;
        let len = self.lengths[row] as f32;
        let norm = if self.avg_len > 0.0 { len / self.avg_len } else { 1.0 };
        idf * tf * (K1 + 1.0) / (tf + K1 * (1.0 - B + B * norm))
    }

    /// Scores for every row that matches at least one query term.
    pub fn score_all(&self, query_terms: &[String]) -> HashMap<usize, f32> {
        let mut scores: HashMap<usize, f32> = HashMap::new();
        for term in dedup(query_terms) {
            let Some(list) = self.inverted.get(term) else { continue };
            let idf = self.idf(term);
            for &(row, tf) in list {
                *scores.entry(row).or_insert(0.0) += self.term_weight(idf, tf, row);
            }
        }
        scores
    }

    /// Score of a single row, 0.0 when it shares no query term.
    pub fn score_row(&self, query_terms: &[String], row: usize, postings: &ChunkPostings) -> f32 {
        if row >= self.len() {
            return 0.0;
        }
        dedup(query_terms)
            .into_iter()
            .map(|term| match postings.tf(term) {
                0 => 0.0,
                tf => self.term_weight(self.idf(term), tf, row),
            })
            .sum()
    }

    /// Up to `m` rows with a positive score, best first; ties by row.
    pub fn top_m(&self, query_terms: &[String], m: usize) -> Vec<(usize, f32)> {
        let mut hits: Vec<(usize, f32)> = self.score_all(query_terms).into_iter().filter(|(_, s)| *s > 0.0).collect();
        hits.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        hits.truncate(m);
        hits
    }
}

/// Repeated query terms count once, in first-seen order.
fn dedup(terms: &[String]) -> Vec<&str> {
    let mut seen = Vec::with_capacity(terms.len());
    for t in terms {
        if !seen.contains(&t.as_str()) {
            seen.push(t.as_str());
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(tokens: &[&str]) -> ChunkPostings {
        ChunkPostings::from_tokens(tokens.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn postings_are_sorted_and_counted() {
        let post = p(&["b", "a", "b"]);
        assert_eq!(post.terms, vec![("a".to_string(), 1), ("b".to_string(), 2)]);
        assert_eq!(post.length, 3);
        assert!(post.is_well_formed());
    }

    #[test]
    fn idf_stays_positive_on_tiny_corpora() {
        let idx = Bm25Index::from_postings(&[p(&["x"]), p(&["x", "y"])]);
        assert!(idx.idf("x") > 0.0);
        assert!(idx.idf("y") > idx.idf("x"));
    }

    #[test]
    fn score_row_matches_score_all() {
        let docs = vec![p(&["a", "b"]), p(&["b", "c", "c"]), p(&["d"])];
        let idx = Bm25Index::from_postings(&docs);
        let q = vec!["c".to_string(), "b".to_string()];
        let all = idx.score_all(&q);
        for (row, doc) in docs.iter().enumerate() {
            let expected = all.get(&row).copied().unwrap_or(0.0);
            assert!((idx.score_row(&q, row, doc) - expected).abs() < 1e-6);
        }
        assert_eq!(idx.top_m(&q, 10).first().map(|h| h.0), Some(1));
    }
}
