//! Candidate selection, score normalisation and fusion.
//!
//! Everything here is pure so the stage outcomes can be combined and tested
//! without an index or an embedder.
use std::collections::BTreeSet;

use evidence_core::config::CandidateStrategy;
use evidence_core::RetrievalResult;

use crate::degradation::RetrievalMode;

/// Spread below which a signal counts as constant.
const FLAT_EPSILON: f32 = 1e-9;

/// Min-max normalise into `[0, 1]`. A constant signal maps to 1.0 when
/// positive and 0.0 otherwise.
pub fn min_max_normalize(values: &[f32]) -> Vec<f32> {
    let (min, max) = values
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if values.is_empty() {
        return Vec::new();
    }
    let spread = max - min;
    if spread < FLAT_EPSILON {
        let flat = if max > 0.0 { 1.0 } else { 0.0 };
        return vec![flat; values.len()];
    }
    values.iter().map(|v| (v - min) / spread).collect()
}

/// A candidate row with its fused score and raw component scores.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRow {
    pub row: usize,
    pub fused: f32,
    pub lexical: Option<f32>,
    pub vector: Option<f32>,
}

pub fn mode_for(lexical_ok: bool, vector_ok: bool) -> RetrievalMode {
    match (lexical_ok, vector_ok) {
        (true, true) => RetrievalMode::Full,
        (true, false) => RetrievalMode::LexicalOnly,
        (false, true) => RetrievalMode::VectorOnly,
        (false, false) => RetrievalMode::Empty,
    }
}

/// Rows to score, ascending. `Intersect` and `LexicalRestricted` fall back to
/// the union when their restricted set is empty.
pub fn select_candidates(strategy: CandidateStrategy, lexical: &[(usize, f32)], vector: &[(usize, f32)]) -> Vec<usize> {
    let lex: BTreeSet<usize> = lexical.iter().map(|h| h.0).collect();
    let vec: BTreeSet<usize> = vector.iter().map(|h| h.0).collect();
    let restricted: BTreeSet<usize> = match strategy {
        CandidateStrategy::Union => BTreeSet::new(),
        CandidateStrategy::Intersect => lex.intersection(&vec).copied().collect(),
        CandidateStrategy::LexicalRestricted => lex.clone(),
    };
    if strategy != CandidateStrategy::Union && !restricted.is_empty() {
        return restricted.into_iter().collect();
    }
    lex.union(&vec).copied().collect()
}

/// Combine whatever the two stages produced. `None` means the stage failed.
///
/// In full mode both raw signals are computed for every candidate through
/// the scoring callbacks, normalised over the candidate set and mixed as
/// `alpha * vector + (1 - alpha) * lexical`. With a single stage the score
/// is that stage's normalised signal.
pub fn fuse_stages(
    lexical: Option<&[(usize, f32)]>,
    vector: Option<&[(usize, f32)]>,
    strategy: CandidateStrategy,
    alpha: f32,
    lexical_score: impl Fn(usize) -> f32,
    vector_score: impl Fn(usize) -> f32,
) -> (RetrievalMode, Vec<ScoredRow>) {
    let mode = mode_for(lexical.is_some(), vector.is_some());
    let rows = match (lexical, vector) {
        (Some(lex), Some(vec)) => {
            let candidates = select_candidates(strategy, lex, vec);
            let lex_raw: Vec<f32> = candidates.iter().map(|&r| lexical_score(r)).collect();
            let vec_raw: Vec<f32> = candidates.iter().map(|&r| vector_score(r)).collect();
            let lex_norm = min_max_normalize(&lex_raw);
            let vec_norm = min_max_normalize(&vec_raw);
            candidates
                .iter()
                .enumerate()
                .map(|(i, &row)| ScoredRow {
                    row,
                    fused: alpha * vec_norm[i] + (1.0 - alpha) * lex_norm[i],
                    lexical: Some(lex_raw[i]),
                    vector: Some(vec_raw[i]),
                })
                .collect()
        }
        (Some(lex), None) => single_signal(lex, |row, raw| ScoredRow { row, fused: 0.0, lexical: Some(raw), vector: None }),
        (None, Some(vec)) => single_signal(vec, |row, raw| ScoredRow { row, fused: 0.0, lexical: None, vector: Some(raw) }),
        (None, None) => Vec::new(),
    };
    (mode, rows)
}

fn single_signal(hits: &[(usize, f32)], make: impl Fn(usize, f32) -> ScoredRow) -> Vec<ScoredRow> {
    let raw: Vec<f32> = hits.iter().map(|h| h.1).collect();
    let norm = min_max_normalize(&raw);
    hits.iter()
        .zip(norm)
        .map(|(&(row, raw), fused)| ScoredRow { fused, ..make(row, raw) })
        .collect()
}

/// Re-rank the first `scores.len()` results of a fused, sorted list. Those
/// rows are ordered by rerank score ahead of the rest, which keep their fused
/// order. When the rerank scores fall below the tail, the head is shifted so
/// its lowest final score equals the tail's best and the list stays
/// descending; `rerank_score` keeps the raw value.
pub fn apply_rerank(results: &mut Vec<RetrievalResult>, scores: &[f32]) {
    let r = scores.len().min(results.len());
    let mut head: Vec<RetrievalResult> = results.drain(..r).collect();
    let head_min = scores[..r].iter().copied().fold(f32::INFINITY, f32::min);
    let tail_max = results.iter().map(|t| t.score).fold(f32::NEG_INFINITY, f32::max);
    for (result, &score) in head.iter_mut().zip(scores) {
        result.rerank_score = Some(score);
        result.score = if head_min < tail_max { (score - head_min) + tail_max } else { score };
    }
    head.sort_by(RetrievalResult::rank_cmp);
    head.append(results);
    *results = head;
}

#[cfg(test)]
mod tests {
    use super::*;
    use evidence_core::DocumentChunk;

    fn result(seq: usize, score: f32) -> RetrievalResult {
        RetrievalResult {
            chunk: DocumentChunk {
                id: DocumentChunk::make_id("a.md", seq),
                text: format!("chunk {seq}"),
                source_file: "a.md".into(),
                section_title: String::new(),
                char_offset_start: 0,
                char_offset_end: 7,
                sequence_index: seq,
            },
            score,
            lexical_score: None,
            vector_score: None,
            rerank_score: None,
        }
    }

    #[test]
    fn normalization_edge_rules() {
        assert_eq!(min_max_normalize(&[]), Vec::<f32>::new());
        assert_eq!(min_max_normalize(&[2.0, 2.0]), vec![1.0, 1.0]);
        assert_eq!(min_max_normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
        assert_eq!(min_max_normalize(&[-1.0]), vec![0.0]);
        assert_eq!(min_max_normalize(&[1.0, 3.0, 2.0]), vec![0.0, 1.0, 0.5]);
    }

    #[test]
    fn modes_follow_stage_outcomes() {
        assert_eq!(mode_for(true, true), RetrievalMode::Full);
        assert_eq!(mode_for(true, false), RetrievalMode::LexicalOnly);
        assert_eq!(mode_for(false, true), RetrievalMode::VectorOnly);
        assert_eq!(mode_for(false, false), RetrievalMode::Empty);
    }

    #[test]
    fn candidate_strategies() {
        let lex: [(usize, f32); 2] = [(1, 2.0), (3, 1.0)];
        let vec: [(usize, f32); 2] = [(2, 0.9), (3, 0.5)];
        assert_eq!(select_candidates(CandidateStrategy::Union, &lex, &vec), vec![1, 2, 3]);
        assert_eq!(select_candidates(CandidateStrategy::Intersect, &lex, &vec), vec![3]);
        assert_eq!(select_candidates(CandidateStrategy::LexicalRestricted, &lex, &vec), vec![1, 3]);
        assert_eq!(select_candidates(CandidateStrategy::Intersect, &[(1, 1.0)], &vec), vec![1, 2, 3]);
        assert_eq!(select_candidates(CandidateStrategy::LexicalRestricted, &[], &vec), vec![2, 3]);
    }

    #[test]
    fn full_fusion_uses_both_raw_signals_for_every_candidate() {
        let lex = [(0usize, 4.0f32)];
        let vec = [(1usize, 0.8f32)];
        let lex_raw = |row: usize| if row == 0 { 4.0 } else { 0.0 };
        let vec_raw = |row: usize| if row == 0 { 0.2 } else { 0.8 };
        let (mode, rows) = fuse_stages(Some(&lex[..]), Some(&vec[..]), CandidateStrategy::Union, 0.6, lex_raw, vec_raw);
        assert_eq!(mode, RetrievalMode::Full);
        assert_eq!(rows.len(), 2);
        assert!((rows[0].fused - 0.4).abs() < 1e-6);
        assert!((rows[1].fused - 0.6).abs() < 1e-6);
        assert_eq!(rows[1].lexical, Some(0.0));
        assert_eq!(rows[0].vector, Some(0.2));
    }

    #[test]
    fn alpha_extremes_select_one_signal() {
        let lex = [(0usize, 4.0f32), (1, 1.0)];
        let vec = [(0usize, 0.1f32), (1, 0.9)];
        let lr = |row: usize| lex[row].1;
        let vr = |row: usize| vec[row].1;
        let (_, only_lex) = fuse_stages(Some(&lex[..]), Some(&vec[..]), CandidateStrategy::Union, 0.0, lr, vr);
        assert_eq!(only_lex.iter().map(|r| r.fused).collect::<Vec<_>>(), vec![1.0, 0.0]);
        let (_, only_vec) = fuse_stages(Some(&lex[..]), Some(&vec[..]), CandidateStrategy::Union, 1.0, lr, vr);
        assert_eq!(only_vec.iter().map(|r| r.fused).collect::<Vec<_>>(), vec![0.0, 1.0]);
    }

    #[test]
    fn lexical_failure_degrades_to_vector_only() {
        let vec = [(4usize, 0.5f32), (2, 0.5)];
        let (mode, rows) = fuse_stages(None, Some(&vec[..]), CandidateStrategy::Union, 0.6, |_| 0.0, |_| 0.0);
        assert_eq!(mode, RetrievalMode::VectorOnly);
        assert!(rows.iter().all(|r| r.fused == 1.0 && r.lexical.is_none() && r.vector == Some(0.5)));
    }

    #[test]
    fn both_failed_is_empty() {
        let (mode, rows) = fuse_stages(None, None, CandidateStrategy::Union, 0.6, |_| 0.0, |_| 0.0);
        assert_eq!(mode, RetrievalMode::Empty);
        assert!(rows.is_empty());
    }

    #[test]
    fn reranked_head_goes_first_and_tail_keeps_fused_order() {
        let mut results = vec![result(0, 0.9), result(1, 0.8), result(2, 0.7), result(3, 0.6)];
        apply_rerank(&mut results, &[0.1, 0.5]);
        let seqs: Vec<usize> = results.iter().map(|r| r.chunk.sequence_index).collect();
        assert_eq!(seqs, vec![1, 0, 2, 3]);
        assert_eq!(results[0].rerank_score, Some(0.5));
        assert_eq!(results[2].rerank_score, None);
        assert_eq!(results[2].score, 0.7);
        assert!((results[0].score - 1.1).abs() < 1e-6);
        assert_eq!(results[1].score, 0.7);
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn rerank_scores_above_tail_are_kept_raw() {
        let mut results = vec![result(0, 0.9), result(1, 0.8), result(2, 0.1)];
        apply_rerank(&mut results, &[3.0, 5.0]);
        let seqs: Vec<usize> = results.iter().map(|r| r.chunk.sequence_index).collect();
        assert_eq!(seqs, vec![1, 0, 2]);
        assert_eq!(results[0].score, 5.0);
        assert_eq!(results[1].score, 3.0);
    }

    #[test]
    fn negative_rerank_scores_stay_descending() {
        let mut results = vec![result(0, 0.9), result(1, 0.4), result(2, 0.0)];
        apply_rerank(&mut results, &[-3.0]);
        assert_eq!(results[0].rerank_score, Some(-3.0));
        assert_eq!(results[0].score, 0.4);
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    }
}
