use evidence_core::{Chunker, DocumentChunk};
use evidence_text::{analyze_chunks, Bm25Index, LexicalAnalyzer};

fn chunks() -> Vec<DocumentChunk> {
    let text = "## 第一季度\n第一季度销售额为500万。主要来自华东区域。渠道贡献稳定。\n\n## 第二季度\n第二季度销售额为600万。增长来自新产品。渠道继续扩张。\n\n## 团队\n研发团队扩充到四十人，招聘仍在进行。";
    Chunker::default().chunk(text, "report.md")
}

#[test]
fn cjk_query_matches_sales_chunks_only() {
    let analyzer = LexicalAnalyzer::new();
    let chunks = chunks();
    assert_eq!(chunks.len(), 3);
    let postings = analyze_chunks(&analyzer, &chunks);
    assert!(postings.iter().all(|p| p.is_well_formed()));

    let index = Bm25Index::from_postings(&postings);
    let hits = index.top_m(&analyzer.tokenize("销售额"), 50);
    let rows: Vec<usize> = hits.iter().map(|h| h.0).collect();
    assert_eq!(rows.len(), 2);
    assert!(rows.contains(&0) && rows.contains(&1));
    assert!(hits.iter().all(|h| h.1 > 0.0));
}

#[test]
fn unknown_terms_yield_no_hits() {
    let analyzer = LexicalAnalyzer::new();
    let index = Bm25Index::from_postings(&analyze_chunks(&analyzer, &chunks()));
    assert!(index.top_m(&analyzer.tokenize("quantum"), 50).is_empty());
    assert!(index.top_m(&[], 50).is_empty());
}

#[test]
fn top_m_is_bounded_and_deterministic() {
    let analyzer = LexicalAnalyzer::new();
    let index = Bm25Index::from_postings(&analyze_chunks(&analyzer, &chunks()));
    let q = analyzer.tokenize("渠道 季度");
    let a = index.top_m(&q, 1);
    assert_eq!(a.len(), 1);
    assert_eq!(a, index.top_m(&q, 1));
}

#[test]
fn empty_index_scores_nothing() {
    let index = Bm25Index::from_postings(&[]);
    assert!(index.is_empty());
    assert!(index.top_m(&["x".to_string()], 5).is_empty());
}
