use std::collections::HashSet;
use std::fs;
use tempfile::TempDir;

use evidence_core::config::{CandidateStrategy, ChunkerSettings, Config};
use evidence_core::data_processor::{Corpus, DataProcessor};
use evidence_core::{Chunker, DocumentChunk, LoadedDocument};
use figment::providers::{Format, Toml};
use figment::Figment;

fn long_cjk_paragraph(sentences: usize) -> String {
    (0..sentences).map(|i| format!("第{i}季度的销售额保持稳定增长，团队继续推进渠道建设。")).collect()
}

fn assert_traceable(text: &str, chunks: &[DocumentChunk]) {
    let chars: Vec<char> = text.chars().collect();
    for c in chunks {
        assert!(c.char_offset_end > c.char_offset_start, "non-empty span for {}", c.id);
        let slice: String = chars[c.char_offset_start..c.char_offset_end].iter().collect();
        assert_eq!(slice, c.text, "chunk text is the source slice for {}", c.id);
    }
}

fn assert_covers(text: &str, chunks: &[DocumentChunk]) {
    let mut covered = vec![false; text.chars().count()];
    for c in chunks { for slot in &mut covered[c.char_offset_start..c.char_offset_end] { *slot = true; } }
    for (i, ch) in text.chars().enumerate() {
        assert!(covered[i] || ch.is_whitespace(), "char {i} ({ch}) not covered by any chunk");
    }
}

#[test]
fn empty_and_whitespace_input_yield_no_chunks() {
    let chunker = Chunker::default();
    assert!(chunker.chunk("", "a.md").is_empty());
    assert!(chunker.chunk("  \n\t \n", "a.md").is_empty());
}

#[test]
fn heading_without_body_yields_no_chunks() {
    let chunker = Chunker::default();
    assert!(chunker.chunk("# 标题", "a.md").is_empty());
    let chunks = chunker.chunk("# 标题\n正文内容。", "a.md");
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].section_title, "标题");
    assert_eq!(chunks[0].text.trim(), "正文内容。");
}

#[test]
fn cjk_paragraph_respects_band_and_overlaps() {
    let text = long_cjk_paragraph(40);
    let chunker = Chunker::new(ChunkerSettings::default());
    let chunks = chunker.chunk(&text, "sales.md");

    assert!(chunks.len() > 2);
    assert_traceable(&text, &chunks);
    assert_covers(&text, &chunks);
    for (i, c) in chunks.iter().enumerate() {
        assert_eq!(c.sequence_index, i);
        assert!(c.char_len() <= 300, "chunk {} has {} chars", c.id, c.char_len());
        if i + 1 < chunks.len() {
            assert!(c.char_len() >= 200, "non-final chunk {} is undersized ({})", c.id, c.char_len());
            assert!(chunks[i + 1].char_offset_start < c.char_offset_end, "chunk {} repeats the previous sentence", i + 1);
        }
    }
    let ids: HashSet<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids.len(), chunks.len());
}

#[test]
fn zero_overlap_produces_disjoint_chunks() {
    let text = long_cjk_paragraph(30);
    let chunker = Chunker::new(ChunkerSettings { overlap_sentences: 0, ..ChunkerSettings::default() });
    let chunks = chunker.chunk(&text, "a.md");
    for pair in chunks.windows(2) {
        assert!(pair[1].char_offset_start >= pair[0].char_offset_end);
    }
    assert_covers(&text, &chunks);
}

#[test]
fn text_without_markers_falls_back_to_windows() {
    let text = "数据".repeat(600);
    let chunks = Chunker::default().chunk(&text, "raw.txt");
    assert!(chunks.len() >= 4);
    assert_traceable(&text, &chunks);
    assert_covers(&text, &chunks);
    assert!(chunks.iter().all(|c| c.char_len() <= 300));
}

#[test]
fn headings_become_section_titles() {
    let text = "# 云网融合概述\n\n云网融合强调计算资源与网络资源的一体化编排。\n\n## 核心能力\n\n关键能力包括一体化调度、资源可视化以及智能运维。";
    let chunks = Chunker::default().chunk(text, "cloud.md");
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].section_title, "云网融合概述");
    assert_eq!(chunks[1].section_title, "核心能力");
    assert!(chunks.iter().all(|c| !c.text.contains('#')));
    assert_traceable(text, &chunks);
}

#[test]
fn short_paragraphs_merge_into_one_chunk() {
    let text = "Alpha one. Alpha two.\n\nBeta one. Beta two.";
    let chunks = Chunker::default().chunk(text, "notes.txt");
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].text, text);
}

#[test]
fn quarterly_sales_sections_are_separate_traceable_chunks() {
    let text = "## 第一季度\n第一季度销售额为500万。主要来自华东区域。渠道贡献稳定。\n\n## 第二季度\n第二季度销售额为600万。增长来自新产品。渠道继续扩张。";
    let chunks = Chunker::default().chunk(text, "report.md");
    assert_eq!(chunks.len(), 2);
    assert_ne!(chunks[0].id, chunks[1].id);
    assert!(chunks[0].text.contains("500万") && chunks[1].text.contains("600万"));
    assert_traceable(text, &chunks);
}

#[test]
fn process_directory_loads_sanitizes_and_skips_bad_files() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();
    fs::create_dir_all(dir.join("sub")).unwrap();
    fs::write(dir.join("a.md"), "\u{feff}# 标题\r\n正文。\r\n").unwrap();
    fs::write(dir.join("sub/b.txt"), "plain text.").unwrap();
    fs::write(dir.join("ignored.bin"), [0u8, 1, 2]).unwrap();
    fs::write(dir.join("bad.txt"), [0xffu8, 0xfe, 0xfd]).unwrap();

    let corpus = DataProcessor::new().process_directory(dir).expect("process");

    let names: Vec<&str> = corpus.documents.iter().map(|d| d.source_file.as_str()).collect();
    assert_eq!(names, vec!["a.md", "sub/b.txt"]);
    assert_eq!(corpus.documents[0].text, "# 标题\n正文。\n");
    assert_eq!(corpus.skipped.len(), 1);
    assert_eq!(corpus.skipped[0].file, "bad.txt");
}

#[test]
fn process_directory_limited_two_files_limit_one() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("a.txt"), "alpha bravo").unwrap();
    fs::write(tmp.path().join("b.txt"), "charlie delta").unwrap();

    let corpus = DataProcessor::new().process_directory_limited(tmp.path(), 1).expect("process limited");
    assert_eq!(corpus.documents.len(), 1, "limited to one source document");
}

#[test]
fn normalized_text_depends_on_names_and_content() {
    let a = Corpus::from_documents(vec![LoadedDocument { source_file: "a.md".into(), text: "x".into() }]);
    let b = Corpus::from_documents(vec![LoadedDocument { source_file: "b.md".into(), text: "x".into() }]);
    assert_ne!(a.normalized_text(), b.normalized_text());
    assert_eq!(a.normalized_text(), a.clone().normalized_text());
}

#[test]
fn config_layers_over_defaults() {
    let figment = Figment::new().merge(Toml::string("[retrieval]\nalpha = 0.3\ncandidate_strategy = \"intersect\"\n[chunking]\nmax_chars = 250"));
    let settings = Config::from_figment(figment).settings().expect("settings");
    assert!((settings.retrieval.alpha - 0.3).abs() < 1e-6);
    assert_eq!(settings.retrieval.candidate_strategy, CandidateStrategy::Intersect);
    assert_eq!(settings.chunking.max_chars, 250);
    assert_eq!(settings.chunking.min_chars, 200);
    assert_eq!(settings.index.embed_batch_size, 32);
}

#[test]
fn config_rejects_invalid_alpha() {
    let figment = Figment::new().merge(Toml::string("[retrieval]\nalpha = 2.0"));
    assert!(Config::from_figment(figment).settings().is_err());
}
