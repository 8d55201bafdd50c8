//! Structure-aware document chunking.
//!
//! Sections (Markdown ATX headings) are split into sentences, sentences are
//! packed into chunks inside the configured character band, and each chunk
//! repeats the last sentence(s) of its predecessor. Full-width CJK terminators
//! are sentence boundaries in their own right. Text without any boundary
//! falls back to a sliding window that snaps to soft punctuation.
//!
//! All offsets are character offsets into the text given to [`Chunker::chunk`].
use crate::config::ChunkerSettings;
use crate::types::DocumentChunk;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: usize,
    end: usize,
    paragraph_start: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Section {
    title: String,
    start: usize,
    end: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Chunker {
    settings: ChunkerSettings,
}

impl Chunker {
    pub fn new(settings: ChunkerSettings) -> Self {
        Self { settings: settings.clamped() }
    }

    /// The effective (clamped) settings.
    pub fn settings(&self) -> &ChunkerSettings {
        &self.settings
    }

    /// Split one document into ordered chunks. Heading lines are provenance
    /// only, so a document with no body text (empty, whitespace, or headings
    /// alone) yields no chunks.
    pub fn chunk(&self, document_text: &str, source_file: &str) -> Vec<DocumentChunk> {
        if document_text.trim().is_empty() {
            return Vec::new();
        }
        let chars: Vec<char> = document_text.chars().collect();
        let mut chunks = Vec::new();
        for section in split_sections(&chars) {
            let units: Vec<Span> = split_sentences(&chars, section.start, section.end)
                .into_iter()
                .flat_map(|s| self.window_split(&chars, s))
                .collect();
            for (start, end) in self.pack(&units) {
                let sequence_index = chunks.len();
                chunks.push(DocumentChunk {
                    id: DocumentChunk::make_id(source_file, sequence_index),
                    text: chars[start..end].iter().collect(),
                    source_file: source_file.to_string(),
                    section_title: section.title.clone(),
                    char_offset_start: start,
                    char_offset_end: end,
                    sequence_index,
                });
            }
        }
        chunks
    }

    /// Break a sentence longer than `max_chars` into windows, cutting after a
    /// soft boundary in the second half of the window when one exists.
    fn window_split(&self, chars: &[char], span: Span) -> Vec<Span> {
        let max = self.settings.max_chars;
        if span.end - span.start <= max {
            return vec![span];
        }
        let overlap = self.settings.window_overlap_chars;
        let mut pieces = Vec::new();
        let mut start = span.start;
        loop {
            let paragraph_start = pieces.is_empty() && span.paragraph_start;
            if span.end - start <= max {
                pieces.push(Span { start, end: span.end, paragraph_start });
                break;
            }
            let hard = start + max;
            let floor = start + max / 2;
            let snapped = (floor + 1..=hard).rev().find(|&k| is_soft_boundary(chars[k - 1]));
            let (cut, next) = match snapped {
                Some(k) => (k, k),
                None => (hard, hard - overlap),
            };
            pieces.push(Span { start, end: trim_end(chars, start, cut), paragraph_start });
            start = next;
            while start < span.end && chars[start].is_whitespace() {
                start += 1;
            }
            if start >= span.end {
                break;
            }
        }
        pieces
    }

    /// Greedy packing of sentence units into `(start, end)` chunk ranges.
    fn pack(&self, units: &[Span]) -> Vec<(usize, usize)> {
        let ChunkerSettings { max_chars, min_chars, overlap_sentences, .. } = self.settings;
        let mut groups = Vec::new();
        let mut buffer: Vec<Span> = Vec::new();
        // Units in the buffer that were not carried over as overlap.
        let mut fresh = 0usize;

        for &unit in units {
            if fresh > 0 {
                if let (Some(first), Some(last)) = (buffer.first().copied(), buffer.last().copied()) {
                    let current_len = last.end - first.start;
                    let overflow = unit.end - first.start > max_chars;
                    if overflow || (unit.paragraph_start && current_len >= min_chars) {
                        groups.push((first.start, last.end));
                        let keep = overlap_sentences.min(buffer.len());
                        buffer.drain(..buffer.len() - keep);
                        fresh = 0;
                    }
                }
            }
            while buffer.first().is_some_and(|first| unit.end - first.start > max_chars) {
                buffer.remove(0);
            }
            buffer.push(unit);
            fresh += 1;
        }
        if fresh > 0 {
            if let (Some(first), Some(last)) = (buffer.first(), buffer.last()) {
                groups.push((first.start, last.end));
            }
        }
        groups
    }
}

fn is_hard_terminator(c: char) -> bool {
    matches!(c, '。' | '！' | '？' | '；' | '…' | '．' | '!' | '?' | ';')
}

fn is_closing(c: char) -> bool {
    matches!(c, '”' | '’' | '」' | '』' | '）' | '】' | '》' | ')' | ']' | '"' | '\'')
}

fn is_soft_boundary(c: char) -> bool {
    matches!(c, '，' | '、' | '：' | ',' | ':') || c.is_whitespace()
}

/// `.` only ends a sentence before whitespace, a closing mark or the end of
/// the section, so decimals and dotted names stay intact.
fn ends_sentence(chars: &[char], i: usize, end: usize) -> bool {
    let c = chars[i];
    if is_hard_terminator(c) {
        return true;
    }
    if c == '.' {
        return i + 1 >= end || chars[i + 1].is_whitespace() || is_closing(chars[i + 1]);
    }
    false
}

fn trim_end(chars: &[char], start: usize, mut end: usize) -> usize {
    while end > start && chars[end - 1].is_whitespace() {
        end -= 1;
    }
    end
}

fn push_span(spans: &mut Vec<Span>, chars: &[char], start: usize, end: usize, paragraph_start: bool) {
    let end = trim_end(chars, start, end);
    if end > start {
        spans.push(Span { start, end, paragraph_start });
    }
}

/// Sentence spans in `[start, end)`, trimmed of surrounding whitespace.
/// A blank line marks the next sentence as a paragraph start.
fn split_sentences(chars: &[char], start: usize, end: usize) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut current: Option<usize> = None;
    let mut newlines = 0usize;
    let mut paragraph_start = true;
    let mut i = start;
    while i < end {
        let c = chars[i];
        match current {
            None => {
                if c.is_whitespace() {
                    if c == '\n' {
                        newlines += 1;
                        if newlines >= 2 {
                            paragraph_start = true;
                        }
                    }
                    i += 1;
                } else {
                    current = Some(i);
                }
            }
            Some(s) if c == '\n' => {
                push_span(&mut spans, chars, s, i, paragraph_start);
                paragraph_start = false;
                current = None;
                newlines = 1;
                i += 1;
            }
            Some(s) if ends_sentence(chars, i, end) => {
                let mut j = i + 1;
                while j < end && (is_hard_terminator(chars[j]) || is_closing(chars[j]) || chars[j] == '.') {
                    j += 1;
                }
                push_span(&mut spans, chars, s, j, paragraph_start);
                paragraph_start = false;
                current = None;
                newlines = 0;
                i = j;
            }
            Some(_) => i += 1,
        }
    }
    if let Some(s) = current {
        push_span(&mut spans, chars, s, end, paragraph_start);
    }
    spans
}

/// `#`..`######` followed by whitespace and a non-empty title.
fn heading_title(line: &[char]) -> Option<String> {
    let text: String = line.iter().collect();
    let trimmed = text.trim();
    let hashes = trimmed.chars().take_while(|&c| c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &trimmed[hashes..];
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let title = rest.trim();
    if title.is_empty() { None } else { Some(title.to_string()) }
}

fn split_sections(chars: &[char]) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut title = String::new();
    let mut body_start = 0usize;
    let mut line_start = 0usize;
    while line_start < chars.len() {
        let line_end = chars[line_start..].iter().position(|&c| c == '\n').map_or(chars.len(), |p| line_start + p);
        if let Some(heading) = heading_title(&chars[line_start..line_end]) {
            sections.push(Section { title: std::mem::replace(&mut title, heading), start: body_start, end: line_start });
            body_start = line_end;
        }
        line_start = line_end + 1;
    }
    sections.push(Section { title, start: body_start, end: chars.len() });
    sections.retain(|s| chars[s.start..s.end].iter().any(|c| !c.is_whitespace()));
    sections
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    #[test]
    fn sentences_split_on_full_width_terminators() {
        let text = chars("第一句。第二句！第三句？");
        let spans = split_sentences(&text, 0, text.len());
        assert_eq!(spans.len(), 3);
        assert_eq!((spans[1].start, spans[1].end), (4, 8));
    }

    #[test]
    fn decimal_point_does_not_end_sentence() {
        let text = chars("Revenue grew 3.5 percent. Costs fell.");
        let spans = split_sentences(&text, 0, text.len());
        assert_eq!(spans.len(), 2);
        let first: String = text[spans[0].start..spans[0].end].iter().collect();
        assert_eq!(first, "Revenue grew 3.5 percent.");
    }

    #[test]
    fn closing_quote_stays_with_sentence() {
        let text = chars("他说：“完成了。”然后离开。");
        let spans = split_sentences(&text, 0, text.len());
        let first: String = text[spans[0].start..spans[0].end].iter().collect();
        assert_eq!(first, "他说：“完成了。”");
    }

    #[test]
    fn blank_line_marks_paragraph_start() {
        let text = chars("一。二。\n\n三。");
        let spans = split_sentences(&text, 0, text.len());
        assert_eq!(spans.iter().map(|s| s.paragraph_start).collect::<Vec<_>>(), vec![true, false, true]);
    }

    #[test]
    fn headings_open_sections() {
        let text = chars("前言。\n# 第一章\n内容。\n## 1.1 目标\n目标。");
        let sections = split_sections(&text);
        let titles: Vec<&str> = sections.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["", "第一章", "1.1 目标"]);
    }

    #[test]
    fn hashtag_is_not_a_heading() {
        assert_eq!(heading_title(&chars("#tag text")), None);
        assert_eq!(heading_title(&chars("####### seven")), None);
        assert_eq!(heading_title(&chars("### ok ")), Some("ok".to_string()));
    }
}
