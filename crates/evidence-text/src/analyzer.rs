use tantivy::tokenizer::{TextAnalyzer, TokenStream};

use crate::tantivy_utils::build_text_analyzer;

/// Han, kana, Hangul and the full-width/CJK punctuation-free letter blocks.
pub fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x3040..=0x30FF      // Hiragana, Katakana
        | 0x3400..=0x4DBF    // CJK Extension A
        | 0x4E00..=0x9FFF    // CJK Unified Ideographs
        | 0xAC00..=0xD7AF    // Hangul syllables
        | 0xF900..=0xFAFF    // CJK Compatibility Ideographs
        | 0x20000..=0x2FA1F) // Extensions B.. and compatibility supplement
}

/// Tokenizer shared by index build and query time.
///
/// Non-CJK runs go through the tantivy analyzer (simple split, lowercase,
/// English stop words). CJK runs, which carry no word delimiters, become
/// overlapping character bigrams; a lone CJK character is kept as a unigram.
#[derive(Clone)]
pub struct LexicalAnalyzer {
    text: TextAnalyzer,
}

impl Default for LexicalAnalyzer {
    fn default() -> Self {
        Self { text: build_text_analyzer() }
    }
}

impl std::fmt::Debug for LexicalAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LexicalAnalyzer").finish_non_exhaustive()
    }
}

impl LexicalAnalyzer {
    pub fn new() -> Self { Self::default() }

    pub fn tokenize(&self, text: &str) -> Vec<String> {
        // TextAnalyzer::token_stream needs `&mut`; a clone keeps `&self` shareable across queries.
        let mut analyzer = self.text.clone();
        let mut tokens = Vec::new();
        let mut run_start = 0usize;
        let mut run_is_cjk: Option<bool> = None;
        for (pos, c) in text.char_indices() {
            let cjk = is_cjk(c);
            match run_is_cjk {
                Some(prev) if prev == cjk => {}
                Some(prev) => {
                    Self::emit(&mut analyzer, &text[run_start..pos], prev, &mut tokens);
                    run_start = pos;
                    run_is_cjk = Some(cjk);
                }
                None => run_is_cjk = Some(cjk),
            }
        }
        if let Some(prev) = run_is_cjk {
            Self::emit(&mut analyzer, &text[run_start..], prev, &mut tokens);
        }
        tokens
    }

    fn emit(analyzer: &mut TextAnalyzer, run: &str, cjk: bool, out: &mut Vec<String>) {
        if cjk {
            let chars: Vec<char> = run.chars().collect();
            if chars.len() == 1 {
                out.push(chars[0].to_string());
            } else {
                out.extend(chars.windows(2).map(|w| w.iter().collect::<String>()));
            }
        } else {
            let mut stream = analyzer.token_stream(run);
            while stream.advance() {
                out.push(stream.token().text.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cjk_runs_become_bigrams() {
        let a = LexicalAnalyzer::new();
        assert_eq!(a.tokenize("销售额"), vec!["销售", "售额"]);
        assert_eq!(a.tokenize("额"), vec!["额"]);
    }

    #[test]
    fn mixed_script_is_split_by_run() {
        let a = LexicalAnalyzer::new();
        assert_eq!(a.tokenize("Q3销售额达到500万"), vec!["q3", "销售", "售额", "额达", "达到", "500", "万"]);
    }

    #[test]
    fn latin_text_is_lowercased_without_stop_words() {
        let a = LexicalAnalyzer::new();
        assert_eq!(a.tokenize("The Quarterly sales of the Region"), vec!["quarterly", "sales", "region"]);
    }

    #[test]
    fn punctuation_only_yields_nothing() {
        assert!(LexicalAnalyzer::new().tokenize("，。！ ...").is_empty());
    }
}
