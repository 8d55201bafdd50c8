use evidence_core::config::ChunkerSettings;

use crate::persist::FORMAT_VERSION;

/// Content address of a snapshot: blake3 over the format version, the
/// embedding model, the effective chunker parameters and the corpus text.
/// Changing any of them yields a different key.
pub fn cache_key(normalized_text: &str, embedding_model_id: &str, chunking: &ChunkerSettings) -> String {
    let c = chunking.clamped();
    let mut hasher = blake3::Hasher::new();
    hasher.update(format!("evidence-index/v{FORMAT_VERSION}\u{0}").as_bytes());
    hasher.update(format!("model={embedding_model_id}\u{0}").as_bytes());
    hasher.update(
        format!(
            "max={};min={};overlap={};window={}\u{0}",
            c.max_chars, c.min_chars, c.overlap_sentences, c.window_overlap_chars
        )
        .as_bytes(),
    );
    hasher.update(normalized_text.as_bytes());
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_stable_and_hex() {
        let s = ChunkerSettings::default();
        let a = cache_key("text", "hash:d8", &s);
        assert_eq!(a, cache_key("text", "hash:d8", &s));
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn every_input_changes_the_key() {
        let s = ChunkerSettings::default();
        let base = cache_key("text", "hash:d8", &s);
        assert_ne!(base, cache_key("text.", "hash:d8", &s));
        assert_ne!(base, cache_key("text", "hash:d16", &s));
        assert_ne!(base, cache_key("text", "hash:d8", &ChunkerSettings { max_chars: 400, ..s }));
        assert_ne!(base, cache_key("text", "hash:d8", &ChunkerSettings { min_chars: 100, ..s }));
        assert_ne!(base, cache_key("text", "hash:d8", &ChunkerSettings { overlap_sentences: 2, ..s }));
    }
}
