//! Layered configuration loader, typed settings and path helpers.
//!
//! Uses Figment to merge struct defaults + `config.toml` + `config.<env>.toml` +
//! `APP_*` env vars (`__` separates nesting, e.g. `APP_RETRIEVAL__ALPHA=0.5`).
//! Provides helpers to expand `~` and `${VAR}` and to resolve relative paths
//! against a known base directory.
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::from(Serialized::defaults(Settings::default())).merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        let config = Self { figment };
        config.settings()?;
        Ok(config)
    }

    /// Wrap an already-assembled figment; defaults are layered underneath.
    pub fn from_figment(figment: Figment) -> Self {
        Self { figment: Figment::from(Serialized::defaults(Settings::default())).merge(figment) }
    }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    /// Typed, validated view over every section.
    pub fn settings(&self) -> Result<Settings> {
        let settings: Settings = self.figment.extract().map_err(|e| Error::InvalidConfig(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data: DataSettings,
    pub chunking: ChunkerSettings,
    pub index: IndexSettings,
    pub retrieval: RetrievalSettings,
    pub metrics: MetricsSettings,
    pub embedding: EmbeddingSettings,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        let r = &self.retrieval;
        if !(0.0..=1.0).contains(&r.alpha) {
            return Err(Error::InvalidConfig(format!("retrieval.alpha must lie in [0, 1], got {}", r.alpha)));
        }
        if r.candidate_floor == 0 || r.candidate_factor == 0 {
            return Err(Error::InvalidConfig("retrieval.candidate_floor and candidate_factor must be >= 1".into()));
        }
        if r.embed_timeout_ms == 0 {
            return Err(Error::InvalidConfig("retrieval.embed_timeout_ms must be > 0".into()));
        }
        if self.index.embed_batch_size == 0 {
            return Err(Error::InvalidConfig("index.embed_batch_size must be >= 1".into()));
        }
        if self.chunking.min_chars > self.chunking.max_chars {
            return Err(Error::InvalidConfig(format!(
                "chunking.min_chars ({}) exceeds chunking.max_chars ({})",
                self.chunking.min_chars, self.chunking.max_chars
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    pub corpus_dir: String,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self { corpus_dir: "data/corpus".to_string() }
    }
}

/// Chunk length band and overlap, in characters and sentences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerSettings {
    pub max_chars: usize,
    pub min_chars: usize,
    pub overlap_sentences: usize,
    pub window_overlap_chars: usize,
}

impl Default for ChunkerSettings {
    fn default() -> Self {
        Self { max_chars: 300, min_chars: 200, overlap_sentences: 1, window_overlap_chars: 40 }
    }
}

impl ChunkerSettings {
    pub const MIN_MAX_CHARS: usize = 80;
    pub const MAX_MAX_CHARS: usize = 800;
    pub const MAX_OVERLAP_SENTENCES: usize = 3;

    /// Settings as the chunker actually applies them.
    pub fn clamped(&self) -> Self {
        let max_chars = self.max_chars.clamp(Self::MIN_MAX_CHARS, Self::MAX_MAX_CHARS);
        Self {
            max_chars,
            min_chars: self.min_chars.min(max_chars),
            overlap_sentences: self.overlap_sentences.min(Self::MAX_OVERLAP_SENTENCES),
            window_overlap_chars: self.window_overlap_chars.min(max_chars / 4),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    pub cache_dir: String,
    pub embed_batch_size: usize,
    pub normalize_embeddings: bool,
    pub show_progress: bool,
    pub lock_wait_ms: u64,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            cache_dir: ".cache/evidence".to_string(),
            embed_batch_size: 32,
            normalize_embeddings: true,
            show_progress: true,
            lock_wait_ms: 600_000,
        }
    }
}

/// How lexical and vector candidate lists are combined before fusion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStrategy {
    /// Independent top-M on both signals, unioned.
    #[default]
    Union,
    /// Only rows present in both top-M lists.
    Intersect,
    /// Vector similarity is computed for the lexical top-M only.
    LexicalRestricted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub alpha: f32,
    pub candidate_floor: usize,
    pub candidate_factor: usize,
    pub candidate_strategy: CandidateStrategy,
    pub embed_timeout_ms: u64,
    pub rerank_top_r: usize,
    pub rerank_timeout_ms: u64,
    pub default_top_k: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            alpha: 0.6,
            candidate_floor: 50,
            candidate_factor: 5,
            candidate_strategy: CandidateStrategy::Union,
            embed_timeout_ms: 2_000,
            rerank_top_r: 20,
            rerank_timeout_ms: 3_000,
            default_top_k: 5,
        }
    }
}

impl RetrievalSettings {
    /// Per-signal candidate pool size `M` for a given `top_k`.
    pub fn candidate_pool(&self, top_k: usize) -> usize {
        self.candidate_floor.max(self.candidate_factor.saturating_mul(top_k)).max(top_k)
    }

    pub fn embed_timeout(&self) -> Duration {
        Duration::from_millis(self.embed_timeout_ms)
    }

    pub fn rerank_timeout(&self) -> Duration {
        Duration::from_millis(self.rerank_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    pub enabled: bool,
    pub log_path: String,
    pub top_k_thresholds: Vec<usize>,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self { enabled: true, log_path: "logs/retrieval_metrics.jsonl".to_string(), top_k_thresholds: vec![1, 3, 5] }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    /// `local` loads the on-disk model, `hash` uses the deterministic hash embedder.
    pub provider: String,
    pub model_dir: Option<String>,
    pub hash_dim: usize,
    /// `auto`, `cpu` or `metal`; only the local model uses it.
    pub device: String,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self { provider: "local".to_string(), model_dir: None, hash_dim: 384, device: "auto".to_string() }
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
