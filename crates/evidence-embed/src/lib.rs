use anyhow::{Result, anyhow, ensure};
use std::hash::Hasher;
use std::path::{Path, PathBuf};
use std::time::Instant;

use candle_core::{Device, Tensor, DType};
use candle_nn::VarBuilder;
use candle_transformers::models::xlm_roberta::{XLMRobertaModel, Config as XLMRobertaConfig};
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};
use twox_hash::XxHash64;

use evidence_core::config::{expand_path, EmbeddingSettings};
use evidence_core::Embedder;

mod device;
mod pool;
mod tokenize;

pub use device::{select_device, DevicePreference};
pub use pool::masked_mean_l2;
pub use tokenize::tokenize_batch_on_device;

pub const BGE_M3_DIM: usize = 1024;
pub const BGE_M3_MAX_LEN: usize = 512;

/// BGE-M3 (XLM-RoBERTa) loaded from local files, mean pooled and L2 normalised.
pub struct EmbeddingModel { model: XLMRobertaModel, tokenizer: Tokenizer, device: Device, model_id: String }

impl EmbeddingModel {
    pub fn new(model_dir: &Path, preference: DevicePreference) -> Result<Self> {
        let device = select_device(preference)?;
        info!(dir = %model_dir.display(), "loading BGE-M3 model");
        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", tokenizer_path.display(), e))?;
        let config_path = model_dir.join("config.json");
        let config: XLMRobertaConfig = serde_json::from_str(&std::fs::read_to_string(&config_path)?)?;
        let weights_path = model_dir.join("pytorch_model.bin");
        let weights = candle_core::pickle::read_all(&weights_path)?;
        let weights_map: std::collections::HashMap<String, Tensor> = weights.into_iter().collect();
        let vb = VarBuilder::from_tensors(weights_map, DType::F32, &device);
        let model = XLMRobertaModel::new(&config, vb)?;
        info!("BGE-M3 model loaded");
        Ok(Self { model, tokenizer, device, model_id: format!("bge-m3:d{BGE_M3_DIM}") })
    }

    fn forward(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let (input_ids, attention_mask) = tokenize_batch_on_device(&self.tokenizer, texts, BGE_M3_MAX_LEN, &self.device)?;
        let token_type_ids = input_ids.zeros_like()?;
        let hidden = self.model.forward(&input_ids, &attention_mask, &token_type_ids, None, None, None)?;
        let pooled = masked_mean_l2(&hidden, &attention_mask)?;
        let rows: Vec<Vec<f32>> = pooled.to_device(&Device::Cpu)?.to_dtype(DType::F32)?.to_vec2()?;
        ensure!(rows.iter().all(|r| r.len() == BGE_M3_DIM), "model produced vectors of unexpected dimension");
        Ok(rows)
    }
}

impl Embedder for EmbeddingModel {
    fn model_id(&self) -> &str { &self.model_id }
    fn dim(&self) -> usize { BGE_M3_DIM }
    fn max_len(&self) -> usize { BGE_M3_MAX_LEN }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() { return Ok(Vec::new()); }
        let start = Instant::now();
        let rows = self.forward(texts)?;
        let elapsed_ms = start.elapsed().as_millis();
        debug!(batch = texts.len(), elapsed_ms, "embedded batch");
        if texts.len() == 1 && elapsed_ms > 100 { warn!(elapsed_ms, "slow query embedding"); }
        Ok(rows)
    }
}

/// Deterministic feature-hashing embedder for tests and offline runs.
///
/// Latin words are hashed whole; CJK text contributes each character and
/// each adjacent pair, so texts sharing phrases land close together.
#[derive(Debug, Clone)]
pub struct HashEmbedder { dim: usize, model_id: String }

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        let dim = dim.max(1);
        Self { dim, model_id: format!("hash:d{dim}") }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        for feature in hash_features(text) {
            let mut hasher = XxHash64::with_seed(0);
            hasher.write(feature.as_bytes());
            let h = hasher.finish();
            let idx = (h % self.dim as u64) as usize;
            let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
            v[idx] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 { for x in &mut v { *x /= norm; } }
        v
    }
}

impl Embedder for HashEmbedder {
    fn model_id(&self) -> &str { &self.model_id }
    fn dim(&self) -> usize { self.dim }
    fn max_len(&self) -> usize { usize::MAX }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

fn is_cjk(c: char) -> bool {
    matches!(c as u32, 0x3040..=0x30FF | 0x3400..=0x4DBF | 0x4E00..=0x9FFF | 0xAC00..=0xD7AF | 0xF900..=0xFAFF | 0x20000..=0x2FA1F)
}

fn hash_features(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut word = String::new();
    let mut prev_cjk: Option<char> = None;
    for c in text.chars() {
        if is_cjk(c) {
            if !word.is_empty() { out.push(std::mem::take(&mut word)); }
            out.push(c.to_string());
            if let Some(p) = prev_cjk { out.push(format!("{p}{c}")); }
            prev_cjk = Some(c);
            continue;
        }
        prev_cjk = None;
        if c.is_alphanumeric() {
            word.extend(c.to_lowercase());
        } else if !word.is_empty() {
            out.push(std::mem::take(&mut word));
        }
    }
    if !word.is_empty() { out.push(word); }
    out
}

/// Pick the embedder from settings: `APP_USE_FAKE_EMBEDDINGS=1` or
/// `provider = "hash"` selects [`HashEmbedder`], otherwise the local model.
pub fn get_default_embedder(settings: &EmbeddingSettings) -> Result<Box<dyn Embedder>> {
    let use_fake = std::env::var("APP_USE_FAKE_EMBEDDINGS").ok().map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false);
    if use_fake || settings.provider.eq_ignore_ascii_case("hash") {
        info!(dim = settings.hash_dim, "using hash embedder");
        return Ok(Box::new(HashEmbedder::new(settings.hash_dim)));
    }
    if !settings.provider.eq_ignore_ascii_case("local") {
        return Err(anyhow!("Unknown embedding provider '{}'", settings.provider));
    }
    let preference = DevicePreference::parse(&settings.device)?;
    let model_dir = resolve_model_dir(settings.model_dir.as_deref())?;
    Ok(Box::new(EmbeddingModel::new(&model_dir, preference)?))
}

fn resolve_model_dir(configured: Option<&str>) -> Result<PathBuf> {
    if let Some(dir) = configured { let p = expand_path(dir); if p.exists() { return Ok(p); } warn!(dir = %p.display(), "configured model dir does not exist"); }
    for var in ["APP_MODEL_DIR", "MODEL_DIR"] {
        if let Ok(dir) = std::env::var(var) { let p = PathBuf::from(&dir); if p.exists() { debug!(%var, dir = %p.display(), "using model dir from env"); return Ok(p); } }
    }
    let local = Path::new("models/bge-m3"); if local.exists() { return Ok(local.to_path_buf()); }
    Err(anyhow!("Could not locate BGE-M3 model directory"))
}
