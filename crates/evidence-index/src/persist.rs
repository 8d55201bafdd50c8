//! On-disk snapshot format.
//!
//! ```text
//! <dir>/manifest.json   format version, model id, counts, checksums
//! <dir>/chunks.json     Vec<DocumentChunk>
//! <dir>/postings.json   Vec<ChunkPostings>
//! <dir>/vectors.bin     row-major little-endian f32, chunk_count * vector_dim
//! ```
//!
//! Saving stages everything in a sibling directory and renames it into
//! place, so readers only ever see a complete snapshot or none.
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use evidence_core::{DocumentChunk, Embedder, Error, Result};
use evidence_text::ChunkPostings;

use crate::index::ChunkIndex;

pub const FORMAT_VERSION: u32 = 1;
pub const MANIFEST_FILE: &str = "manifest.json";
pub const CHUNKS_FILE: &str = "chunks.json";
pub const POSTINGS_FILE: &str = "postings.json";
pub const VECTORS_FILE: &str = "vectors.bin";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    pub cache_key: String,
    pub embedding_model_id: String,
    pub chunk_count: usize,
    pub vector_dim: usize,
    pub normalized: bool,
    pub built_at: DateTime<Utc>,
    /// file name -> blake3 hex
    pub checksums: BTreeMap<String, String>,
}

pub fn read_manifest(dir: &Path) -> Result<Manifest> {
    let path = dir.join(MANIFEST_FILE);
    let bytes = fs::read(&path).map_err(|e| Error::corrupt(dir, format!("manifest unreadable: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| Error::corrupt(dir, format!("manifest malformed: {e}")))
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<String> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(blake3::hash(bytes).to_hex().to_string())
}

fn encode_vectors(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_vectors(bytes: &[u8]) -> Vec<f32> {
    bytes.chunks_exact(4).map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])).collect()
}

impl ChunkIndex {
    /// Write this snapshot to `target`, replacing any previous snapshot there.
    pub fn save(&self, target: &Path, cache_key: &str) -> Result<Manifest> {
        let parent = target.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
        fs::create_dir_all(parent)?;
        let staging = tempfile::Builder::new().prefix(".staging-").tempdir_in(parent)?;
        let dir = staging.path();

        let mut checksums = BTreeMap::new();
        checksums.insert(CHUNKS_FILE.to_string(), write_synced(&dir.join(CHUNKS_FILE), &serde_json::to_vec(self.chunks())?)?);
        checksums.insert(POSTINGS_FILE.to_string(), write_synced(&dir.join(POSTINGS_FILE), &serde_json::to_vec(self.postings())?)?);
        checksums.insert(VECTORS_FILE.to_string(), write_synced(&dir.join(VECTORS_FILE), &encode_vectors(self.vectors()))?);

        let manifest = Manifest {
            format_version: FORMAT_VERSION,
            cache_key: cache_key.to_string(),
            embedding_model_id: self.embedding_model_id().to_string(),
            chunk_count: self.len(),
            vector_dim: self.vector_dim(),
            normalized: self.is_normalized(),
            built_at: Utc::now(),
            checksums,
        };
        // Manifest last: a directory without one is never a snapshot.
        write_synced(&dir.join(MANIFEST_FILE), &serde_json::to_vec_pretty(&manifest)?)?;

        commit(dir, target)?;
        info!(path = %target.display(), chunks = manifest.chunk_count, "snapshot saved");
        Ok(manifest)
    }

    /// Read and validate a snapshot. Every inconsistency is `CorruptIndex`.
    pub fn load(dir: &Path, embedder: &dyn Embedder) -> Result<Self> {
        let manifest = read_manifest(dir)?;
        let corrupt = |reason: String| Error::corrupt(dir, reason);
        if manifest.format_version != FORMAT_VERSION {
            return Err(corrupt(format!("format version {} (expected {FORMAT_VERSION})", manifest.format_version)));
        }
        if manifest.embedding_model_id != embedder.model_id() {
            return Err(corrupt(format!("built with '{}', embedder is '{}'", manifest.embedding_model_id, embedder.model_id())));
        }
        if manifest.vector_dim != embedder.dim() {
            return Err(corrupt(format!("vector dim {} does not match embedder dim {}", manifest.vector_dim, embedder.dim())));
        }

        let chunks_bytes = read_checked(dir, &manifest, CHUNKS_FILE)?;
        let postings_bytes = read_checked(dir, &manifest, POSTINGS_FILE)?;
        let vector_bytes = read_checked(dir, &manifest, VECTORS_FILE)?;

        let chunks: Vec<DocumentChunk> = serde_json::from_slice(&chunks_bytes).map_err(|e| corrupt(format!("chunks: {e}")))?;
        let postings: Vec<ChunkPostings> = serde_json::from_slice(&postings_bytes).map_err(|e| corrupt(format!("postings: {e}")))?;
        if chunks.len() != manifest.chunk_count || postings.len() != manifest.chunk_count {
            return Err(corrupt(format!(
                "manifest counts {} rows, found {} chunks and {} postings",
                manifest.chunk_count, chunks.len(), postings.len()
            )));
        }
        let expected_bytes = manifest
            .chunk_count
            .checked_mul(manifest.vector_dim)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| corrupt(format!("{} rows of dim {} overflow", manifest.chunk_count, manifest.vector_dim)))?;
        if vector_bytes.len() != expected_bytes {
            return Err(corrupt(format!("vectors.bin has {} bytes, expected {expected_bytes}", vector_bytes.len())));
        }
        for chunk in &chunks {
            if chunk.char_offset_end <= chunk.char_offset_start || chunk.text.chars().count() != chunk.char_len() {
                return Err(corrupt(format!("chunk {} has inconsistent offsets", chunk.id)));
            }
        }
        if let Some(row) = postings.iter().position(|p| !p.is_well_formed()) {
            return Err(corrupt(format!("postings row {row} is malformed")));
        }

        let index = Self::from_parts(
            chunks,
            postings,
            decode_vectors(&vector_bytes),
            manifest.vector_dim,
            manifest.embedding_model_id,
            manifest.normalized,
        )
        .map_err(|e| corrupt(e.to_string()))?;
        debug!(path = %dir.display(), chunks = index.len(), "snapshot loaded");
        Ok(index)
    }
}

fn read_checked(dir: &Path, manifest: &Manifest, name: &str) -> Result<Vec<u8>> {
    let expected = manifest.checksums.get(name).ok_or_else(|| Error::corrupt(dir, format!("no checksum for {name}")))?;
    let bytes = fs::read(dir.join(name)).map_err(|e| Error::corrupt(dir, format!("{name} unreadable: {e}")))?;
    let actual = blake3::hash(&bytes).to_hex().to_string();
    if &actual != expected {
        return Err(Error::corrupt(dir, format!("{name} checksum mismatch")));
    }
    Ok(bytes)
}

/// Move the staged directory to `target`. An existing snapshot is moved
/// aside first and restored if the swap fails.
fn commit(staged: &Path, target: &Path) -> Result<()> {
    if !target.exists() {
        fs::rename(staged, target)?;
        return Ok(());
    }
    let backup = backup_path(target);
    fs::rename(target, &backup)?;
    if let Err(e) = fs::rename(staged, target) {
        if let Err(restore) = fs::rename(&backup, target) {
            warn!(path = %target.display(), error = %restore, "failed to restore previous snapshot");
        }
        return Err(e.into());
    }
    if let Err(e) = fs::remove_dir_all(&backup) {
        warn!(path = %backup.display(), error = %e, "failed to remove replaced snapshot");
    }
    Ok(())
}

fn backup_path(target: &Path) -> PathBuf {
    let name = target.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let stamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    target.with_file_name(format!(".replaced-{name}-{}-{stamp}", std::process::id()))
}
