//! Content-addressed snapshot cache.
//!
//! `<root>/<cache_key>/` holds a committed snapshot, `<root>/<cache_key>.lock`
//! guards its build. A snapshot that fails validation is treated as a miss,
//! removed and rebuilt.
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use evidence_core::config::IndexSettings;
use evidence_core::data_processor::Corpus;
use evidence_core::{Chunker, Embedder, Result};

use crate::cache_key::cache_key;
use crate::index::{BuildOptions, ChunkIndex};
use crate::lock::BuildLock;
use crate::persist::MANIFEST_FILE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheOrigin {
    Loaded,
    Built,
}

#[derive(Debug, Clone)]
pub struct CacheOutcome {
    pub index: Arc<ChunkIndex>,
    pub cache_key: String,
    pub origin: CacheOrigin,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct IndexCache {
    root: PathBuf,
    lock_wait: Duration,
}

impl IndexCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::from_settings(root, &IndexSettings::default())
    }

    pub fn from_settings(root: impl Into<PathBuf>, settings: &IndexSettings) -> Self {
        Self {
            root: root.into(),
            lock_wait: Duration::from_millis(settings.lock_wait_ms),
        }
    }

    pub fn root(&self) -> &Path { &self.root }

    pub fn snapshot_dir(&self, key: &str) -> PathBuf { self.root.join(key) }

    pub fn lock_path(&self, key: &str) -> PathBuf { self.root.join(format!("{key}.lock")) }

    pub fn key_for(&self, corpus: &Corpus, chunker: &Chunker, embedder: &dyn Embedder) -> String {
        cache_key(&corpus.normalized_text(), embedder.model_id(), chunker.settings())
    }

    /// Load the snapshot for this corpus/model/chunker combination, or build
    /// and commit it. Concurrent callers with the same key embed once.
    pub fn get_or_build(&self, corpus: &Corpus, chunker: &Chunker, embedder: &dyn Embedder, options: &BuildOptions) -> Result<CacheOutcome> {
        let started = Instant::now();
        let key = self.key_for(corpus, chunker, embedder);
        let outcome = |index: ChunkIndex, origin| CacheOutcome { index: Arc::new(index), cache_key: key.clone(), origin, elapsed: started.elapsed() };

        if let Some(index) = self.try_load(&key, embedder, false)? {
            info!(cache_key = %key, chunks = index.len(), "index cache hit");
            return Ok(outcome(index, CacheOrigin::Loaded));
        }

        let mut lock = BuildLock::open(&self.lock_path(&key))?;
        lock.run_exclusive(self.lock_wait, || -> Result<CacheOutcome> {
            // Another builder may have committed while we waited.
            if let Some(index) = self.try_load(&key, embedder, true)? {
                info!(cache_key = %key, chunks = index.len(), "index committed by concurrent builder");
                return Ok(outcome(index, CacheOrigin::Loaded));
            }

            info!(cache_key = %key, documents = corpus.documents.len(), "index cache miss, building");
            let chunks = corpus.chunk(chunker);
            let index = ChunkIndex::build(chunks, embedder, options)?;
            index.save(&self.snapshot_dir(&key), &key)?;
            Ok(outcome(index, CacheOrigin::Built))
        })?
    }

    /// `Ok(None)` on a miss, including a snapshot that failed validation.
    /// Only a caller holding the build lock may `discard` a corrupt snapshot.
    fn try_load(&self, key: &str, embedder: &dyn Embedder, discard: bool) -> Result<Option<ChunkIndex>> {
        let dir = self.snapshot_dir(key);
        if !dir.join(MANIFEST_FILE).is_file() {
            return Ok(None);
        }
        match ChunkIndex::load(&dir, embedder) {
            Ok(index) => Ok(Some(index)),
            Err(e) if e.is_corrupt_index() => {
                if discard {
                    warn!(cache_key = %key, error = %e, "discarding corrupt snapshot");
                    self.invalidate(key)?;
                } else {
                    debug!(cache_key = %key, error = %e, "snapshot failed validation");
                }
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Remove the snapshot for `key` if present.
    pub fn invalidate(&self, key: &str) -> Result<()> {
        match fs::remove_dir_all(self.snapshot_dir(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
