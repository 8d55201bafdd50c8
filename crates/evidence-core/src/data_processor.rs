//! Corpus discovery and loading.
//!
//! Walks a directory for Markdown and plain-text documents, decodes them as
//! UTF-8 and normalizes line endings. A document that cannot be decoded is
//! skipped and reported instead of aborting the corpus.
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::chunker::Chunker;
use crate::error::{Error, Result};
use crate::types::{DocumentChunk, LoadedDocument};

const DEFAULT_EXTENSIONS: &[&str] = &["md", "markdown", "txt"];

/// A document left out of the corpus and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedDocument {
    pub file: String,
    pub reason: String,
}

/// The loaded documents of one corpus snapshot, in path order.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    pub documents: Vec<LoadedDocument>,
    pub skipped: Vec<SkippedDocument>,
}

impl Corpus {
    pub fn from_documents(documents: Vec<LoadedDocument>) -> Self {
        Self { documents, skipped: Vec::new() }
    }

    /// Canonical text the snapshot hash is computed from: every document's
    /// source name and sanitized text, separated by control characters that
    /// cannot collide with ordinary content boundaries.
    pub fn normalized_text(&self) -> String {
        let mut out = String::new();
        for doc in &self.documents {
            out.push_str(&doc.source_file);
            out.push('\u{1f}');
            out.push_str(&doc.text);
            out.push('\u{1e}');
        }
        out
    }

    pub fn chunk(&self, chunker: &Chunker) -> Vec<DocumentChunk> {
        let mut chunks = Vec::new();
        for doc in &self.documents {
            chunks.extend(chunker.chunk(&doc.text, &doc.source_file));
        }
        chunks
    }
}

/// Strip a leading BOM and normalize `\r\n` / `\r` to `\n`.
pub fn sanitize_text(text: &str) -> String {
    let text = text.trim_start_matches('\u{feff}');
    text.replace("\r\n", "\n").replace('\r', "\n")
}

pub struct DataProcessor {
    extensions: Vec<String>,
}

impl Default for DataProcessor {
    fn default() -> Self {
        Self { extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect() }
    }
}

impl DataProcessor {
    pub fn new() -> Self { Self::default() }

    pub fn with_extensions<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { extensions: extensions.into_iter().map(|e| e.into().to_ascii_lowercase()).collect() }
    }

    pub fn process_directory(&self, data_dir: &Path) -> Result<Corpus> {
        self.process_files(data_dir, None)
    }

    pub fn process_directory_limited(&self, data_dir: &Path, limit: usize) -> Result<Corpus> {
        self.process_files(data_dir, Some(limit))
    }

    fn process_files(&self, data_dir: &Path, limit: Option<usize>) -> Result<Corpus> {
        if !data_dir.is_dir() {
            return Err(Error::NotFound(format!("corpus directory {}", data_dir.display())));
        }
        let mut files = self.list_files(data_dir);
        if files.is_empty() {
            warn!(dir = %data_dir.display(), "no documents found");
            return Ok(Corpus::default());
        }
        if let Some(limit) = limit {
            if files.len() > limit {
                files.truncate(limit);
                info!(limit, "limited corpus to first files");
            }
        }
        let mut corpus = Corpus::default();
        for (file_index, file_path) in files.iter().enumerate() {
            debug!(file = %file_path.display(), index = file_index + 1, total = files.len(), "loading document");
            match self.load_file(file_path, data_dir) {
                Ok(doc) => corpus.documents.push(doc),
                Err(Error::Chunking { file, reason }) => {
                    warn!(%file, %reason, "skipping document");
                    corpus.skipped.push(SkippedDocument { file, reason });
                }
                Err(e) => return Err(e),
            }
        }
        info!(documents = corpus.documents.len(), skipped = corpus.skipped.len(), "corpus loaded");
        Ok(corpus)
    }

    /// Read one document. Unreadable or non-UTF-8 content is a `Chunking` error
    /// local to this file.
    pub fn load_file(&self, file_path: &Path, data_dir: &Path) -> Result<LoadedDocument> {
        let source_file = self.source_name(file_path, data_dir);
        let bytes = fs::read(file_path)
            .map_err(|e| Error::Chunking { file: source_file.clone(), reason: e.to_string() })?;
        let raw = String::from_utf8(bytes)
            .map_err(|e| Error::Chunking { file: source_file.clone(), reason: format!("invalid UTF-8: {e}") })?;
        Ok(LoadedDocument { source_file, text: sanitize_text(&raw) })
    }

    /// Path relative to the corpus root with `/` separators, so chunk ids do
    /// not depend on where the corpus lives.
    fn source_name(&self, file_path: &Path, data_dir: &Path) -> String {
        let relative_path = file_path.strip_prefix(data_dir).unwrap_or(file_path);
        relative_path
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }

    fn list_files(&self, root: &Path) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for entry in walkdir::WalkDir::new(root).into_iter().filter_map(|e| e.ok()).filter(|e| e.file_type().is_file()) {
            let path = entry.path();
            let ext = path.extension().and_then(|s| s.to_str()).map(|s| s.to_ascii_lowercase());
            if ext.is_some_and(|ext| self.extensions.iter().any(|e| *e == ext)) { files.push(path.to_path_buf()); }
        }
        files.sort();
        files
    }
}
