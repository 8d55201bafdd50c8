//! evidence-index
//!
//! Builds, persists and caches `ChunkIndex` snapshots: chunks, BM25 postings
//! and normalised embedding vectors for one corpus/model/chunker combination.
pub mod cache;
pub mod cache_key;
pub mod index;
pub mod lock;
pub mod persist;

pub use cache::{CacheOrigin, CacheOutcome, IndexCache};
pub use cache_key::cache_key;
pub use index::{BuildOptions, CancelFlag, ChunkIndex};
pub use lock::BuildLock;
pub use persist::{read_manifest, Manifest};
