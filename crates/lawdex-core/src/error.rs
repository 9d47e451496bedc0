//! Typed errors for the build pipeline and the retrieval engine.
//!
//! Storage traits return `anyhow::Result`; these enums classify failures at
//! the boundaries where the caller must react differently to each kind.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    /// One file could not be parsed. Recovered per file.
    #[error("parse error in {path}: {reason}")]
    Parse { path: String, reason: String },

    /// A file changed between scan and parse. Fatal for the run.
    #[error("hash mismatch for {path}: scanned {expected}, found {actual}")]
    HashMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    /// The registry contradicts itself or the disk. Fatal for the run.
    #[error("file registry corrupt: {0}")]
    RegistryCorruption(String),

    /// Embedding failed after all retries. The run ends without reindexing.
    #[error("embedding batch starting at chunk {first_chunk_id} failed after {attempts} attempts: {source}")]
    EmbeddingBatch {
        first_chunk_id: i64,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    /// Index rebuild failed. The previous index stays live.
    #[error("index rebuild failed: {0}")]
    IndexRebuild(#[source] anyhow::Error),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl BuildError {
    /// Whether the run must stop. Parse errors are reported and skipped.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, BuildError::Parse { .. })
    }
}

#[derive(Debug, Error)]
pub enum RetrieveError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Neither the semantic nor the lexical path could run.
    #[error("retrieval unavailable: semantic ({semantic}); lexical ({lexical})")]
    Unavailable { semantic: String, lexical: String },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}
