//! Storage abstraction for Lawdex.
//!
//! The [`Store`] trait covers everything the build pipeline and the
//! retrieval engine need from persistent storage: the file registry,
//! documents, chunks, chunk vectors, and named checkpoints.
//!
//! Implementations must be `Send + Sync` and make every multi-row write
//! atomic: a crash mid-call leaves either the old or the new state, never
//! a mixture.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::{Document, FileRecord, ParsedDocument, PendingChunk, StoredChunk};

/// Checkpoint holding the highest chunk id whose batch was vectorized.
pub const VECTORIZE_CHECKPOINT: &str = "vectorize";
/// Checkpoint set to 1 when storage changed since the last index rebuild.
pub const REINDEX_PENDING: &str = "reindex_pending";

/// A document with its current chunks, in chunk order.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentResponse {
    #[serde(flatten)]
    pub document: Document,
    pub chunks: Vec<StoredChunk>,
}

/// One vector produced by the embedding provider.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub chunk_id: i64,
    pub vector: Vec<f32>,
}

/// Row counts for `lawdex stats`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStats {
    pub files_active: i64,
    pub files_archived: i64,
    pub documents_active: i64,
    pub documents_archived: i64,
    pub chunks: i64,
    pub vectors: i64,
}

/// Abstract storage backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`list_files`](Store::list_files) | Whole file registry |
/// | [`replace_file`](Store::replace_file) | Re-parse result for one file, atomically |
/// | [`archive_file`](Store::archive_file) | Retire a deleted file |
/// | [`missing_vectors`](Store::missing_vectors) | Chunks with no vector, id order |
/// | [`save_vectors`](Store::save_vectors) | One vector batch plus checkpoint, atomically |
/// | [`get_checkpoint`](Store::get_checkpoint) / [`set_checkpoint`](Store::set_checkpoint) | Named cursors |
/// | [`all_vectors`](Store::all_vectors) / [`all_chunk_texts`](Store::all_chunk_texts) | Index rebuild input |
/// | [`get_chunks`](Store::get_chunks) | Resolve fused ids |
/// | [`get_document`](Store::get_document) | Document with chunks |
#[async_trait]
pub trait Store: Send + Sync {
    /// Every registry entry, active and archived, ordered by path.
    async fn list_files(&self) -> Result<Vec<FileRecord>>;

    /// Replace everything stored for `file` with `documents`.
    ///
    /// One transaction: upsert the registry row (active), upsert each
    /// document, archive the file's documents whose ordinal is no longer
    /// produced, delete the file's old chunks and vectors, insert the new
    /// chunks. Returns the number of chunks written.
    async fn replace_file(&self, file: &FileRecord, documents: &[ParsedDocument]) -> Result<usize>;

    /// Mark the registry entry and its documents archived and delete their
    /// chunks and vectors. The rows themselves are kept.
    async fn archive_file(&self, path: &str, archived_at: i64) -> Result<()>;

    /// Up to `limit` chunks with id greater than `after_id` that have no
    /// vector, ascending by id.
    async fn missing_vectors(&self, after_id: i64, limit: usize) -> Result<Vec<PendingChunk>>;

    async fn count_missing_vectors(&self) -> Result<i64>;

    /// Persist a batch of vectors and set the vectorize checkpoint in one
    /// transaction. Vectors for chunks deleted meanwhile are dropped.
    async fn save_vectors(&self, vectors: &[VectorRecord], model: &str, checkpoint: i64) -> Result<()>;

    async fn get_checkpoint(&self, name: &str) -> Result<Option<i64>>;

    async fn set_checkpoint(&self, name: &str, value: i64) -> Result<()>;

    /// All stored vectors, ascending by chunk id.
    async fn all_vectors(&self) -> Result<Vec<(i64, Vec<f32>)>>;

    /// All stamped chunk texts, ascending by chunk id.
    async fn all_chunk_texts(&self) -> Result<Vec<(i64, String)>>;

    /// Chunks for the given ids, in the order requested. Unknown ids are
    /// skipped.
    async fn get_chunks(&self, ids: &[i64]) -> Result<Vec<StoredChunk>>;

    /// A document by id, archived or not.
    async fn get_document(&self, id: &str) -> Result<Option<DocumentResponse>>;

    async fn stats(&self) -> Result<StoreStats>;
}
