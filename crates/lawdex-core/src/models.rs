//! Core data models shared by the chunker, the build pipeline, and retrieval.
//!
//! A corpus file may embed several logical legal texts; each becomes a
//! [`Document`] identified by `(file path, ordinal)`. Documents own ordered
//! chunks. The [`FileRecord`] registry is the only source of truth for what
//! needs reprocessing.

use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Separator used when serializing a hierarchical path.
pub const PATH_SEPARATOR: &str = " > ";

/// Lifecycle state of a registry entry or document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Active,
    Archived,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Active => "active",
            Status::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Status::Active),
            "archived" => Some(Status::Archived),
            _ => None,
        }
    }
}

/// One FileRegistry row: a corpus source file and the hash it was last
/// processed at.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileRecord {
    /// Path relative to the corpus root, `/`-separated.
    pub path: String,
    /// Lowercase hex SHA-256 of the file bytes.
    pub content_hash: String,
    pub title: String,
    pub status: Status,
    /// Unix seconds of the last successful parse or archive.
    pub last_processed_at: i64,
}

/// A logical legal text inside a corpus file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub id: String,
    pub file_path: String,
    pub ordinal: i64,
    pub title: String,
    pub status: Status,
}

/// A chunk as produced by the parser, before storage assigns an id.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkDraft {
    /// Position within the owning document, contiguous from 0.
    pub index: i64,
    /// Hierarchical path at commit time.
    pub path: Vec<String>,
    /// Raw chunk body without the provenance header.
    pub content: String,
    /// Provenance header followed by `content`; this is what gets indexed.
    pub text: String,
    /// SHA-256 of `text`.
    pub hash: String,
}

impl ChunkDraft {
    pub fn path_string(&self) -> String {
        self.path.join(PATH_SEPARATOR)
    }
}

/// One sub-document emitted by the parser.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDocument {
    pub ordinal: i64,
    pub title: String,
    pub chunks: Vec<ChunkDraft>,
}

/// Parser output for a whole file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedFile {
    pub documents: Vec<ParsedDocument>,
}

impl ParsedFile {
    pub fn chunk_count(&self) -> usize {
        self.documents.iter().map(|d| d.chunks.len()).sum()
    }
}

/// A committed chunk as read back from storage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredChunk {
    pub id: i64,
    pub document_id: String,
    pub file_path: String,
    pub chunk_index: i64,
    pub title: String,
    /// Serialized hierarchical path.
    pub path: String,
    pub content: String,
    pub text: String,
}

/// A chunk that still lacks a vector.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingChunk {
    pub id: i64,
    pub text: String,
}

/// Deterministic document id for the `ordinal`-th text of `file_path`.
pub fn document_id(file_path: &str, ordinal: i64) -> String {
    let name = format!("{}#{}", file_path, ordinal);
    Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string()
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// True for a 64-character lowercase hex digest.
pub fn is_valid_hash(hash: &str) -> bool {
    hash.len() == 64 && hash.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_id_is_stable_per_ordinal() {
        assert_eq!(document_id("a/民法.md", 0), document_id("a/民法.md", 0));
        assert_ne!(document_id("a/民法.md", 0), document_id("a/民法.md", 1));
    }

    #[test]
    fn content_hash_is_valid_digest() {
        let h = content_hash("第一条 本法".as_bytes());
        assert!(is_valid_hash(&h));
        assert!(!is_valid_hash("abc"));
        assert!(!is_valid_hash(&h.to_uppercase()));
    }
}
