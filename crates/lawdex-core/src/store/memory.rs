//! In-memory [`Store`] implementation for tests and library embedders.
//!
//! All state sits behind one `std::sync::RwLock`, so every trait call is
//! trivially atomic. Chunk ids are handed out sequentially from 1 and never
//! reused, matching SQLite's `AUTOINCREMENT`.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::{
    document_id, Document, FileRecord, ParsedDocument, PendingChunk, Status, StoredChunk,
};

use super::{DocumentResponse, Store, StoreStats, VectorRecord, VECTORIZE_CHECKPOINT};

#[derive(Default)]
struct Inner {
    files: BTreeMap<String, FileRecord>,
    documents: BTreeMap<String, Document>,
    chunks: BTreeMap<i64, StoredChunk>,
    vectors: BTreeMap<i64, Vec<f32>>,
    checkpoints: HashMap<String, i64>,
    last_chunk_id: i64,
    mutations: u64,
}

/// In-memory store.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of write calls that changed state. Lets tests assert that a
    /// run touched nothing.
    pub fn mutation_count(&self) -> u64 {
        self.inner.read().map(|i| i.mutations).unwrap_or_default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

impl Inner {
    fn remove_file_chunks(&mut self, path: &str) {
        let ids: Vec<i64> = self
            .chunks
            .values()
            .filter(|c| c.file_path == path)
            .map(|c| c.id)
            .collect();
        for id in ids {
            self.chunks.remove(&id);
            self.vectors.remove(&id);
        }
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn list_files(&self) -> Result<Vec<FileRecord>> {
        Ok(self.read()?.files.values().cloned().collect())
    }

    async fn replace_file(&self, file: &FileRecord, documents: &[ParsedDocument]) -> Result<usize> {
        let mut inner = self.write()?;
        inner.mutations += 1;

        let mut record = file.clone();
        record.status = Status::Active;
        inner.files.insert(record.path.clone(), record);

        for doc in documents {
            let id = document_id(&file.path, doc.ordinal);
            inner.documents.insert(
                id.clone(),
                Document {
                    id,
                    file_path: file.path.clone(),
                    ordinal: doc.ordinal,
                    title: doc.title.clone(),
                    status: Status::Active,
                },
            );
        }
        let produced = documents.len() as i64;
        for doc in inner.documents.values_mut() {
            if doc.file_path == file.path && doc.ordinal >= produced {
                doc.status = Status::Archived;
            }
        }

        inner.remove_file_chunks(&file.path);
        let mut written = 0;
        for doc in documents {
            let doc_id = document_id(&file.path, doc.ordinal);
            for draft in &doc.chunks {
                inner.last_chunk_id += 1;
                let id = inner.last_chunk_id;
                inner.chunks.insert(
                    id,
                    StoredChunk {
                        id,
                        document_id: doc_id.clone(),
                        file_path: file.path.clone(),
                        chunk_index: draft.index,
                        title: doc.title.clone(),
                        path: draft.path_string(),
                        content: draft.content.clone(),
                        text: draft.text.clone(),
                    },
                );
                written += 1;
            }
        }
        Ok(written)
    }

    async fn archive_file(&self, path: &str, archived_at: i64) -> Result<()> {
        let mut inner = self.write()?;
        inner.mutations += 1;
        if let Some(record) = inner.files.get_mut(path) {
            record.status = Status::Archived;
            record.last_processed_at = archived_at;
        }
        for doc in inner.documents.values_mut() {
            if doc.file_path == path {
                doc.status = Status::Archived;
            }
        }
        inner.remove_file_chunks(path);
        Ok(())
    }

    async fn missing_vectors(&self, after_id: i64, limit: usize) -> Result<Vec<PendingChunk>> {
        let inner = self.read()?;
        Ok(inner
            .chunks
            .range(after_id + 1..)
            .filter(|(id, _)| !inner.vectors.contains_key(id))
            .take(limit)
            .map(|(id, c)| PendingChunk {
                id: *id,
                text: c.text.clone(),
            })
            .collect())
    }

    async fn count_missing_vectors(&self) -> Result<i64> {
        let inner = self.read()?;
        Ok(inner
            .chunks
            .keys()
            .filter(|id| !inner.vectors.contains_key(id))
            .count() as i64)
    }

    async fn save_vectors(&self, vectors: &[VectorRecord], _model: &str, checkpoint: i64) -> Result<()> {
        let mut inner = self.write()?;
        inner.mutations += 1;
        for record in vectors {
            if inner.chunks.contains_key(&record.chunk_id) {
                inner.vectors.insert(record.chunk_id, record.vector.clone());
            }
        }
        inner
            .checkpoints
            .insert(VECTORIZE_CHECKPOINT.to_string(), checkpoint);
        Ok(())
    }

    async fn get_checkpoint(&self, name: &str) -> Result<Option<i64>> {
        Ok(self.read()?.checkpoints.get(name).copied())
    }

    async fn set_checkpoint(&self, name: &str, value: i64) -> Result<()> {
        let mut inner = self.write()?;
        if inner.checkpoints.get(name) != Some(&value) {
            inner.mutations += 1;
            inner.checkpoints.insert(name.to_string(), value);
        }
        Ok(())
    }

    async fn all_vectors(&self) -> Result<Vec<(i64, Vec<f32>)>> {
        let inner = self.read()?;
        Ok(inner
            .vectors
            .iter()
            .map(|(id, v)| (*id, v.clone()))
            .collect())
    }

    async fn all_chunk_texts(&self) -> Result<Vec<(i64, String)>> {
        let inner = self.read()?;
        Ok(inner
            .chunks
            .values()
            .map(|c| (c.id, c.text.clone()))
            .collect())
    }

    async fn get_chunks(&self, ids: &[i64]) -> Result<Vec<StoredChunk>> {
        let inner = self.read()?;
        Ok(ids
            .iter()
            .filter_map(|id| inner.chunks.get(id).cloned())
            .collect())
    }

    async fn get_document(&self, id: &str) -> Result<Option<DocumentResponse>> {
        let inner = self.read()?;
        let document = match inner.documents.get(id) {
            Some(d) => d.clone(),
            None => return Ok(None),
        };
        let mut chunks: Vec<StoredChunk> = inner
            .chunks
            .values()
            .filter(|c| c.document_id == id)
            .cloned()
            .collect();
        chunks.sort_by_key(|c| c.chunk_index);
        Ok(Some(DocumentResponse { document, chunks }))
    }

    async fn stats(&self) -> Result<StoreStats> {
        let inner = self.read()?;
        let count = |status: Status, it: &mut dyn Iterator<Item = Status>| {
            it.filter(|s| *s == status).count() as i64
        };
        Ok(StoreStats {
            files_active: count(Status::Active, &mut inner.files.values().map(|f| f.status)),
            files_archived: count(Status::Archived, &mut inner.files.values().map(|f| f.status)),
            documents_active: count(
                Status::Active,
                &mut inner.documents.values().map(|d| d.status),
            ),
            documents_archived: count(
                Status::Archived,
                &mut inner.documents.values().map(|d| d.status),
            ),
            chunks: inner.chunks.len() as i64,
            vectors: inner.vectors.len() as i64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{parse, ChunkerConfig};
    use crate::models::content_hash;

    fn record(path: &str, body: &str) -> FileRecord {
        FileRecord {
            path: path.to_string(),
            content_hash: content_hash(body.as_bytes()),
            title: "法".to_string(),
            status: Status::Active,
            last_processed_at: 1,
        }
    }

    fn docs(text: &str) -> Vec<ParsedDocument> {
        parse("法", text, &ChunkerConfig::default()).documents
    }

    #[tokio::test]
    async fn replace_assigns_increasing_ids() {
        let store = InMemoryStore::new();
        let body = "第一条 甲。\n第二条 乙。\n第一条 丙。";
        let n = store.replace_file(&record("a.md", body), &docs(body)).await.unwrap();
        assert_eq!(n, 2);
        let texts = store.all_chunk_texts().await.unwrap();
        assert_eq!(texts.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![1, 2]);

        let n = store.replace_file(&record("a.md", "第一条 丁。"), &docs("第一条 丁。")).await.unwrap();
        assert_eq!(n, 1);
        let texts = store.all_chunk_texts().await.unwrap();
        assert_eq!(texts.len(), 1);
        assert_eq!(texts[0].0, 3);

        // The second sub-document is no longer produced.
        let surplus = store
            .get_document(&document_id("a.md", 1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(surplus.document.status, Status::Archived);
        assert!(surplus.chunks.is_empty());
    }

    #[tokio::test]
    async fn archive_keeps_rows_and_drops_chunks() {
        let store = InMemoryStore::new();
        let body = "第一条 甲。";
        store.replace_file(&record("a.md", body), &docs(body)).await.unwrap();
        store
            .save_vectors(&[VectorRecord { chunk_id: 1, vector: vec![1.0] }], "m", 1)
            .await
            .unwrap();
        store.archive_file("a.md", 9).await.unwrap();

        let files = store.list_files().await.unwrap();
        assert_eq!(files[0].status, Status::Archived);
        assert_eq!(files[0].last_processed_at, 9);
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.chunks, 0);
        assert_eq!(stats.vectors, 0);
        assert_eq!(stats.documents_archived, 1);
        let doc = store.get_document(&document_id("a.md", 0)).await.unwrap();
        assert!(doc.is_some());
    }

    #[tokio::test]
    async fn missing_vectors_resume_after_checkpoint() {
        let store = InMemoryStore::new();
        let body = "第一条 甲。\n第一章\n第二条 乙。\n第二章\n第三条 丙。";
        store.replace_file(&record("a.md", body), &docs(body)).await.unwrap();
        assert_eq!(store.count_missing_vectors().await.unwrap(), 3);

        let batch = store.missing_vectors(0, 2).await.unwrap();
        assert_eq!(batch.iter().map(|c| c.id).collect::<Vec<_>>(), vec![1, 2]);
        let vectors: Vec<VectorRecord> = batch
            .iter()
            .map(|c| VectorRecord { chunk_id: c.id, vector: vec![0.5] })
            .collect();
        store.save_vectors(&vectors, "m", 2).await.unwrap();

        assert_eq!(store.get_checkpoint(VECTORIZE_CHECKPOINT).await.unwrap(), Some(2));
        let rest = store.missing_vectors(2, 10).await.unwrap();
        assert_eq!(rest.iter().map(|c| c.id).collect::<Vec<_>>(), vec![3]);
        assert_eq!(store.count_missing_vectors().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unchanged_checkpoint_is_not_a_mutation() {
        let store = InMemoryStore::new();
        store.set_checkpoint("reindex_pending", 0).await.unwrap();
        let before = store.mutation_count();
        store.set_checkpoint("reindex_pending", 0).await.unwrap();
        assert_eq!(store.mutation_count(), before);
    }

    #[tokio::test]
    async fn get_chunks_keeps_request_order() {
        let store = InMemoryStore::new();
        let body = "第一条 甲。\n第一章\n第二条 乙。";
        store.replace_file(&record("a.md", body), &docs(body)).await.unwrap();
        let chunks = store.get_chunks(&[2, 99, 1]).await.unwrap();
        assert_eq!(chunks.iter().map(|c| c.id).collect::<Vec<_>>(), vec![2, 1]);
        assert_eq!(chunks[0].path, "第一章");
    }
}
