//! SQLite implementation of the [`Store`] trait.
//!
//! Every multi-row write runs in a single sqlx transaction, so an
//! interrupted build leaves each file either fully old or fully new.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use lawdex_core::embedding::{blob_to_vec, vec_to_blob};
use lawdex_core::models::{
    document_id, Document, FileRecord, ParsedDocument, PendingChunk, Status, StoredChunk,
};
use lawdex_core::store::{DocumentResponse, Store, StoreStats, VectorRecord, VECTORIZE_CHECKPOINT};

/// SQLite-backed chunk storage.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn parse_status(s: &str) -> Result<Status> {
    Status::parse(s).ok_or_else(|| anyhow!("unknown status {:?} in database", s))
}

const CHUNK_COLUMNS: &str =
    "id, document_id, file_path, chunk_index, title, path, content, text";

fn chunk_from_row(row: &sqlx::sqlite::SqliteRow) -> StoredChunk {
    StoredChunk {
        id: row.get("id"),
        document_id: row.get("document_id"),
        file_path: row.get("file_path"),
        chunk_index: row.get("chunk_index"),
        title: row.get("title"),
        path: row.get("path"),
        content: row.get("content"),
        text: row.get("text"),
    }
}

pub(crate) async fn upsert_checkpoint<'e, E>(executor: E, name: &str, value: i64) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO checkpoints (name, value, updated_at)
        VALUES (?, ?, ?)
        ON CONFLICT(name) DO UPDATE SET
            value = excluded.value,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(name)
    .bind(value)
    .bind(chrono::Utc::now().timestamp())
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl Store for SqliteStore {
    async fn list_files(&self) -> Result<Vec<FileRecord>> {
        let rows = sqlx::query(
            "SELECT path, content_hash, title, status, last_processed_at FROM files ORDER BY path",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(FileRecord {
                    path: row.get("path"),
                    content_hash: row.get("content_hash"),
                    title: row.get("title"),
                    status: parse_status(row.get("status"))?,
                    last_processed_at: row.get("last_processed_at"),
                })
            })
            .collect()
    }

    async fn replace_file(&self, file: &FileRecord, documents: &[ParsedDocument]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO files (path, content_hash, title, status, last_processed_at)
            VALUES (?, ?, ?, 'active', ?)
            ON CONFLICT(path) DO UPDATE SET
                content_hash = excluded.content_hash,
                title = excluded.title,
                status = 'active',
                last_processed_at = excluded.last_processed_at
            "#,
        )
        .bind(&file.path)
        .bind(&file.content_hash)
        .bind(&file.title)
        .bind(file.last_processed_at)
        .execute(&mut *tx)
        .await?;

        for doc in documents {
            sqlx::query(
                r#"
                INSERT INTO documents (id, file_path, ordinal, title, status)
                VALUES (?, ?, ?, ?, 'active')
                ON CONFLICT(id) DO UPDATE SET
                    title = excluded.title,
                    status = 'active'
                "#,
            )
            .bind(document_id(&file.path, doc.ordinal))
            .bind(&file.path)
            .bind(doc.ordinal)
            .bind(&doc.title)
            .execute(&mut *tx)
            .await?;
        }

        // Sub-documents the new parse no longer produces
        sqlx::query("UPDATE documents SET status = 'archived' WHERE file_path = ? AND ordinal >= ?")
            .bind(&file.path)
            .bind(documents.len() as i64)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "DELETE FROM chunk_vectors WHERE chunk_id IN (SELECT id FROM chunks WHERE file_path = ?)",
        )
        .bind(&file.path)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM chunks WHERE file_path = ?")
            .bind(&file.path)
            .execute(&mut *tx)
            .await?;

        let mut written = 0;
        for doc in documents {
            let doc_id = document_id(&file.path, doc.ordinal);
            for draft in &doc.chunks {
                sqlx::query(
                    r#"
                    INSERT INTO chunks (document_id, file_path, chunk_index, title, path, content, text, hash)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&doc_id)
                .bind(&file.path)
                .bind(draft.index)
                .bind(&doc.title)
                .bind(draft.path_string())
                .bind(&draft.content)
                .bind(&draft.text)
                .bind(&draft.hash)
                .execute(&mut *tx)
                .await?;
                written += 1;
            }
        }

        tx.commit().await?;
        Ok(written)
    }

    async fn archive_file(&self, path: &str, archived_at: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE files SET status = 'archived', last_processed_at = ? WHERE path = ?")
            .bind(archived_at)
            .bind(path)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE documents SET status = 'archived' WHERE file_path = ?")
            .bind(path)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "DELETE FROM chunk_vectors WHERE chunk_id IN (SELECT id FROM chunks WHERE file_path = ?)",
        )
        .bind(path)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM chunks WHERE file_path = ?")
            .bind(path)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn missing_vectors(&self, after_id: i64, limit: usize) -> Result<Vec<PendingChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.text
            FROM chunks c
            LEFT JOIN chunk_vectors v ON v.chunk_id = c.id
            WHERE v.chunk_id IS NULL AND c.id > ?
            ORDER BY c.id
            LIMIT ?
            "#,
        )
        .bind(after_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| PendingChunk {
                id: row.get("id"),
                text: row.get("text"),
            })
            .collect())
    }

    async fn count_missing_vectors(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM chunks c
            LEFT JOIN chunk_vectors v ON v.chunk_id = c.id
            WHERE v.chunk_id IS NULL
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(n)
    }

    async fn save_vectors(&self, vectors: &[VectorRecord], model: &str, checkpoint: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for record in vectors {
            // INSERT ... SELECT drops vectors whose chunk vanished meanwhile.
            sqlx::query(
                r#"
                INSERT INTO chunk_vectors (chunk_id, model, dims, embedding)
                SELECT id, ?, ?, ? FROM chunks WHERE id = ?
                ON CONFLICT(chunk_id) DO UPDATE SET
                    model = excluded.model,
                    dims = excluded.dims,
                    embedding = excluded.embedding
                "#,
            )
            .bind(model)
            .bind(record.vector.len() as i64)
            .bind(vec_to_blob(&record.vector))
            .bind(record.chunk_id)
            .execute(&mut *tx)
            .await?;
        }
        upsert_checkpoint(&mut *tx, VECTORIZE_CHECKPOINT, checkpoint).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_checkpoint(&self, name: &str) -> Result<Option<i64>> {
        let value: Option<i64> = sqlx::query_scalar("SELECT value FROM checkpoints WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn set_checkpoint(&self, name: &str, value: i64) -> Result<()> {
        // Unchanged values are not rewritten, keeping idle builds write-free.
        if self.get_checkpoint(name).await? == Some(value) {
            return Ok(());
        }
        upsert_checkpoint(&self.pool, name, value).await
    }

    async fn all_vectors(&self) -> Result<Vec<(i64, Vec<f32>)>> {
        let rows: Vec<(i64, Vec<u8>)> =
            sqlx::query_as("SELECT chunk_id, embedding FROM chunk_vectors ORDER BY chunk_id")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|(id, blob)| (id, blob_to_vec(&blob)))
            .collect())
    }

    async fn all_chunk_texts(&self) -> Result<Vec<(i64, String)>> {
        let rows: Vec<(i64, String)> = sqlx::query_as("SELECT id, text FROM chunks ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn get_chunks(&self, ids: &[i64]) -> Result<Vec<StoredChunk>> {
        let sql = format!("SELECT {} FROM chunks WHERE id = ?", CHUNK_COLUMNS);
        let mut chunks = Vec::with_capacity(ids.len());
        for id in ids {
            let row = sqlx::query(&sql)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
            if let Some(row) = row {
                chunks.push(chunk_from_row(&row));
            }
        }
        Ok(chunks)
    }

    async fn get_document(&self, id: &str) -> Result<Option<DocumentResponse>> {
        let row = sqlx::query("SELECT id, file_path, ordinal, title, status FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let row = match row {
            Some(r) => r,
            None => return Ok(None),
        };
        let document = Document {
            id: row.get("id"),
            file_path: row.get("file_path"),
            ordinal: row.get("ordinal"),
            title: row.get("title"),
            status: parse_status(row.get("status"))?,
        };

        let sql = format!(
            "SELECT {} FROM chunks WHERE document_id = ? ORDER BY chunk_index",
            CHUNK_COLUMNS
        );
        let chunks = sqlx::query(&sql)
            .bind(id)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(chunk_from_row)
            .collect();

        Ok(Some(DocumentResponse { document, chunks }))
    }

    async fn stats(&self) -> Result<StoreStats> {
        let count = |sql: &'static str| async move {
            let n: i64 = sqlx::query_scalar(sql).fetch_one(&self.pool).await?;
            Ok::<i64, anyhow::Error>(n)
        };
        Ok(StoreStats {
            files_active: count("SELECT COUNT(*) FROM files WHERE status = 'active'").await?,
            files_archived: count("SELECT COUNT(*) FROM files WHERE status = 'archived'").await?,
            documents_active: count("SELECT COUNT(*) FROM documents WHERE status = 'active'")
                .await?,
            documents_archived: count("SELECT COUNT(*) FROM documents WHERE status = 'archived'")
                .await?,
            chunks: count("SELECT COUNT(*) FROM chunks").await?,
            vectors: count("SELECT COUNT(*) FROM chunk_vectors").await?,
        })
    }
}
