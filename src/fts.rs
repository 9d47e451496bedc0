//! Lexical index on SQLite FTS5.
//!
//! FTS5's bundled tokenizers do not segment Chinese, so chunk text is run
//! through [`lawdex_core::lexical::tokenize`] first and stored as
//! space-separated terms. Queries are tokenized the same way and OR-ed.

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;

use lawdex_core::lexical::{query_terms, tokenize, LexicalIndex};

use crate::sqlite_store::upsert_checkpoint;

/// Checkpoint set once the FTS table has been populated by a rebuild.
pub const LEXICAL_BUILT: &str = "lexical_built";

pub struct SqliteLexicalIndex {
    pool: SqlitePool,
}

impl SqliteLexicalIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn terms(text: &str) -> String {
    tokenize(text).join(" ")
}

/// Build an FTS5 MATCH expression: each distinct term quoted, OR-ed.
fn match_expression(query: &str) -> Option<String> {
    let terms = query_terms(query);
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

#[async_trait]
impl LexicalIndex for SqliteLexicalIndex {
    async fn upsert(&self, id: i64, text: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunks_fts WHERE chunk_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO chunks_fts (chunk_id, terms) VALUES (?, ?)")
            .bind(id)
            .bind(terms(text))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM chunks_fts WHERE chunk_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn search(&self, query: &str, k: usize) -> Result<Vec<(i64, f64)>> {
        if !self.is_built().await? {
            bail!("lexical index has not been built");
        }
        let expr = match match_expression(query) {
            Some(e) => e,
            None => return Ok(Vec::new()),
        };

        // bm25() is lower-is-better; negate so callers see higher-is-better.
        let rows: Vec<(i64, f64)> = sqlx::query_as(
            r#"
            SELECT CAST(chunk_id AS INTEGER) AS id, -bm25(chunks_fts) AS score
            FROM chunks_fts
            WHERE chunks_fts MATCH ?
            ORDER BY score DESC, id ASC
            LIMIT ?
            "#,
        )
        .bind(&expr)
        .bind(k as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn rebuild(&self, entries: Vec<(i64, String)>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunks_fts").execute(&mut *tx).await?;
        for (id, text) in &entries {
            sqlx::query("INSERT INTO chunks_fts (chunk_id, terms) VALUES (?, ?)")
                .bind(id)
                .bind(terms(text))
                .execute(&mut *tx)
                .await?;
        }
        upsert_checkpoint(&mut *tx, LEXICAL_BUILT, 1).await?;
        tx.commit().await?;
        tracing::debug!(entries = entries.len(), "lexical index rebuilt");
        Ok(())
    }

    async fn is_built(&self) -> Result<bool> {
        let built: Option<i64> = sqlx::query_scalar("SELECT value FROM checkpoints WHERE name = ?")
            .bind(LEXICAL_BUILT)
            .fetch_optional(&self.pool)
            .await?;
        Ok(built == Some(1))
    }
}
