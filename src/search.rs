//! `lawdex retrieve`: hybrid retrieval over the built indices.
//!
//! Wires the SQLite store, the FTS5 lexical index and, when an embedding
//! provider is configured, the persisted semantic index into a
//! [`Retriever`], then prints the fused results.

use anyhow::Result;

use lawdex_core::error::RetrieveError;
use lawdex_core::search::{RetrievedChunk, Retriever};

use crate::config::Config;
use crate::db;
use crate::embedding::create_provider;
use crate::fts::SqliteLexicalIndex;
use crate::sqlite_store::SqliteStore;
use crate::vector_index::PersistedVectorIndex;

/// Retrieve the top `limit` chunks (default `retrieval.final_limit`).
pub async fn retrieve(
    config: &Config,
    query: &str,
    limit: Option<usize>,
) -> Result<Vec<RetrievedChunk>, RetrieveError> {
    let pool = db::connect(config).await?;
    crate::migrate::migrate(&pool).await?;

    let store = SqliteStore::new(pool.clone());
    let lexical = SqliteLexicalIndex::new(pool.clone());
    let params = config.retrieval.fusion_params();
    let k = limit.unwrap_or(params.final_limit);

    let results = if config.embedding.is_enabled() {
        let embedder = create_provider(&config.embedding)?;
        let semantic = PersistedVectorIndex::open(&config.vector_path());
        Retriever::new(&store)
            .with_semantic(embedder.as_ref(), &semantic)
            .with_lexical(&lexical)
            .retrieve(query, k, &params)
            .await
    } else {
        Retriever::new(&store)
            .with_lexical(&lexical)
            .retrieve(query, k, &params)
            .await
    };

    pool.close().await;
    results
}

pub async fn run_retrieve(
    config: &Config,
    query: &str,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let results = retrieve(config, query, limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        println!(
            "[{}] {:.4}  {} | {}",
            i + 1,
            result.score,
            result.source_title,
            result.path
        );
        if let Some(category) = &result.category {
            println!("    category: {}", category);
        }
        println!("{}", result.text);
        println!();
    }
    Ok(())
}
