//! Document lookup by id.

use anyhow::{bail, Result};

use lawdex_core::store::{DocumentResponse, Store};

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

/// Fetch a document, archived or not, with its current chunks.
pub async fn get_document(config: &Config, id: &str) -> Result<DocumentResponse> {
    let pool = db::connect(config).await?;
    crate::migrate::migrate(&pool).await?;
    let store = SqliteStore::new(pool.clone());
    let doc = store.get_document(id).await?;
    pool.close().await;

    match doc {
        Some(doc) => Ok(doc),
        None => bail!("document not found: {}", id),
    }
}

pub async fn run_get(config: &Config, id: &str, json: bool) -> Result<()> {
    let doc = get_document(config, id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    let d = &doc.document;
    println!("--- Document ---");
    println!("id:       {}", d.id);
    println!("title:    {}", d.title);
    println!("file:     {}", d.file_path);
    println!("ordinal:  {}", d.ordinal);
    println!("status:   {}", d.status.as_str());
    println!("chunks:   {}", doc.chunks.len());

    for chunk in &doc.chunks {
        println!();
        println!("--- Chunk {} (id {}) ---", chunk.chunk_index, chunk.id);
        println!("{}", chunk.text);
    }

    Ok(())
}
