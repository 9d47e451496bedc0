//! `lawdex stats`: what is stored and how far vectorization has got.

use anyhow::Result;

use lawdex_core::store::{Store, REINDEX_PENDING, VECTORIZE_CHECKPOINT};

use crate::config::Config;
use crate::db;
use crate::fts::SqliteLexicalIndex;
use crate::sqlite_store::SqliteStore;
use crate::vector_index::PersistedVectorIndex;
use lawdex_core::lexical::LexicalIndex;

pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    crate::migrate::migrate(&pool).await?;
    let store = SqliteStore::new(pool.clone());

    let stats = store.stats().await?;
    let checkpoint = store.get_checkpoint(VECTORIZE_CHECKPOINT).await?;
    let reindex_pending = store.get_checkpoint(REINDEX_PENDING).await? == Some(1);
    let lexical_built = SqliteLexicalIndex::new(pool.clone()).is_built().await?;
    let semantic_len = PersistedVectorIndex::open(&config.vector_path()).len()?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Lawdex: Database Stats");
    println!("======================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!(
        "  Files:       {} active, {} archived",
        stats.files_active, stats.files_archived
    );
    println!(
        "  Documents:   {} active, {} archived",
        stats.documents_active, stats.documents_archived
    );
    println!("  Chunks:      {}", stats.chunks);
    println!(
        "  Vectorized:  {} / {} ({}%)",
        stats.vectors,
        stats.chunks,
        if stats.chunks > 0 {
            (stats.vectors * 100) / stats.chunks
        } else {
            0
        }
    );
    println!(
        "  Checkpoint:  {}",
        checkpoint
            .map(|c| format!("chunk {}", c))
            .unwrap_or_else(|| "none".to_string())
    );
    println!();
    println!(
        "  Lexical index:   {}",
        if lexical_built { "built" } else { "not built" }
    );
    println!("  Semantic index:  {} vectors", semantic_len);
    if reindex_pending {
        println!("  Reindex pending: yes (run `lawdex build`)");
    }
    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
