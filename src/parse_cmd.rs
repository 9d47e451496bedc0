//! `lawdex parse <file>`: chunk one file and print the result without
//! touching the database. Useful for checking how a statute will be split.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

use lawdex_core::chunk::{parse, ChunkerConfig};
use lawdex_core::models::ParsedFile;

use crate::scan::file_title;

#[derive(Serialize)]
struct ChunkView<'a> {
    document: i64,
    title: &'a str,
    index: i64,
    path: String,
    chars: usize,
    text: &'a str,
}

/// Parse `path` with `chunker` settings.
pub fn parse_file(path: &Path, chunker: &ChunkerConfig) -> Result<ParsedFile> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let text = String::from_utf8(bytes)
        .with_context(|| format!("{} is not valid UTF-8", path.display()))?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(&text);
    Ok(parse(&file_title(path), text, chunker))
}

pub fn run_parse(path: &Path, chunker: &ChunkerConfig, json: bool) -> Result<()> {
    let parsed = parse_file(path, chunker)?;

    if json {
        let views: Vec<ChunkView> = parsed
            .documents
            .iter()
            .flat_map(|doc| {
                doc.chunks.iter().map(move |c| ChunkView {
                    document: doc.ordinal,
                    title: &doc.title,
                    index: c.index,
                    path: c.path_string(),
                    chars: c.content.chars().count(),
                    text: &c.text,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&views)?);
        return Ok(());
    }

    println!(
        "{}: {} document(s), {} chunk(s)",
        path.display(),
        parsed.documents.len(),
        parsed.chunk_count()
    );
    for doc in &parsed.documents {
        println!();
        println!("=== Document {}: {} ===", doc.ordinal, doc.title);
        for chunk in &doc.chunks {
            println!();
            println!(
                "--- Chunk {} ({} chars) ---",
                chunk.index,
                chunk.content.chars().count()
            );
            println!("{}", chunk.text);
        }
    }
    Ok(())
}
