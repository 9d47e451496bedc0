//! Corpus scanner: walk the corpus root and hash every matching file.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use walkdir::WalkDir;

use lawdex_core::changes::ScannedFile;
use lawdex_core::models::content_hash;

use crate::config::CorpusConfig;

/// Directories never scanned, whatever the configured globs say.
const DEFAULT_EXCLUDES: &[&str] = &[
    "**/.git/**",
    "**/target/**",
    "**/node_modules/**",
    "**/temp_indices/**",
];

/// A file or directory the scanner could not read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadableFile {
    pub path: String,
    pub reason: String,
}

/// Result of one corpus walk.
#[derive(Debug, Default)]
pub struct CorpusScan {
    /// Readable files, sorted by relative path.
    pub files: Vec<ScannedFile>,
    /// Entries that failed to read, sorted by relative path. The rest of
    /// the corpus is still scanned.
    pub unreadable: Vec<UnreadableFile>,
}

impl CorpusScan {
    /// Whether a registered file sits at or under an unreadable entry.
    pub fn covers_unreadable(&self, path: &str) -> bool {
        self.unreadable.iter().any(|u| {
            u.path.is_empty()
                || path == u.path
                || path
                    .strip_prefix(u.path.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }
}

/// Scan the corpus. Only a missing root or bad glob fails the whole scan.
pub fn scan_corpus(corpus: &CorpusConfig) -> Result<CorpusScan> {
    let root = &corpus.root;
    if !root.is_dir() {
        bail!("Corpus root does not exist: {}", root.display());
    }

    let include_set = build_globset(&corpus.include_globs)?;
    let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    excludes.extend(corpus.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut scan = CorpusScan::default();

    let walker = WalkDir::new(root).follow_links(corpus.follow_symlinks);
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let rel_str = e.path().map(|p| relative_path(root, p)).unwrap_or_default();
                if !rel_str.is_empty() && exclude_set.is_match(&rel_str) {
                    continue;
                }
                tracing::warn!(path = %rel_str, error = %e, "skipping unreadable entry");
                scan.unreadable.push(UnreadableFile {
                    path: rel_str,
                    reason: e.to_string(),
                });
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let rel_str = relative_path(root, path);

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        match std::fs::read(path) {
            Ok(bytes) => scan.files.push(ScannedFile {
                path: rel_str,
                content_hash: content_hash(&bytes),
                title: file_title(path),
            }),
            Err(e) => {
                tracing::warn!(path = %rel_str, error = %e, "skipping unreadable file");
                scan.unreadable.push(UnreadableFile {
                    path: rel_str,
                    reason: format!("read failed: {}", e),
                });
            }
        }
    }

    scan.files.sort_by(|a, b| a.path.cmp(&b.path));
    scan.unreadable.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(scan)
}

/// `/`-separated path of `path` relative to `root`.
pub fn relative_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// File stem, used as the first document's title.
pub fn file_title(path: &Path) -> String {
    path.file_stem()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
