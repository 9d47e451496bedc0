//! Change detection: diff a corpus scan against the file registry.

use std::collections::{HashMap, HashSet};

use crate::error::BuildError;
use crate::models::{is_valid_hash, FileRecord, Status};

/// A corpus file as seen by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    /// Path relative to the corpus root, `/`-separated.
    pub path: String,
    pub content_hash: String,
    /// File stem, used as the first document's title.
    pub title: String,
}

/// Classification of every scanned and registered file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    /// Not in the registry, or archived and back on disk.
    pub new: Vec<ScannedFile>,
    /// Active in the registry with a different hash.
    pub modified: Vec<ScannedFile>,
    /// Active in the registry, gone from disk.
    pub deleted: Vec<FileRecord>,
    pub unchanged: Vec<ScannedFile>,
}

impl ChangeSet {
    /// Files that need parsing, new first, each group sorted by path.
    pub fn to_parse(&self) -> impl Iterator<Item = &ScannedFile> {
        self.new.iter().chain(self.modified.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// Diff `scanned` against `registry`.
///
/// Fails with [`BuildError::RegistryCorruption`] when the registry holds
/// duplicate paths or an active entry with a malformed hash; such a
/// registry is reported rather than patched.
pub fn detect_changes(
    scanned: &[ScannedFile],
    registry: &[FileRecord],
) -> Result<ChangeSet, BuildError> {
    let mut known: HashMap<&str, &FileRecord> = HashMap::with_capacity(registry.len());
    for record in registry {
        if known.insert(record.path.as_str(), record).is_some() {
            return Err(BuildError::RegistryCorruption(format!(
                "duplicate registry entry for {}",
                record.path
            )));
        }
        if record.status == Status::Active && !is_valid_hash(&record.content_hash) {
            return Err(BuildError::RegistryCorruption(format!(
                "malformed hash {:?} for {}",
                record.content_hash, record.path
            )));
        }
    }

    let mut changes = ChangeSet::default();
    let mut seen: HashSet<&str> = HashSet::with_capacity(scanned.len());
    for file in scanned {
        seen.insert(file.path.as_str());
        match known.get(file.path.as_str()) {
            None => changes.new.push(file.clone()),
            Some(record) if record.status == Status::Archived => changes.new.push(file.clone()),
            Some(record) if record.content_hash != file.content_hash => {
                changes.modified.push(file.clone())
            }
            Some(_) => changes.unchanged.push(file.clone()),
        }
    }
    for record in registry {
        if record.status == Status::Active && !seen.contains(record.path.as_str()) {
            changes.deleted.push(record.clone());
        }
    }

    changes.new.sort_by(|a, b| a.path.cmp(&b.path));
    changes.modified.sort_by(|a, b| a.path.cmp(&b.path));
    changes.deleted.sort_by(|a, b| a.path.cmp(&b.path));
    changes.unchanged.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(changes)
}
