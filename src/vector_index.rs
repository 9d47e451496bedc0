//! Semantic index persisted as a flat snapshot file.
//!
//! File layout (little-endian):
//!
//! ```text
//! b"LDXV" | version: u32 | dims: u32 | count: u64 | count × (id: i64, dims × f32)
//! ```
//!
//! A rebuild writes `<path>.tmp`, renames it over `<path>`, then swaps the
//! new snapshot into memory. Readers holding the old snapshot keep it until
//! they finish, and a failed rebuild leaves both the file and the live
//! snapshot untouched.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use lawdex_core::index::{FlatVectorIndex, SemanticIndex, VectorSnapshot};

const MAGIC: &[u8; 4] = b"LDXV";
const VERSION: u32 = 1;

pub struct PersistedVectorIndex {
    path: PathBuf,
    live: FlatVectorIndex,
}

impl PersistedVectorIndex {
    /// Open the snapshot at `path`. A missing file yields an unbuilt index;
    /// an unreadable one is logged and also treated as unbuilt so the next
    /// build replaces it.
    pub fn open(path: &Path) -> Self {
        let live = FlatVectorIndex::new();
        if path.exists() {
            match read_snapshot(path).and_then(|s| live.install(s)) {
                Ok(()) => tracing::debug!(path = %path.display(), "semantic index loaded"),
                Err(e) => tracing::warn!(
                    path = %path.display(),
                    error = %format!("{:#}", e),
                    "ignoring unreadable semantic index"
                ),
            }
        }
        Self {
            path: path.to_path_buf(),
            live,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of vectors in the live snapshot.
    pub fn len(&self) -> Result<usize> {
        Ok(self.live.snapshot()?.map(|s| s.len()).unwrap_or(0))
    }

    fn persist(&self, snapshot: &VectorSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, encode(snapshot))
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to move snapshot into {}", self.path.display()))?;
        Ok(())
    }

    fn persist_live(&self) -> Result<()> {
        match self.live.snapshot()? {
            Some(snapshot) => self.persist(&snapshot),
            None => Ok(()),
        }
    }
}

fn encode(snapshot: &VectorSnapshot) -> Vec<u8> {
    let dims = snapshot.dims();
    let mut bytes = Vec::with_capacity(20 + snapshot.len() * (8 + dims * 4));
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&VERSION.to_le_bytes());
    bytes.extend_from_slice(&(dims as u32).to_le_bytes());
    bytes.extend_from_slice(&(snapshot.len() as u64).to_le_bytes());
    for (id, vector) in snapshot.entries() {
        bytes.extend_from_slice(&id.to_le_bytes());
        for v in vector {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
    }
    bytes
}

fn read_snapshot(path: &Path) -> Result<VectorSnapshot> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    decode(&bytes)
}

fn decode(bytes: &[u8]) -> Result<VectorSnapshot> {
    fn take<'a>(bytes: &'a [u8], at: &mut usize, n: usize) -> Result<&'a [u8]> {
        let end = *at + n;
        if end > bytes.len() {
            bail!("snapshot truncated at byte {}", *at);
        }
        let out = &bytes[*at..end];
        *at = end;
        Ok(out)
    }
    fn u32_at(bytes: &[u8], at: &mut usize) -> Result<u32> {
        let b = take(bytes, at, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    let mut at = 0;
    if take(bytes, &mut at, 4)? != MAGIC {
        bail!("not a lawdex vector snapshot");
    }
    let version = u32_at(bytes, &mut at)?;
    if version != VERSION {
        bail!("unsupported snapshot version {}", version);
    }
    let dims = u32_at(bytes, &mut at)? as usize;
    let mut count_bytes = [0u8; 8];
    count_bytes.copy_from_slice(take(bytes, &mut at, 8)?);
    let count = u64::from_le_bytes(count_bytes) as usize;

    let mut entries = Vec::with_capacity(count.min(1 << 20));
    for _ in 0..count {
        let mut id_bytes = [0u8; 8];
        id_bytes.copy_from_slice(take(bytes, &mut at, 8)?);
        let raw = take(bytes, &mut at, dims * 4)?;
        entries.push((
            i64::from_le_bytes(id_bytes),
            lawdex_core::embedding::blob_to_vec(raw),
        ));
    }
    if at != bytes.len() {
        bail!("trailing bytes after {} entries", count);
    }
    VectorSnapshot::from_entries(entries)
}

#[async_trait]
impl SemanticIndex for PersistedVectorIndex {
    async fn upsert(&self, id: i64, vector: Vec<f32>) -> Result<()> {
        self.live.upsert(id, vector).await?;
        self.persist_live()
    }

    async fn delete(&self, id: i64) -> Result<()> {
        self.live.delete(id).await?;
        self.persist_live()
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<(i64, f64)>> {
        self.live.search(query, k).await
    }

    async fn rebuild(&self, entries: Vec<(i64, Vec<f32>)>) -> Result<()> {
        let fresh = VectorSnapshot::from_entries(entries)?;
        self.persist(&fresh)?;
        let n = fresh.len();
        self.live.install(fresh)?;
        tracing::debug!(vectors = n, path = %self.path.display(), "semantic index rebuilt");
        Ok(())
    }

    async fn is_built(&self) -> Result<bool> {
        self.live.is_built().await
    }
}
