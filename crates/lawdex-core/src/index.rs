//! Semantic (nearest-vector) index.
//!
//! [`FlatVectorIndex`] is an exact inner-product index over normalized
//! vectors, so scores are cosine similarities. It holds an immutable
//! [`VectorSnapshot`] behind an `Arc`; a rebuild constructs the next
//! snapshot off to the side and swaps it in.

use std::sync::{Arc, RwLock};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

/// A vector index over chunk ids.
///
/// `search` returns `(chunk id, similarity)` best-first, ties broken by id
/// ascending. Searching an index that was never built is an error.
#[async_trait]
pub trait SemanticIndex: Send + Sync {
    async fn upsert(&self, id: i64, vector: Vec<f32>) -> Result<()>;
    async fn delete(&self, id: i64) -> Result<()>;
    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<(i64, f64)>>;
    /// Replace the whole index with `entries`.
    async fn rebuild(&self, entries: Vec<(i64, Vec<f32>)>) -> Result<()>;
    async fn is_built(&self) -> Result<bool>;
}

fn normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// Immutable set of normalized vectors sorted by chunk id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorSnapshot {
    dims: usize,
    entries: Vec<(i64, Vec<f32>)>,
}

impl VectorSnapshot {
    /// Normalize and sort `entries`. All vectors must share one dimension.
    pub fn from_entries(entries: Vec<(i64, Vec<f32>)>) -> Result<Self> {
        let dims = entries.first().map(|(_, v)| v.len()).unwrap_or(0);
        let mut normalized = Vec::with_capacity(entries.len());
        for (id, v) in entries {
            if v.len() != dims {
                bail!(
                    "vector for chunk {} has {} dims, expected {}",
                    id,
                    v.len(),
                    dims
                );
            }
            normalized.push((id, normalize(v)));
        }
        normalized.sort_by_key(|(id, _)| *id);
        normalized.dedup_by_key(|(id, _)| *id);
        Ok(Self {
            dims,
            entries: normalized,
        })
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(i64, Vec<f32>)] {
        &self.entries
    }

    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(i64, f64)>> {
        if self.entries.is_empty() {
            return Ok(Vec::new());
        }
        if query.len() != self.dims {
            bail!(
                "query vector has {} dims, index has {}",
                query.len(),
                self.dims
            );
        }
        let q = normalize(query.to_vec());
        let mut scored: Vec<(i64, f64)> = self
            .entries
            .iter()
            .map(|(id, v)| {
                let dot: f32 = v.iter().zip(q.iter()).map(|(a, b)| a * b).sum();
                (*id, dot as f64)
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);
        Ok(scored)
    }

    fn upsert(&mut self, id: i64, vector: Vec<f32>) -> Result<()> {
        if self.entries.is_empty() {
            self.dims = vector.len();
        } else if vector.len() != self.dims {
            bail!("vector has {} dims, index has {}", vector.len(), self.dims);
        }
        let v = normalize(vector);
        match self.entries.binary_search_by_key(&id, |(i, _)| *i) {
            Ok(pos) => self.entries[pos].1 = v,
            Err(pos) => self.entries.insert(pos, (id, v)),
        }
        Ok(())
    }

    fn delete(&mut self, id: i64) {
        if let Ok(pos) = self.entries.binary_search_by_key(&id, |(i, _)| *i) {
            self.entries.remove(pos);
        }
    }
}

/// Exact in-memory semantic index.
#[derive(Default)]
pub struct FlatVectorIndex {
    snapshot: RwLock<Option<Arc<VectorSnapshot>>>,
}

impl FlatVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a prepared snapshot, replacing whatever was live.
    pub fn install(&self, snapshot: VectorSnapshot) -> Result<()> {
        let mut guard = self
            .snapshot
            .write()
            .map_err(|_| anyhow!("semantic index lock poisoned"))?;
        *guard = Some(Arc::new(snapshot));
        Ok(())
    }

    /// The live snapshot, if any.
    pub fn snapshot(&self) -> Result<Option<Arc<VectorSnapshot>>> {
        self.snapshot
            .read()
            .map(|s| s.clone())
            .map_err(|_| anyhow!("semantic index lock poisoned"))
    }

    fn update(&self, f: impl FnOnce(&mut VectorSnapshot) -> Result<()>) -> Result<()> {
        let mut guard = self
            .snapshot
            .write()
            .map_err(|_| anyhow!("semantic index lock poisoned"))?;
        let snapshot = guard.get_or_insert_with(Default::default);
        f(Arc::make_mut(snapshot))
    }
}

#[async_trait]
impl SemanticIndex for FlatVectorIndex {
    async fn upsert(&self, id: i64, vector: Vec<f32>) -> Result<()> {
        self.update(|s| s.upsert(id, vector))
    }

    async fn delete(&self, id: i64) -> Result<()> {
        self.update(|s| {
            s.delete(id);
            Ok(())
        })
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<(i64, f64)>> {
        match self.snapshot()? {
            Some(snapshot) => snapshot.search(query, k),
            None => bail!("semantic index has not been built"),
        }
    }

    async fn rebuild(&self, entries: Vec<(i64, Vec<f32>)>) -> Result<()> {
        let fresh = VectorSnapshot::from_entries(entries)?;
        self.install(fresh)
    }

    async fn is_built(&self) -> Result<bool> {
        Ok(self.snapshot()?.is_some())
    }
}
