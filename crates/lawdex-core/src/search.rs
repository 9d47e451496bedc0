//! Hybrid retrieval with reciprocal rank fusion.
//!
//! The engine works entirely through the [`Store`], [`SemanticIndex`],
//! [`LexicalIndex`] and [`EmbeddingProvider`] traits, with no database or
//! configuration dependencies.
//!
//! # Fusion Algorithm
//!
//! 1. Fetch up to `candidate_k_semantic` ids nearest to the query embedding
//!    and up to `candidate_k_lexical` ids by term relevance. Each list is
//!    ordered best-first, ties broken by id ascending.
//! 2. Fuse by rank: `score = Σ 1 / (rrf_k + rank)` over the lists that
//!    contain the chunk, with 0-based ranks. Raw scores from the two paths
//!    are never compared, only positions.
//! 3. Multiply by the factor of the first category rule matching the chunk's
//!    file path or hierarchical path (1.0 when none match).
//! 4. Sort by score descending, then id ascending, and keep the top `k`.
//!
//! With `rrf_k = 60` a chunk ranked first by both paths scores
//! `2/60 ≈ 0.0333`; one ranked first by a single path scores `1/60`.
//!
//! A path that is not configured or fails degrades retrieval to the other
//! path. Only when both are out is the call an error.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;

use crate::embedding::EmbeddingProvider;
use crate::error::RetrieveError;
use crate::index::SemanticIndex;
use crate::lexical::LexicalIndex;
use crate::store::Store;

/// Score multiplier for chunks whose file path or hierarchical path contains
/// `contains`.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryRule {
    pub name: String,
    pub contains: String,
    pub factor: f64,
}

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone, PartialEq)]
pub struct FusionParams {
    pub candidate_k_semantic: usize,
    pub candidate_k_lexical: usize,
    /// Rank offset in `1 / (rrf_k + rank)`.
    pub rrf_k: f64,
    pub final_limit: usize,
    pub max_query_chars: usize,
    /// Checked in order; the first match wins.
    pub categories: Vec<CategoryRule>,
}

impl Default for FusionParams {
    fn default() -> Self {
        Self {
            candidate_k_semantic: 30,
            candidate_k_lexical: 30,
            rrf_k: 60.0,
            final_limit: 20,
            max_query_chars: 2000,
            categories: Vec::new(),
        }
    }
}

/// A chunk id with its fused score and the 0-based rank it held in each
/// path.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedCandidate {
    pub chunk_id: i64,
    pub score: f64,
    pub semantic_rank: Option<usize>,
    pub lexical_rank: Option<usize>,
}

/// One retrieval result. `text` carries the provenance header.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub chunk_id: i64,
    pub document_id: String,
    pub source_title: String,
    pub path: String,
    pub text: String,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_rank: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lexical_rank: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

/// Order a candidate list best-first with ties by id, dropping repeated ids.
fn ranked_ids(list: &[(i64, f64)]) -> Vec<i64> {
    let mut sorted = list.to_vec();
    sorted.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    let mut seen = HashSet::new();
    sorted
        .into_iter()
        .filter(|(id, _)| seen.insert(*id))
        .map(|(id, _)| id)
        .collect()
}

fn sort_by_score(fused: &mut [FusedCandidate]) {
    fused.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.chunk_id.cmp(&b.chunk_id)));
}

/// Reciprocal rank fusion of two candidate lists.
pub fn fuse(semantic: &[(i64, f64)], lexical: &[(i64, f64)], rrf_k: f64) -> Vec<FusedCandidate> {
    let mut by_id: BTreeMap<i64, FusedCandidate> = BTreeMap::new();
    for (rank, id) in ranked_ids(semantic).into_iter().enumerate() {
        let c = fused_entry(&mut by_id, id);
        c.semantic_rank = Some(rank);
        c.score += 1.0 / (rrf_k + rank as f64);
    }
    for (rank, id) in ranked_ids(lexical).into_iter().enumerate() {
        let c = fused_entry(&mut by_id, id);
        c.lexical_rank = Some(rank);
        c.score += 1.0 / (rrf_k + rank as f64);
    }

    let mut fused: Vec<FusedCandidate> = by_id.into_values().collect();
    sort_by_score(&mut fused);
    fused
}

fn fused_entry(by_id: &mut BTreeMap<i64, FusedCandidate>, id: i64) -> &mut FusedCandidate {
    by_id.entry(id).or_insert_with(|| FusedCandidate {
        chunk_id: id,
        score: 0.0,
        semantic_rank: None,
        lexical_rank: None,
    })
}

/// The first rule matching `file_path` or `path`.
pub fn match_category<'r>(
    rules: &'r [CategoryRule],
    file_path: &str,
    path: &str,
) -> Option<&'r CategoryRule> {
    rules
        .iter()
        .find(|r| !r.contains.is_empty() && (file_path.contains(&r.contains) || path.contains(&r.contains)))
}

/// Query-time view over storage and the two indices.
///
/// Stateless across calls; holds only borrowed handles.
pub struct Retriever<'a> {
    store: &'a dyn Store,
    embedder: Option<&'a dyn EmbeddingProvider>,
    semantic: Option<&'a dyn SemanticIndex>,
    lexical: Option<&'a dyn LexicalIndex>,
}

impl<'a> Retriever<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self {
            store,
            embedder: None,
            semantic: None,
            lexical: None,
        }
    }

    pub fn with_semantic(
        mut self,
        embedder: &'a dyn EmbeddingProvider,
        index: &'a dyn SemanticIndex,
    ) -> Self {
        self.embedder = Some(embedder);
        self.semantic = Some(index);
        self
    }

    pub fn with_lexical(mut self, index: &'a dyn LexicalIndex) -> Self {
        self.lexical = Some(index);
        self
    }

    /// Retrieve the top `k` chunks for `query`.
    ///
    /// An empty query yields an empty list. A query longer than
    /// `max_query_chars` is [`RetrieveError::InvalidQuery`].
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        params: &FusionParams,
    ) -> Result<Vec<RetrievedChunk>, RetrieveError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let len = query.chars().count();
        if len > params.max_query_chars {
            return Err(RetrieveError::InvalidQuery(format!(
                "query is {} characters, limit is {}",
                len, params.max_query_chars
            )));
        }

        let semantic = self.semantic_candidates(query, params.candidate_k_semantic).await;
        let lexical = self.lexical_candidates(query, params.candidate_k_lexical).await;
        let (semantic, lexical) = match (semantic, lexical) {
            (Err(s), Err(l)) => {
                return Err(RetrieveError::Unavailable {
                    semantic: s,
                    lexical: l,
                })
            }
            (Err(reason), Ok(l)) => {
                if self.semantic.is_some() {
                    tracing::warn!(%reason, "semantic path unavailable, using lexical only");
                }
                (Vec::new(), l)
            }
            (Ok(s), Err(reason)) => {
                if self.lexical.is_some() {
                    tracing::warn!(%reason, "lexical path unavailable, using semantic only");
                }
                (s, Vec::new())
            }
            (Ok(s), Ok(l)) => (s, l),
        };
        tracing::debug!(
            semantic = semantic.len(),
            lexical = lexical.len(),
            "retrieval candidates"
        );

        let fused = fuse(&semantic, &lexical, params.rrf_k);
        let ids: Vec<i64> = fused.iter().map(|c| c.chunk_id).collect();
        let chunks: HashMap<i64, _> = self
            .store
            .get_chunks(&ids)
            .await?
            .into_iter()
            .map(|c| (c.id, c))
            .collect();

        let mut results: Vec<RetrievedChunk> = fused
            .into_iter()
            .filter_map(|c| {
                let chunk = chunks.get(&c.chunk_id)?;
                let rule = match_category(&params.categories, &chunk.file_path, &chunk.path);
                let factor = rule.map(|r| r.factor).unwrap_or(1.0);
                Some(RetrievedChunk {
                    chunk_id: c.chunk_id,
                    document_id: chunk.document_id.clone(),
                    source_title: chunk.title.clone(),
                    path: chunk.path.clone(),
                    text: chunk.text.clone(),
                    score: c.score * factor,
                    semantic_rank: c.semantic_rank,
                    lexical_rank: c.lexical_rank,
                    category: rule.map(|r| r.name.clone()),
                })
            })
            .collect();
        results.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.chunk_id.cmp(&b.chunk_id)));
        results.truncate(k);
        Ok(results)
    }

    async fn semantic_candidates(&self, query: &str, k: usize) -> Result<Vec<(i64, f64)>, String> {
        let (embedder, index) = match (self.embedder, self.semantic) {
            (Some(e), Some(i)) => (e, i),
            _ => return Err("semantic retrieval not configured".to_string()),
        };
        let vectors = embedder
            .embed(&[query.to_string()])
            .await
            .map_err(|e| format!("query embedding failed: {:#}", e))?;
        let vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| "query embedding returned no vector".to_string())?;
        index.search(&vector, k).await.map_err(|e| format!("{:#}", e))
    }

    async fn lexical_candidates(&self, query: &str, k: usize) -> Result<Vec<(i64, f64)>, String> {
        match self.lexical {
            Some(index) => index.search(query, k).await.map_err(|e| format!("{:#}", e)),
            None => Err("lexical retrieval not configured".to_string()),
        }
    }
}
