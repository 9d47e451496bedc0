//! Lexical (term-relevance) index.
//!
//! Legal Chinese has no word boundaries, so text is tokenized into
//! overlapping CJK bigrams plus lowercase words for everything else.
//! [`tokenize`] is shared with the SQLite FTS5 index in the app crate,
//! which stores the tokens pre-split.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

/// A term-ranked index over chunk texts.
///
/// `search` returns `(chunk id, score)` best-first, ties broken by id
/// ascending. Searching an index that was never built is an error, which
/// the retrieval engine treats as the lexical path being unavailable.
#[async_trait]
pub trait LexicalIndex: Send + Sync {
    async fn upsert(&self, id: i64, text: &str) -> Result<()>;
    async fn delete(&self, id: i64) -> Result<()>;
    async fn search(&self, query: &str, k: usize) -> Result<Vec<(i64, f64)>>;
    /// Replace the whole index with `entries`.
    async fn rebuild(&self, entries: Vec<(i64, String)>) -> Result<()>;
    async fn is_built(&self) -> Result<bool>;
}

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{3040}'..='\u{30FF}'
        | '\u{3400}'..='\u{4DBF}'
        | '\u{4E00}'..='\u{9FFF}'
        | '\u{AC00}'..='\u{D7AF}'
        | '\u{F900}'..='\u{FAFF}'
        | '\u{20000}'..='\u{2A6DF}')
}

/// Split text into index terms.
///
/// A run of CJK characters yields its overlapping bigrams (a lone character
/// yields itself). A run of other alphanumerics yields one lowercase word.
/// Everything else separates terms.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut cjk: Vec<char> = Vec::new();
    let mut word = String::new();

    fn flush_cjk(run: &mut Vec<char>, out: &mut Vec<String>) {
        match run.len() {
            0 => {}
            1 => out.push(run[0].to_string()),
            _ => out.extend(run.windows(2).map(|w| w.iter().collect::<String>())),
        }
        run.clear();
    }
    fn flush_word(word: &mut String, out: &mut Vec<String>) {
        if !word.is_empty() {
            out.push(std::mem::take(word));
        }
    }

    for c in text.chars() {
        if is_cjk(c) {
            flush_word(&mut word, &mut tokens);
            cjk.push(c);
        } else if c.is_alphanumeric() {
            flush_cjk(&mut cjk, &mut tokens);
            word.extend(c.to_lowercase());
        } else {
            flush_cjk(&mut cjk, &mut tokens);
            flush_word(&mut word, &mut tokens);
        }
    }
    flush_cjk(&mut cjk, &mut tokens);
    flush_word(&mut word, &mut tokens);
    tokens
}

/// Distinct query terms in first-seen order.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(query)
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

const K1: f64 = 1.2;
const B: f64 = 0.75;

#[derive(Debug, Clone, Default)]
struct Bm25Snapshot {
    docs: HashMap<i64, HashMap<String, u32>>,
    lengths: HashMap<i64, usize>,
    doc_freq: HashMap<String, usize>,
    total_len: usize,
}

impl Bm25Snapshot {
    fn insert(&mut self, id: i64, text: &str) {
        self.remove(id);
        let tokens = tokenize(text);
        let mut freqs: HashMap<String, u32> = HashMap::new();
        for t in &tokens {
            *freqs.entry(t.clone()).or_default() += 1;
        }
        for term in freqs.keys() {
            *self.doc_freq.entry(term.clone()).or_default() += 1;
        }
        self.total_len += tokens.len();
        self.lengths.insert(id, tokens.len());
        self.docs.insert(id, freqs);
    }

    fn remove(&mut self, id: i64) {
        if let Some(freqs) = self.docs.remove(&id) {
            for term in freqs.keys() {
                if let Some(df) = self.doc_freq.get_mut(term) {
                    *df -= 1;
                    if *df == 0 {
                        self.doc_freq.remove(term);
                    }
                }
            }
            self.total_len -= self.lengths.remove(&id).unwrap_or(0);
        }
    }

    fn search(&self, query: &str, k: usize) -> Vec<(i64, f64)> {
        let terms = query_terms(query);
        if terms.is_empty() || self.docs.is_empty() {
            return Vec::new();
        }
        let n = self.docs.len() as f64;
        let avg_len = (self.total_len as f64 / n).max(1.0);

        let mut scores: HashMap<i64, f64> = HashMap::new();
        for term in &terms {
            let df = match self.doc_freq.get(term) {
                Some(df) => *df as f64,
                None => continue,
            };
            let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();
            for (id, freqs) in &self.docs {
                if let Some(tf) = freqs.get(term) {
                    let tf = *tf as f64;
                    let len = *self.lengths.get(id).unwrap_or(&0) as f64;
                    let norm = tf * (K1 + 1.0) / (tf + K1 * (1.0 - B + B * len / avg_len));
                    *scores.entry(*id).or_default() += idf * norm;
                }
            }
        }

        let mut ranked: Vec<(i64, f64)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.truncate(k);
        ranked
    }
}

/// In-memory BM25 index. Rebuild constructs a fresh snapshot and swaps it
/// in under the write lock, so readers never see a half-built index.
#[derive(Default)]
pub struct Bm25Index {
    snapshot: RwLock<Option<Arc<Bm25Snapshot>>>,
}

impl Bm25Index {
    pub fn new() -> Self {
        Self::default()
    }

    fn current(&self) -> Result<Option<Arc<Bm25Snapshot>>> {
        self.snapshot
            .read()
            .map(|s| s.clone())
            .map_err(|_| anyhow!("lexical index lock poisoned"))
    }

    fn update(&self, f: impl FnOnce(&mut Bm25Snapshot)) -> Result<()> {
        let mut guard = self
            .snapshot
            .write()
            .map_err(|_| anyhow!("lexical index lock poisoned"))?;
        let snapshot = guard.get_or_insert_with(Default::default);
        f(Arc::make_mut(snapshot));
        Ok(())
    }
}

#[async_trait]
impl LexicalIndex for Bm25Index {
    async fn upsert(&self, id: i64, text: &str) -> Result<()> {
        self.update(|s| s.insert(id, text))
    }

    async fn delete(&self, id: i64) -> Result<()> {
        self.update(|s| s.remove(id))
    }

    async fn search(&self, query: &str, k: usize) -> Result<Vec<(i64, f64)>> {
        match self.current()? {
            Some(snapshot) => Ok(snapshot.search(query, k)),
            None => bail!("lexical index has not been built"),
        }
    }

    async fn rebuild(&self, entries: Vec<(i64, String)>) -> Result<()> {
        let mut fresh = Bm25Snapshot::default();
        for (id, text) in &entries {
            fresh.insert(*id, text);
        }
        let mut guard = self
            .snapshot
            .write()
            .map_err(|_| anyhow!("lexical index lock poisoned"))?;
        *guard = Some(Arc::new(fresh));
        Ok(())
    }

    async fn is_built(&self) -> Result<bool> {
        Ok(self.current()?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cjk_bigrams_and_latin_words() {
        assert_eq!(tokenize("合同法"), vec!["合同", "同法"]);
        assert_eq!(tokenize("法"), vec!["法"]);
        assert_eq!(
            tokenize("GDPR第5条"),
            vec!["gdpr", "第", "5", "条"]
        );
        assert_eq!(tokenize("违约，责任"), vec!["违约", "责任"]);
        assert!(tokenize("  ，。  ").is_empty());
    }

    #[test]
    fn query_terms_are_distinct() {
        assert_eq!(query_terms("合同 合同"), vec!["合同"]);
    }

    #[tokio::test]
    async fn unbuilt_index_errors() {
        let index = Bm25Index::new();
        assert!(!index.is_built().await.unwrap());
        assert!(index.search("合同", 5).await.is_err());
    }

    #[tokio::test]
    async fn ranks_by_relevance_then_id() {
        let index = Bm25Index::new();
        index
            .rebuild(vec![
                (1, "违约责任的承担方式".into()),
                (2, "合同的订立".into()),
                (3, "违约责任".into()),
                (4, "合同的订立".into()),
            ])
            .await
            .unwrap();
        let hits = index.search("违约责任", 10).await.unwrap();
        assert_eq!(hits.iter().map(|h| h.0).collect::<Vec<_>>(), vec![3, 1]);

        let hits = index.search("合同订立", 10).await.unwrap();
        assert_eq!(hits.iter().map(|h| h.0).collect::<Vec<_>>(), vec![2, 4]);
        assert_eq!(hits[0].1, hits[1].1);

        assert!(index.search("", 10).await.unwrap().is_empty());
        assert!(index.search("刑罚", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upsert_and_delete_patch_the_index() {
        let index = Bm25Index::new();
        index.rebuild(Vec::new()).await.unwrap();
        index.upsert(7, "担保物权").await.unwrap();
        assert_eq!(index.search("担保", 5).await.unwrap()[0].0, 7);
        index.upsert(7, "抵押权").await.unwrap();
        assert!(index.search("担保", 5).await.unwrap().is_empty());
        index.delete(7).await.unwrap();
        assert!(index.search("抵押", 5).await.unwrap().is_empty());
    }
}
