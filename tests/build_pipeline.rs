//! Build orchestration against in-memory storage and indices.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tempfile::TempDir;

use lawdex::config::CorpusConfig;
use lawdex::ingest::{run_build_with, BuildOutcome, BuildSettings, Pipeline};
use lawdex::progress::NoProgress;
use lawdex_core::chunk::ChunkerConfig;
use lawdex_core::embedding::EmbeddingProvider;
use lawdex_core::error::BuildError;
use lawdex_core::index::{FlatVectorIndex, SemanticIndex};
use lawdex_core::lexical::{Bm25Index, LexicalIndex};
use lawdex_core::models::{document_id, Status};
use lawdex_core::store::memory::InMemoryStore;
use lawdex_core::store::{Store, REINDEX_PENDING, VECTORIZE_CHECKPOINT};

const DIMS: usize = 4;

/// Deterministic embedder: the vector depends only on the text.
struct HashEmbedder {
    calls: AtomicUsize,
}

impl HashEmbedder {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.1f32; DIMS];
                for (i, c) in t.chars().enumerate() {
                    v[i % DIMS] += (c as u32 % 97) as f32 / 97.0;
                }
                v
            })
            .collect())
    }
}

struct FailingEmbedder {
    calls: AtomicUsize,
}

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    fn model_name(&self) -> &str {
        "failing"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        bail!("connection refused")
    }
}

struct Harness {
    store: Arc<InMemoryStore>,
    semantic: Arc<FlatVectorIndex>,
    lexical: Arc<Bm25Index>,
}

impl Harness {
    fn new() -> Self {
        Self {
            store: Arc::new(InMemoryStore::new()),
            semantic: Arc::new(FlatVectorIndex::new()),
            lexical: Arc::new(Bm25Index::new()),
        }
    }

    fn pipeline(&self, embedder: Option<Arc<dyn EmbeddingProvider>>) -> Pipeline {
        Pipeline {
            store: self.store.clone(),
            embedder,
            semantic: self.semantic.clone(),
            lexical: self.lexical.clone(),
        }
    }
}

fn settings(root: &Path, limit: Option<usize>, batch_size: usize) -> BuildSettings {
    BuildSettings {
        corpus: CorpusConfig {
            root: root.to_path_buf(),
            include_globs: vec!["**/*.md".to_string()],
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        },
        chunker: ChunkerConfig::default(),
        parse_workers: 2,
        batch_size,
        max_retries: 2,
        backoff_base_ms: 1,
        limit,
    }
}

/// One single-chunk statute per file.
fn write_corpus(root: &Path, files: usize) {
    for i in 0..files {
        fs::write(
            root.join(format!("法规{}.md", i)),
            format!("第一条 本规定第{}号，自公布之日起施行。\n", i),
        )
        .unwrap();
    }
}

#[tokio::test]
async fn second_run_on_unchanged_corpus_writes_nothing() {
    let dir = TempDir::new().unwrap();
    write_corpus(dir.path(), 3);
    let harness = Harness::new();
    let embedder = Arc::new(HashEmbedder::new());
    let pipeline = harness.pipeline(Some(embedder.clone()));
    let settings = settings(dir.path(), None, 8);
    let stop = AtomicBool::new(false);

    let first = run_build_with(&pipeline, &settings, &NoProgress, &stop)
        .await
        .unwrap();
    assert_eq!(first.new, 3);
    assert_eq!(first.chunks_written, 3);
    assert_eq!(first.vectors_written, 3);
    assert!(first.reindexed);
    assert_eq!(first.outcome, BuildOutcome::Complete);
    assert!(harness.semantic.is_built().await.unwrap());
    assert!(harness.lexical.is_built().await.unwrap());

    let writes = harness.store.mutation_count();
    let calls = embedder.calls.load(Ordering::SeqCst);

    let second = run_build_with(&pipeline, &settings, &NoProgress, &stop)
        .await
        .unwrap();
    assert_eq!(second.unchanged, 3);
    assert_eq!(second.files_parsed, 0);
    assert_eq!(second.vectors_written, 0);
    assert!(!second.reindexed);
    assert_eq!(second.outcome, BuildOutcome::Complete);
    assert_eq!(harness.store.mutation_count(), writes);
    assert_eq!(embedder.calls.load(Ordering::SeqCst), calls);
}

#[tokio::test]
async fn modified_file_is_reparsed_and_deleted_file_archived() {
    let dir = TempDir::new().unwrap();
    write_corpus(dir.path(), 3);
    let harness = Harness::new();
    let pipeline = harness.pipeline(Some(Arc::new(HashEmbedder::new())));
    let settings = settings(dir.path(), None, 8);
    let stop = AtomicBool::new(false);
    run_build_with(&pipeline, &settings, &NoProgress, &stop)
        .await
        .unwrap();

    fs::write(
        dir.path().join("法规0.md"),
        "第一条 本规定已修订。\n第二条 本规定自修订之日起施行。\n",
    )
    .unwrap();
    fs::remove_file(dir.path().join("法规2.md")).unwrap();

    let report = run_build_with(&pipeline, &settings, &NoProgress, &stop)
        .await
        .unwrap();
    assert_eq!((report.new, report.modified, report.deleted, report.unchanged), (0, 1, 1, 1));
    assert_eq!(report.files_parsed, 1);
    assert_eq!(report.vectors_written, 1);
    assert!(report.reindexed);

    let archived = harness
        .store
        .get_document(&document_id("法规2.md", 0))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(archived.document.status, Status::Archived);
    assert!(archived.chunks.is_empty());

    let revised = harness
        .store
        .get_document(&document_id("法规0.md", 0))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(revised.chunks.len(), 1);
    assert!(revised.chunks[0].text.contains("本规定已修订"));

    // Only live chunks reach the rebuilt indices.
    let stats = harness.store.stats().await.unwrap();
    assert_eq!(stats.chunks, 2);
    assert_eq!(harness.semantic.snapshot().unwrap().unwrap().len(), 2);
}

#[tokio::test]
async fn limited_vectorize_resumes_from_checkpoint() {
    let dir = TempDir::new().unwrap();
    write_corpus(dir.path(), 5);
    let harness = Harness::new();
    let pipeline = harness.pipeline(Some(Arc::new(HashEmbedder::new())));
    let settings = settings(dir.path(), Some(2), 1);
    let stop = AtomicBool::new(false);

    let first = run_build_with(&pipeline, &settings, &NoProgress, &stop)
        .await
        .unwrap();
    assert_eq!(first.vectors_written, 2);
    assert_eq!(first.vectors_pending, 3);
    assert_eq!(first.outcome, BuildOutcome::MoreWorkRemains);
    let checkpoint = harness
        .store
        .get_checkpoint(VECTORIZE_CHECKPOINT)
        .await
        .unwrap();
    assert!(checkpoint.is_some());

    let second = run_build_with(&pipeline, &settings, &NoProgress, &stop)
        .await
        .unwrap();
    assert_eq!(second.files_parsed, 0);
    assert_eq!(second.vectors_written, 2);
    assert_eq!(second.vectors_pending, 1);
    assert_eq!(second.outcome, BuildOutcome::MoreWorkRemains);

    let third = run_build_with(&pipeline, &settings, &NoProgress, &stop)
        .await
        .unwrap();
    assert_eq!(third.vectors_written, 1);
    assert_eq!(third.vectors_pending, 0);
    assert_eq!(third.outcome, BuildOutcome::Complete);
    assert_eq!(harness.semantic.snapshot().unwrap().unwrap().len(), 5);

    let fourth = run_build_with(&pipeline, &settings, &NoProgress, &stop)
        .await
        .unwrap();
    assert_eq!(fourth.vectors_written, 0);
    assert_eq!(fourth.outcome, BuildOutcome::Complete);
    assert!(!fourth.reindexed);
}

#[tokio::test]
async fn failed_embedding_batch_stops_before_reindex() {
    let dir = TempDir::new().unwrap();
    write_corpus(dir.path(), 2);
    let harness = Harness::new();
    let embedder = Arc::new(FailingEmbedder {
        calls: AtomicUsize::new(0),
    });
    let pipeline = harness.pipeline(Some(embedder.clone()));
    let settings = settings(dir.path(), None, 8);
    let stop = AtomicBool::new(false);

    let err = run_build_with(&pipeline, &settings, &NoProgress, &stop)
        .await
        .unwrap_err();
    match err {
        BuildError::EmbeddingBatch {
            first_chunk_id,
            attempts,
            ..
        } => {
            assert_eq!(first_chunk_id, 1);
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);

    // Parsed rows are kept; the indices were never rebuilt.
    assert_eq!(harness.store.stats().await.unwrap().chunks, 2);
    assert!(!harness.lexical.is_built().await.unwrap());
    assert_eq!(
        harness.store.get_checkpoint(REINDEX_PENDING).await.unwrap(),
        Some(1)
    );

    // A healthy provider picks up where the failed run stopped.
    let pipeline = harness.pipeline(Some(Arc::new(HashEmbedder::new())));
    let report = run_build_with(&pipeline, &settings, &NoProgress, &stop)
        .await
        .unwrap();
    assert_eq!(report.files_parsed, 0);
    assert_eq!(report.vectors_written, 2);
    assert!(report.reindexed);
    assert_eq!(
        harness.store.get_checkpoint(REINDEX_PENDING).await.unwrap(),
        Some(0)
    );
}

#[tokio::test]
async fn without_embedder_only_lexical_index_is_built() {
    let dir = TempDir::new().unwrap();
    write_corpus(dir.path(), 2);
    let harness = Harness::new();
    let pipeline = harness.pipeline(None);
    let settings = settings(dir.path(), None, 8);
    let stop = AtomicBool::new(false);

    let report = run_build_with(&pipeline, &settings, &NoProgress, &stop)
        .await
        .unwrap();
    assert!(report.vectorize_skipped);
    assert_eq!(report.vectors_pending, 2);
    assert_eq!(report.outcome, BuildOutcome::Complete);
    assert!(harness.lexical.is_built().await.unwrap());
    assert!(!harness.semantic.is_built().await.unwrap());

    let again = run_build_with(&pipeline, &settings, &NoProgress, &stop)
        .await
        .unwrap();
    assert!(!again.reindexed);
}

#[tokio::test]
async fn unreadable_file_is_reported_and_others_proceed() {
    let dir = TempDir::new().unwrap();
    write_corpus(dir.path(), 2);
    fs::write(dir.path().join("坏文件.md"), [0xffu8, 0xfe, 0x00, 0x80]).unwrap();
    let harness = Harness::new();
    let pipeline = harness.pipeline(None);
    let settings = settings(dir.path(), None, 8);
    let stop = AtomicBool::new(false);

    let report = run_build_with(&pipeline, &settings, &NoProgress, &stop)
        .await
        .unwrap();
    assert_eq!(report.files_parsed, 2);
    assert_eq!(report.parse_failures.len(), 1);
    assert_eq!(report.parse_failures[0].path, "坏文件.md");
    assert_eq!(report.outcome, BuildOutcome::Complete);
}

#[tokio::test]
async fn shutdown_before_parse_leaves_more_work() {
    let dir = TempDir::new().unwrap();
    write_corpus(dir.path(), 3);
    let harness = Harness::new();
    let pipeline = harness.pipeline(Some(Arc::new(HashEmbedder::new())));
    let settings = settings(dir.path(), None, 8);
    let stop = AtomicBool::new(true);

    let report = run_build_with(&pipeline, &settings, &NoProgress, &stop)
        .await
        .unwrap();
    assert!(report.interrupted);
    assert!(!report.reindexed);
    assert_eq!(report.outcome, BuildOutcome::MoreWorkRemains);
}

#[cfg(unix)]
#[tokio::test]
async fn unreadable_registered_file_is_kept_not_archived() {
    let dir = TempDir::new().unwrap();
    write_corpus(dir.path(), 2);
    let harness = Harness::new();
    let pipeline = harness.pipeline(None);
    let mut settings = settings(dir.path(), None, 8);
    settings.corpus.follow_symlinks = true;
    let stop = AtomicBool::new(false);
    run_build_with(&pipeline, &settings, &NoProgress, &stop)
        .await
        .unwrap();

    fs::remove_file(dir.path().join("法规1.md")).unwrap();
    std::os::unix::fs::symlink(dir.path().join("不存在.md"), dir.path().join("法规1.md")).unwrap();
    fs::write(dir.path().join("法规9.md"), "第一条 新规定。\n").unwrap();

    let report = run_build_with(&pipeline, &settings, &NoProgress, &stop)
        .await
        .unwrap();
    assert_eq!((report.new, report.deleted, report.unchanged), (1, 0, 1));
    assert_eq!(report.files_parsed, 1);
    assert_eq!(report.parse_failures.len(), 1);
    assert_eq!(report.parse_failures[0].path, "法规1.md");
    assert_eq!(report.outcome, BuildOutcome::Complete);

    let kept = harness
        .store
        .get_document(&document_id("法规1.md", 0))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(kept.document.status, Status::Active);
    assert_eq!(kept.chunks.len(), 1);
}
