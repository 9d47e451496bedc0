//! Incremental build orchestration.
//!
//! One run walks five phases:
//!
//! 1. **Scan**: hash every corpus file and diff against the file registry.
//! 2. **Clean**: archive deleted files and drop their chunks and vectors.
//! 3. **Parse**: chunk new and modified files on up to `parse_workers`
//!    concurrent tasks, replacing each file's rows in one transaction.
//! 4. **Vectorize**: embed chunks that lack a vector, one batch at a time,
//!    persisting each batch with the `vectorize` checkpoint.
//! 5. **Reindex**: rebuild the semantic and lexical indices from storage,
//!    only when storage changed since the last rebuild.
//!
//! Running twice over an unchanged corpus writes nothing on the second run.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::Serialize;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;

use lawdex_core::changes::{detect_changes, ScannedFile};
use lawdex_core::chunk::{parse, ChunkerConfig};
use lawdex_core::embedding::EmbeddingProvider;
use lawdex_core::error::BuildError;
use lawdex_core::index::SemanticIndex;
use lawdex_core::lexical::LexicalIndex;
use lawdex_core::models::{content_hash, FileRecord, Status};
use lawdex_core::store::{Store, VectorRecord, REINDEX_PENDING, VECTORIZE_CHECKPOINT};

use crate::config::{Config, CorpusConfig};
use crate::db;
use crate::embedding::create_provider;
use crate::fts::SqliteLexicalIndex;
use crate::migrate;
use crate::progress::{BuildProgressEvent, BuildProgressReporter};
use crate::scan::scan_corpus;
use crate::sqlite_store::SqliteStore;
use crate::vector_index::PersistedVectorIndex;

/// Backoff doubles per attempt up to this many doublings (32x).
const MAX_BACKOFF_SHIFT: u32 = 5;

/// Whether a run finished everything it could.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildOutcome {
    /// Nothing left to do.
    Complete,
    /// Stopped by `--limit` or a shutdown request with chunks still pending.
    MoreWorkRemains,
}

/// A file skipped because it could not be read or parsed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileFailure {
    pub path: String,
    pub reason: String,
}

/// Summary of one build run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildReport {
    pub files_scanned: usize,
    pub new: usize,
    pub modified: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub files_parsed: usize,
    pub chunks_written: usize,
    pub parse_failures: Vec<FileFailure>,
    pub vectors_written: usize,
    pub vectors_pending: i64,
    /// Vectorize did not run because no embedding provider is configured.
    pub vectorize_skipped: bool,
    pub reindexed: bool,
    pub interrupted: bool,
    pub outcome: BuildOutcome,
}

/// Per-run knobs, resolved from config and CLI flags.
#[derive(Debug, Clone)]
pub struct BuildSettings {
    pub corpus: CorpusConfig,
    pub chunker: ChunkerConfig,
    pub parse_workers: usize,
    pub batch_size: usize,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    /// Maximum chunks to vectorize this run.
    pub limit: Option<usize>,
}

impl BuildSettings {
    pub fn from_config(config: &Config, limit: Option<usize>, batch_size: Option<usize>) -> Self {
        Self {
            corpus: config.corpus.clone(),
            chunker: config.chunking.chunker(),
            parse_workers: config.build.parse_workers.max(1),
            batch_size: batch_size.unwrap_or(config.embedding.batch_size).max(1),
            max_retries: config.embedding.max_retries,
            backoff_base_ms: config.embedding.backoff_base_ms,
            limit,
        }
    }
}

/// Storage, indices and embedder a build runs against.
#[derive(Clone)]
pub struct Pipeline {
    pub store: Arc<dyn Store>,
    /// `None` when embeddings are disabled; Vectorize is then skipped.
    pub embedder: Option<Arc<dyn EmbeddingProvider>>,
    pub semantic: Arc<dyn SemanticIndex>,
    pub lexical: Arc<dyn LexicalIndex>,
}

/// `lawdex build`: wire the SQLite store and run one build.
pub async fn run_build(
    config: &Config,
    limit: Option<usize>,
    batch_size: Option<usize>,
    progress: &dyn BuildProgressReporter,
) -> Result<BuildReport, BuildError> {
    let pool = db::connect(config).await?;
    migrate::migrate(&pool).await?;

    let embedder: Option<Arc<dyn EmbeddingProvider>> = if config.embedding.is_enabled() {
        Some(Arc::from(create_provider(&config.embedding)?))
    } else {
        None
    };
    let pipeline = Pipeline {
        store: Arc::new(SqliteStore::new(pool.clone())),
        embedder,
        semantic: Arc::new(PersistedVectorIndex::open(&config.vector_path())),
        lexical: Arc::new(SqliteLexicalIndex::new(pool.clone())),
    };
    let settings = BuildSettings::from_config(config, limit, batch_size);

    let shutdown = Arc::new(AtomicBool::new(false));
    let listener = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("shutdown requested, stopping after the current batch");
                shutdown.store(true, Ordering::SeqCst);
            }
        })
    };

    let result = run_build_with(&pipeline, &settings, progress, &shutdown).await;
    listener.abort();
    pool.close().await;
    result
}

/// Run one build against `pipeline`. `shutdown` is polled between parse
/// tasks and between embedding batches.
pub async fn run_build_with(
    pipeline: &Pipeline,
    settings: &BuildSettings,
    progress: &dyn BuildProgressReporter,
    shutdown: &AtomicBool,
) -> Result<BuildReport, BuildError> {
    // Scan
    progress.report(BuildProgressEvent::Scanning);
    let corpus = settings.corpus.clone();
    let scan = tokio::task::spawn_blocking(move || scan_corpus(&corpus))
        .await
        .map_err(|e| anyhow!("scan task failed: {}", e))??;
    let scanned = &scan.files;

    let registry = pipeline.store.list_files().await?;
    let mut changes = detect_changes(scanned, &registry)?;
    // A file that failed to read is not a deleted file.
    changes.deleted.retain(|r| !scan.covers_unreadable(&r.path));
    progress.report(BuildProgressEvent::Scanned {
        new: changes.new.len() as u64,
        modified: changes.modified.len() as u64,
        deleted: changes.deleted.len() as u64,
        unchanged: changes.unchanged.len() as u64,
    });
    tracing::info!(
        scanned = scanned.len(),
        new = changes.new.len(),
        modified = changes.modified.len(),
        deleted = changes.deleted.len(),
        "scan complete"
    );

    let mut report = BuildReport {
        files_scanned: scanned.len(),
        new: changes.new.len(),
        modified: changes.modified.len(),
        deleted: changes.deleted.len(),
        unchanged: changes.unchanged.len(),
        files_parsed: 0,
        chunks_written: 0,
        parse_failures: scan
            .unreadable
            .iter()
            .map(|u| FileFailure {
                path: u.path.clone(),
                reason: u.reason.clone(),
            })
            .collect(),
        vectors_written: 0,
        vectors_pending: 0,
        vectorize_skipped: false,
        reindexed: false,
        interrupted: false,
        outcome: BuildOutcome::Complete,
    };

    if !changes.is_empty() {
        // Set before touching rows so a crash mid-run still forces a reindex.
        pipeline.store.set_checkpoint(REINDEX_PENDING, 1).await?;
    }

    // Clean
    let now = chrono::Utc::now().timestamp();
    for record in &changes.deleted {
        pipeline.store.archive_file(&record.path, now).await?;
        tracing::info!(path = %record.path, "archived deleted file");
    }

    // Parse
    let to_parse: Vec<ScannedFile> = changes.to_parse().cloned().collect();
    parse_files(pipeline, settings, to_parse, progress, shutdown, &mut report).await?;
    if shutdown.load(Ordering::SeqCst) {
        report.interrupted = true;
        report.vectors_pending = pipeline.store.count_missing_vectors().await?;
        report.outcome = BuildOutcome::MoreWorkRemains;
        return Ok(report);
    }

    // Vectorize
    let limit_reached = match &pipeline.embedder {
        Some(embedder) => {
            vectorize(pipeline.store.as_ref(), embedder.as_ref(), settings, progress, shutdown, &mut report)
                .await?
        }
        None => {
            report.vectorize_skipped = true;
            false
        }
    };
    report.vectors_pending = pipeline.store.count_missing_vectors().await?;
    if report.interrupted {
        report.outcome = BuildOutcome::MoreWorkRemains;
        return Ok(report);
    }
    if limit_reached && report.vectors_pending > 0 {
        report.outcome = BuildOutcome::MoreWorkRemains;
    }

    // Reindex
    if reindex_needed(pipeline, &report).await? {
        progress.report(BuildProgressEvent::Reindexing);
        reindex(pipeline).await?;
        report.reindexed = true;
    }

    tracing::info!(
        parsed = report.files_parsed,
        chunks = report.chunks_written,
        vectors = report.vectors_written,
        pending = report.vectors_pending,
        reindexed = report.reindexed,
        "build finished"
    );
    Ok(report)
}

/// Hands out one lock per document path so two workers never write the
/// same file's rows at once.
#[derive(Default)]
struct DocumentLocks {
    locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DocumentLocks {
    fn lock_for(&self, path: &str) -> Result<Arc<Mutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| anyhow!("document lock table poisoned"))?;
        Ok(locks.entry(path.to_string()).or_default().clone())
    }
}

/// Read, verify, and chunk one file. Runs on a blocking thread.
fn read_and_parse(
    root: &Path,
    file: &ScannedFile,
    chunker: &ChunkerConfig,
) -> Result<lawdex_core::models::ParsedFile, BuildError> {
    let full = root.join(&file.path);
    let bytes = std::fs::read(&full).map_err(|e| BuildError::Parse {
        path: file.path.clone(),
        reason: format!("read failed: {}", e),
    })?;
    let actual = content_hash(&bytes);
    if actual != file.content_hash {
        return Err(BuildError::HashMismatch {
            path: file.path.clone(),
            expected: file.content_hash.clone(),
            actual,
        });
    }
    let text = String::from_utf8(bytes).map_err(|e| BuildError::Parse {
        path: file.path.clone(),
        reason: format!("not valid UTF-8: {}", e),
    })?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(&text);
    Ok(parse(&file.title, text, chunker))
}

async fn parse_files(
    pipeline: &Pipeline,
    settings: &BuildSettings,
    files: Vec<ScannedFile>,
    progress: &dyn BuildProgressReporter,
    shutdown: &AtomicBool,
    report: &mut BuildReport,
) -> Result<(), BuildError> {
    let total = files.len() as u64;
    if total == 0 {
        return Ok(());
    }
    let semaphore = Arc::new(Semaphore::new(settings.parse_workers));
    let locks = Arc::new(DocumentLocks::default());
    let mut tasks: JoinSet<(String, Result<usize, BuildError>)> = JoinSet::new();

    for file in files {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| anyhow!("parse worker pool closed: {}", e))?;
        let store = pipeline.store.clone();
        let locks = locks.clone();
        let root = settings.corpus.root.clone();
        let chunker = settings.chunker.clone();

        tasks.spawn(async move {
            let _permit = permit;
            let path = file.path.clone();
            let result = async {
                let lock = locks.lock_for(&file.path)?;
                let _guard = lock.lock().await;
                let record = FileRecord {
                    path: file.path.clone(),
                    content_hash: file.content_hash.clone(),
                    title: file.title.clone(),
                    status: Status::Active,
                    last_processed_at: chrono::Utc::now().timestamp(),
                };
                let parsed =
                    tokio::task::spawn_blocking(move || read_and_parse(&root, &file, &chunker))
                        .await
                        .map_err(|e| anyhow!("parse task failed: {}", e))??;
                let written = store.replace_file(&record, &parsed.documents).await?;
                Ok::<usize, BuildError>(written)
            }
            .await;
            (path, result)
        });
    }

    let mut done = 0u64;
    while let Some(joined) = tasks.join_next().await {
        let (path, result) = joined.map_err(|e| anyhow!("parse task panicked: {}", e))?;
        done += 1;
        match result {
            Ok(written) => {
                report.files_parsed += 1;
                report.chunks_written += written;
                tracing::debug!(path = %path, chunks = written, "file parsed");
            }
            Err(BuildError::Parse { path, reason }) => {
                tracing::warn!(path = %path, reason = %reason, "skipping file");
                report.parse_failures.push(FileFailure { path, reason });
            }
            Err(fatal) => {
                tasks.abort_all();
                return Err(fatal);
            }
        }
        progress.report(BuildProgressEvent::Parsing { n: done, total });
    }
    report.parse_failures.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(())
}

fn backoff(base_ms: u64, attempt: u32) -> Duration {
    Duration::from_millis(base_ms.saturating_mul(1 << (attempt - 1).min(MAX_BACKOFF_SHIFT)))
}

/// Embed one batch with retries. The returned vectors are checked against
/// the batch length and the provider's dimensionality.
async fn embed_batch(
    embedder: &dyn EmbeddingProvider,
    texts: &[String],
    settings: &BuildSettings,
) -> std::result::Result<Vec<Vec<f32>>, (u32, anyhow::Error)> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = embedder.embed(texts).await.and_then(|vectors| {
            if vectors.len() != texts.len() {
                return Err(anyhow!(
                    "provider returned {} vectors for {} texts",
                    vectors.len(),
                    texts.len()
                ));
            }
            if let Some(v) = vectors.iter().find(|v| v.len() != embedder.dims()) {
                return Err(anyhow!(
                    "provider returned a {}-dim vector, expected {}",
                    v.len(),
                    embedder.dims()
                ));
            }
            Ok(vectors)
        });
        match result {
            Ok(vectors) => return Ok(vectors),
            Err(e) if attempt > settings.max_retries => return Err((attempt, e)),
            Err(e) => {
                let delay = backoff(settings.backoff_base_ms, attempt);
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %format!("{:#}", e),
                    "embedding batch failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Returns whether the run stopped because `limit` was reached.
async fn vectorize(
    store: &dyn Store,
    embedder: &dyn EmbeddingProvider,
    settings: &BuildSettings,
    progress: &dyn BuildProgressReporter,
    shutdown: &AtomicBool,
    report: &mut BuildReport,
) -> Result<bool, BuildError> {
    let total_missing = store.count_missing_vectors().await?;
    let total = match settings.limit {
        Some(limit) => total_missing.min(limit as i64),
        None => total_missing,
    } as u64;
    if total_missing == 0 {
        return Ok(false);
    }

    let mut cursor = store.get_checkpoint(VECTORIZE_CHECKPOINT).await?.unwrap_or(0);
    let mut rescanned = cursor == 0;

    loop {
        if shutdown.load(Ordering::SeqCst) {
            report.interrupted = true;
            return Ok(false);
        }
        let take = match settings.limit {
            Some(limit) if report.vectors_written >= limit => return Ok(true),
            Some(limit) => settings.batch_size.min(limit - report.vectors_written),
            None => settings.batch_size,
        };

        let batch = store.missing_vectors(cursor, take).await?;
        if batch.is_empty() {
            // Chunks below the checkpoint can lack vectors after a failed
            // batch was superseded by a re-parse; sweep once from the start.
            if !rescanned && store.count_missing_vectors().await? > 0 {
                rescanned = true;
                cursor = 0;
                continue;
            }
            return Ok(false);
        }

        let first_chunk_id = batch[0].id;
        let last_chunk_id = batch[batch.len() - 1].id;
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = embed_batch(embedder, &texts, settings)
            .await
            .map_err(|(attempts, source)| BuildError::EmbeddingBatch {
                first_chunk_id,
                attempts,
                source,
            })?;

        let records: Vec<VectorRecord> = batch
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| VectorRecord {
                chunk_id: chunk.id,
                vector,
            })
            .collect();
        store
            .save_vectors(&records, embedder.model_name(), last_chunk_id)
            .await?;
        cursor = last_chunk_id;
        report.vectors_written += records.len();
        progress.report(BuildProgressEvent::Vectorizing {
            n: (report.vectors_written as u64).min(total),
            total,
        });
    }
}

async fn reindex_needed(pipeline: &Pipeline, report: &BuildReport) -> Result<bool, BuildError> {
    if report.vectors_written > 0 {
        return Ok(true);
    }
    if pipeline.store.get_checkpoint(REINDEX_PENDING).await? == Some(1) {
        return Ok(true);
    }
    if !pipeline.lexical.is_built().await? {
        return Ok(true);
    }
    if pipeline.embedder.is_some() && !pipeline.semantic.is_built().await? {
        return Ok(true);
    }
    Ok(false)
}

/// Rebuild both indices from storage. On failure the previous indices stay
/// live and `reindex_pending` stays set for the next run.
async fn reindex(pipeline: &Pipeline) -> Result<(), BuildError> {
    pipeline.store.set_checkpoint(REINDEX_PENDING, 1).await?;

    if pipeline.embedder.is_some() {
        let vectors = pipeline.store.all_vectors().await?;
        let n = vectors.len();
        pipeline
            .semantic
            .rebuild(vectors)
            .await
            .map_err(BuildError::IndexRebuild)?;
        tracing::info!(vectors = n, "semantic index rebuilt");
    }

    let texts = pipeline.store.all_chunk_texts().await?;
    let n = texts.len();
    pipeline
        .lexical
        .rebuild(texts)
        .await
        .map_err(BuildError::IndexRebuild)?;
    tracing::info!(chunks = n, "lexical index rebuilt");

    pipeline.store.set_checkpoint(REINDEX_PENDING, 0).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff(1000, 1), Duration::from_millis(1000));
        assert_eq!(backoff(1000, 2), Duration::from_millis(2000));
        assert_eq!(backoff(1000, 4), Duration::from_millis(8000));
        assert_eq!(backoff(1000, 6), Duration::from_millis(32000));
        assert_eq!(backoff(1000, 12), Duration::from_millis(32000));
    }

    #[test]
    fn same_path_shares_one_lock() {
        let locks = DocumentLocks::default();
        let a = locks.lock_for("甲法.md").unwrap();
        let b = locks.lock_for("甲法.md").unwrap();
        let c = locks.lock_for("乙法.md").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn writers_of_one_document_are_serialized() {
        use std::sync::atomic::AtomicUsize;

        let locks = Arc::new(DocumentLocks::default());
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = JoinSet::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            tasks.spawn(async move {
                let lock = locks.lock_for("甲法.md").unwrap();
                let _guard = lock.lock().await;
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn other_documents_are_not_blocked() {
        let locks = DocumentLocks::default();
        let held = locks.lock_for("甲法.md").unwrap();
        let _guard = held.lock().await;

        let other = locks.lock_for("乙法.md").unwrap();
        assert!(other.try_lock().is_ok());
        let same = locks.lock_for("甲法.md").unwrap();
        assert!(same.try_lock().is_err());
    }
}
