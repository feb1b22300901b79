use crate::admission::{admit, AdmissionOutcome, EvictedDocument, MAX_BATCH_SIZE};
use crate::chunking::{split_document, ChunkerConfig};
use crate::dedup::filter_new_chunks;
use crate::error::IngestError;
use crate::extractor::PdfExtractor;
use crate::identity::assign_ids;
use crate::index::IndexGuard;
use crate::models::{Chunk, DocumentFingerprint, IndexSnapshot};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn digest_file(path: &Path) -> Result<String, IngestError> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn fingerprint_document(path: &Path) -> Result<DocumentFingerprint, IngestError> {
    let checksum = digest_file(path)?;
    let title = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            IngestError::MissingFileName(format!("path missing filename: {}", path.display()))
        })?;

    Ok(DocumentFingerprint {
        source: path.to_string_lossy().to_string(),
        title: title.to_string(),
        checksum,
        ingested_at: Utc::now(),
    })
}

#[derive(Debug, Clone)]
pub struct FailedDocument {
    pub source: String,
    pub reason: String,
}

/// Merged per-document results of one coordinated pass.
#[derive(Debug, Default)]
pub struct CoordinatorOutput {
    /// Documents that produced at least one not-yet-persisted chunk.
    pub per_document: BTreeMap<String, Vec<Chunk>>,
    /// Documents skipped because their source was already in the snapshot.
    pub skipped_sources: Vec<String>,
    /// Documents whose processing failed; they contributed zero chunks.
    pub failures: Vec<FailedDocument>,
}

/// Fans document processing out across a bounded pool of blocking workers.
///
/// Each document runs extract → split → assign ids → dedup-filter as one
/// independent task; a failing task is logged and contributes an empty chunk
/// list without aborting its siblings. The snapshot is shared read-only
/// across all tasks for the duration of the run.
pub struct IngestCoordinator<E> {
    extractor: Arc<E>,
    config: ChunkerConfig,
    workers: usize,
}

enum TaskOutcome {
    Known { source: String },
    Processed { source: String, chunks: Vec<Chunk> },
    Failed { source: String, reason: String },
}

impl<E> IngestCoordinator<E>
where
    E: PdfExtractor + Send + Sync + 'static,
{
    pub fn new(extractor: E, config: ChunkerConfig, workers: usize) -> Result<Self, IngestError> {
        config.validate()?;
        if workers == 0 {
            return Err(IngestError::InvalidArgument(
                "worker pool size must be positive".to_string(),
            ));
        }

        Ok(Self {
            extractor: Arc::new(extractor),
            config,
            workers,
        })
    }

    pub fn with_default_workers(extractor: E, config: ChunkerConfig) -> Result<Self, IngestError> {
        let workers = std::thread::available_parallelism()
            .map(|parallelism| parallelism.get())
            .unwrap_or(1);
        Self::new(extractor, config, workers)
    }

    pub async fn run(
        &self,
        documents: Vec<PathBuf>,
        snapshot: Arc<IndexSnapshot>,
    ) -> CoordinatorOutput {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks: JoinSet<TaskOutcome> = JoinSet::new();

        for path in documents {
            let semaphore = Arc::clone(&semaphore);
            let extractor = Arc::clone(&self.extractor);
            let snapshot = Arc::clone(&snapshot);
            let config = self.config;

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let source = path.to_string_lossy().to_string();

                // Document-level short-circuit: a known source never pays
                // the extraction or chunking cost.
                if snapshot.contains_source(&source) {
                    info!(source = %source, "document already ingested, skipping");
                    return TaskOutcome::Known { source };
                }

                let blocking = tokio::task::spawn_blocking(move || {
                    process_document(extractor.as_ref(), &path, &snapshot, config)
                })
                .await;

                match blocking {
                    Ok(Ok(chunks)) => TaskOutcome::Processed { source, chunks },
                    Ok(Err(reason)) => {
                        warn!(source = %source, reason = %reason, "document failed, contributing zero chunks");
                        TaskOutcome::Failed {
                            source,
                            reason: reason.to_string(),
                        }
                    }
                    Err(join_error) => {
                        warn!(source = %source, reason = %join_error, "document task panicked");
                        TaskOutcome::Failed {
                            source,
                            reason: join_error.to_string(),
                        }
                    }
                }
            });
        }

        let mut output = CoordinatorOutput::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(TaskOutcome::Known { source }) => output.skipped_sources.push(source),
                Ok(TaskOutcome::Processed { source, chunks }) => {
                    if !chunks.is_empty() {
                        output.per_document.insert(source, chunks);
                    }
                }
                Ok(TaskOutcome::Failed { source, reason }) => {
                    output.failures.push(FailedDocument { source, reason });
                }
                Err(join_error) => {
                    error!(reason = %join_error, "lost a document task");
                }
            }
        }

        output.skipped_sources.sort_unstable();
        output
    }
}

fn process_document<E: PdfExtractor>(
    extractor: &E,
    path: &Path,
    snapshot: &IndexSnapshot,
    config: ChunkerConfig,
) -> Result<Vec<Chunk>, IngestError> {
    let fingerprint = fingerprint_document(path)?;
    let pages = extractor.extract_pages(path)?;
    let chunks = assign_ids(split_document(&fingerprint, &pages, config));
    Ok(filter_new_chunks(chunks, snapshot))
}

/// Outcome of one full ingestion run.
#[derive(Debug)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub documents_seen: usize,
    pub already_ingested: usize,
    pub admitted_chunks: usize,
    pub evicted: Vec<EvictedDocument>,
    pub failures: Vec<FailedDocument>,
}

/// Runs one complete ingestion pass over `folder`.
///
/// The snapshot is captured once up front and never refreshed mid-run; the
/// caller must ensure at most one run is in flight at a time (the queue
/// worker below does). After a successful persist the guard's handle is
/// reloaded so queries observe the freshly written state atomically.
pub async fn run_ingestion<E>(
    folder: &Path,
    coordinator: &IngestCoordinator<E>,
    guard: &IndexGuard,
) -> Result<RunSummary, IngestError>
where
    E: PdfExtractor + Send + Sync + 'static,
{
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();

    let snapshot = Arc::new(guard.snapshot().await?);
    let documents = discover_pdf_files(folder);
    info!(
        %run_id,
        folder = %folder.display(),
        documents = documents.len(),
        known_sources = snapshot.sources.len(),
        "ingestion run started"
    );

    let documents_seen = documents.len();
    let output = coordinator.run(documents, snapshot).await;
    let already_ingested = output.skipped_sources.len();
    let failures = output.failures;

    let total_new: usize = output.per_document.values().map(Vec::len).sum();
    info!(%run_id, total_new, "collected new chunks across all documents");

    let AdmissionOutcome { admitted, evicted } = admit(output.per_document, MAX_BATCH_SIZE);
    let admitted_chunks: Vec<Chunk> = admitted.into_values().flatten().collect();

    if !admitted_chunks.is_empty() {
        guard.persist(&admitted_chunks).await?;
    }
    guard.reload().await?;

    let summary = RunSummary {
        run_id,
        started_at,
        finished_at: Utc::now(),
        documents_seen,
        already_ingested,
        admitted_chunks: admitted_chunks.len(),
        evicted,
        failures,
    };

    info!(
        %run_id,
        admitted = summary.admitted_chunks,
        evicted = summary.evicted.len(),
        failed = summary.failures.len(),
        already_ingested = summary.already_ingested,
        "ingestion run finished"
    );

    Ok(summary)
}

/// One queued request to re-scan the input directory.
#[derive(Debug, Clone)]
pub struct IngestJob {
    pub requested_at: DateTime<Utc>,
    pub reason: String,
}

impl IngestJob {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            requested_at: Utc::now(),
            reason: reason.into(),
        }
    }
}

/// Submission side of the ingestion work queue. Uploads enqueue a job and
/// return immediately; acceptance does not imply the run succeeded.
#[derive(Debug, Clone)]
pub struct IngestionQueue {
    sender: mpsc::Sender<IngestJob>,
}

impl IngestionQueue {
    pub fn new(depth: usize) -> (Self, mpsc::Receiver<IngestJob>) {
        let (sender, receiver) = mpsc::channel(depth.max(1));
        (Self { sender }, receiver)
    }

    pub fn submit(&self, job: IngestJob) -> Result<(), IngestError> {
        self.sender
            .try_send(job)
            .map_err(|rejected| IngestError::QueueRejected(rejected.to_string()))
    }
}

/// Consumes queued jobs one at a time, which is also what guarantees at most
/// one ingestion run in flight. Runs until the queue's senders are gone.
pub async fn run_ingestion_worker<E>(
    mut jobs: mpsc::Receiver<IngestJob>,
    folder: PathBuf,
    coordinator: IngestCoordinator<E>,
    guard: Arc<IndexGuard>,
) where
    E: PdfExtractor + Send + Sync + 'static,
{
    while let Some(job) = jobs.recv().await {
        info!(reason = %job.reason, requested_at = %job.requested_at.to_rfc3339(), "claimed ingestion job");
        match run_ingestion(&folder, &coordinator, &guard).await {
            Ok(summary) => info!(
                run_id = %summary.run_id,
                admitted = summary.admitted_chunks,
                "ingestion job complete"
            ),
            Err(reason) => error!(reason = %reason, "ingestion job failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashedEmbedder;
    use crate::error::IngestError;
    use crate::models::PageText;
    use crate::stores::MemoryIndex;
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::tempdir;

    /// Extractor serving canned pages per file name; files whose name
    /// contains "broken" fail to parse.
    #[derive(Clone)]
    struct FakeExtractor {
        pages_per_document: usize,
        chunks_per_page: usize,
    }

    impl PdfExtractor for FakeExtractor {
        fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
            let name = path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or_default();
            if name.contains("broken") {
                return Err(IngestError::PdfParse(format!("unreadable pdf: {name}")));
            }

            Ok((0..self.pages_per_document)
                .map(|page| PageText {
                    page: page as u32,
                    // Ten chars per chunk under a window of ten.
                    text: "abcdefghij".repeat(self.chunks_per_page),
                })
                .collect())
        }
    }

    fn no_overlap_config() -> ChunkerConfig {
        ChunkerConfig {
            window_chars: 10,
            overlap_chars: 0,
        }
    }

    fn write_pdfs(dir: &Path, names: &[&str]) {
        for name in names {
            File::create(dir.join(name))
                .and_then(|mut file| file.write_all(b"%PDF-1.4\n%fake"))
                .expect("write fixture pdf");
        }
    }

    fn guard_over_memory() -> Arc<IndexGuard> {
        let index = MemoryIndex::new(Arc::new(HashedEmbedder::default()));
        Arc::new(IndexGuard::with_handle(Box::new(index)))
    }

    #[test]
    fn discover_pdf_files_is_recursive_and_sorted() {
        let dir = tempdir().expect("tempdir");
        let nested = dir.path().join("nested");
        fs::create_dir(&nested).expect("create nested dir");
        write_pdfs(dir.path(), &["b.pdf", "a.pdf"]);
        write_pdfs(&nested, &["c.pdf"]);
        fs::write(dir.path().join("notes.txt"), b"not a pdf").expect("write txt");

        let files = discover_pdf_files(dir.path());

        assert_eq!(files.len(), 3);
        assert!(files[0].ends_with("a.pdf"));
        assert!(files.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[test]
    fn checksum_is_reproducible() {
        let dir = tempdir().expect("tempdir");
        let file_path = dir.path().join("a.pdf");
        fs::write(&file_path, b"abc").expect("write file");

        let first = digest_file(&file_path).expect("first digest");
        let second = digest_file(&file_path).expect("second digest");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn ids_follow_document_order_across_pages() {
        let dir = tempdir().expect("tempdir");
        write_pdfs(dir.path(), &["doc.pdf"]);
        let coordinator = IngestCoordinator::new(
            FakeExtractor {
                pages_per_document: 2,
                chunks_per_page: 3,
            },
            no_overlap_config(),
            2,
        )
        .expect("coordinator");

        let output = coordinator
            .run(discover_pdf_files(dir.path()), Arc::new(IndexSnapshot::default()))
            .await;

        let source = dir.path().join("doc.pdf").to_string_lossy().to_string();
        let ids: Vec<_> = output.per_document[&source]
            .iter()
            .map(|chunk| chunk.id.clone())
            .collect();
        let expected: Vec<_> = [(0, 0), (0, 1), (0, 2), (1, 0), (1, 1), (1, 2)]
            .iter()
            .map(|(page, sequence)| format!("{source}:{page}:{sequence}"))
            .collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn one_broken_document_does_not_abort_the_run() {
        let dir = tempdir().expect("tempdir");
        write_pdfs(dir.path(), &["good.pdf", "broken.pdf"]);
        let coordinator = IngestCoordinator::new(
            FakeExtractor {
                pages_per_document: 1,
                chunks_per_page: 2,
            },
            no_overlap_config(),
            2,
        )
        .expect("coordinator");

        let output = coordinator
            .run(discover_pdf_files(dir.path()), Arc::new(IndexSnapshot::default()))
            .await;

        assert_eq!(output.per_document.len(), 1);
        assert_eq!(output.failures.len(), 1);
        assert!(output.failures[0].source.ends_with("broken.pdf"));
        assert!(output.failures[0].reason.contains("unreadable"));
    }

    #[tokio::test]
    async fn known_sources_skip_without_chunking() {
        let dir = tempdir().expect("tempdir");
        write_pdfs(dir.path(), &["seen.pdf", "new.pdf"]);

        let mut snapshot = IndexSnapshot::default();
        snapshot
            .sources
            .insert(dir.path().join("seen.pdf").to_string_lossy().to_string());

        let coordinator = IngestCoordinator::new(
            FakeExtractor {
                pages_per_document: 1,
                chunks_per_page: 1,
            },
            no_overlap_config(),
            2,
        )
        .expect("coordinator");

        let output = coordinator
            .run(discover_pdf_files(dir.path()), Arc::new(snapshot))
            .await;

        assert_eq!(output.skipped_sources.len(), 1);
        assert!(output.skipped_sources[0].ends_with("seen.pdf"));
        assert_eq!(output.per_document.len(), 1);
    }

    #[tokio::test]
    async fn reingesting_an_unchanged_folder_admits_zero_chunks() {
        let dir = tempdir().expect("tempdir");
        write_pdfs(dir.path(), &["a.pdf", "b.pdf"]);
        let coordinator = IngestCoordinator::new(
            FakeExtractor {
                pages_per_document: 2,
                chunks_per_page: 2,
            },
            no_overlap_config(),
            2,
        )
        .expect("coordinator");
        let guard = guard_over_memory();

        let first = run_ingestion(dir.path(), &coordinator, &guard)
            .await
            .expect("first run");
        assert_eq!(first.admitted_chunks, 8);
        assert_eq!(first.already_ingested, 0);

        let second = run_ingestion(dir.path(), &coordinator, &guard)
            .await
            .expect("second run");
        assert_eq!(second.admitted_chunks, 0);
        // Every document takes the existing-sources skip path.
        assert_eq!(second.already_ingested, 2);
    }

    #[tokio::test]
    async fn queued_jobs_run_serially_through_the_worker() {
        let dir = tempdir().expect("tempdir");
        write_pdfs(dir.path(), &["doc.pdf"]);
        let coordinator = IngestCoordinator::new(
            FakeExtractor {
                pages_per_document: 1,
                chunks_per_page: 1,
            },
            no_overlap_config(),
            1,
        )
        .expect("coordinator");
        let guard = guard_over_memory();

        let (queue, receiver) = IngestionQueue::new(4);
        queue.submit(IngestJob::new("test")).expect("submit");
        queue.submit(IngestJob::new("test-again")).expect("submit");
        drop(queue);

        run_ingestion_worker(receiver, dir.path().to_path_buf(), coordinator, guard.clone())
            .await;

        let snapshot = guard.snapshot().await.expect("snapshot");
        assert_eq!(snapshot.ids.len(), 1);
        assert_eq!(snapshot.sources.len(), 1);
    }

    #[test]
    fn a_full_queue_rejects_submission() {
        let (queue, _receiver) = IngestionQueue::new(1);
        queue.submit(IngestJob::new("first")).expect("fits");

        let rejected = queue.submit(IngestJob::new("second"));
        assert!(matches!(rejected, Err(IngestError::QueueRejected(_))));
    }
}
