//! Ingestion pipeline and background rebuild scheduling.
//!
//! A batch is embedded with one call to the embedding collaborator (falling
//! back to one call per item when the batch call fails, so failures can be
//! attributed) and appended item by item. Each item succeeds or fails on its
//! own; the report carries the batch position of every outcome.
//!
//! Rebuilds run on a dedicated worker thread fed by a bounded channel of
//! capacity one. A request made while another is already queued is dropped,
//! so ingestion never waits on the builder and bursts collapse into a single
//! rebuild that sees every document appended before it starts.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{Sender, TrySendError};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::vector::builder::IndexBuilder;
use crate::vector::embedding::EmbeddingGenerator;
use crate::vector::generation::{GenerationCell, IndexGeneration};
use crate::vector::store::RecordStore;
use crate::vector::types::{DocumentId, VectorError};

/// Default number of successful inserts between automatic rebuilds.
pub const DEFAULT_REBUILD_EVERY: usize = 1000;

/// One document to ingest. `text` is what gets embedded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestItem {
    pub title: String,
    pub content: String,
    pub text: String,
}

impl IngestItem {
    /// An item whose embedded text is its content.
    pub fn from_content(title: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            title: title.into(),
            text: content.clone(),
            content,
        }
    }
}

/// A rejected batch item.
#[derive(Debug)]
pub struct IngestFailure {
    /// Position of the item in the submitted batch.
    pub index: usize,
    pub error: VectorError,
}

/// Outcome of one batch, in batch order.
#[derive(Debug, Default)]
pub struct IngestReport {
    /// `(batch position, assigned id)` for every stored item.
    pub succeeded: Vec<(usize, DocumentId)>,
    pub failed: Vec<IngestFailure>,
}

impl IngestReport {
    #[must_use]
    pub fn ids(&self) -> Vec<DocumentId> {
        self.succeeded.iter().map(|(_, id)| *id).collect()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// When the pipeline asks for a rebuild on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildPolicy {
    /// Successful inserts between automatic rebuilds; zero disables them.
    pub rebuild_every: usize,
}

impl Default for RebuildPolicy {
    fn default() -> Self {
        Self {
            rebuild_every: DEFAULT_REBUILD_EVERY,
        }
    }
}

impl RebuildPolicy {
    #[must_use]
    pub fn manual() -> Self {
        Self { rebuild_every: 0 }
    }
}

struct RebuildWorker {
    requests: Sender<()>,
    handle: JoinHandle<()>,
}

/// Writes batches into the record store and keeps the index fresh.
pub struct IngestPipeline {
    store: Arc<RecordStore>,
    generations: Arc<GenerationCell>,
    builder: Arc<IndexBuilder>,
    embedder: Arc<dyn EmbeddingGenerator>,
    policy: RebuildPolicy,
    since_rebuild: AtomicUsize,
    cancel: CancellationToken,
    worker: Mutex<Option<RebuildWorker>>,
}

impl std::fmt::Debug for IngestPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestPipeline")
            .field("policy", &self.policy)
            .field("since_rebuild", &self.since_rebuild.load(Ordering::Relaxed))
            .field("running", &self.worker.lock().is_some())
            .finish()
    }
}

impl IngestPipeline {
    /// Creates the pipeline and starts its rebuild worker thread.
    ///
    /// # Errors
    /// Returns the I/O error if the worker thread cannot be spawned.
    pub fn new(
        store: Arc<RecordStore>,
        generations: Arc<GenerationCell>,
        builder: Arc<IndexBuilder>,
        embedder: Arc<dyn EmbeddingGenerator>,
        policy: RebuildPolicy,
    ) -> std::io::Result<Self> {
        let cancel = CancellationToken::new();
        let (requests, receiver) = crossbeam_channel::bounded::<()>(1);

        let handle = {
            let store = Arc::clone(&store);
            let generations = Arc::clone(&generations);
            let builder = Arc::clone(&builder);
            let cancel = cancel.clone();
            std::thread::Builder::new()
                .name("semdex-rebuild".to_string())
                .spawn(move || {
                    while receiver.recv().is_ok() {
                        if cancel.is_cancelled() {
                            break;
                        }
                        match builder.build_and_publish(&store, &generations, &cancel) {
                            Ok(_) => {}
                            Err(VectorError::BuildCancelled) => break,
                            Err(e) => tracing::error!("background index rebuild failed: {e}"),
                        }
                    }
                    tracing::debug!("rebuild worker stopped");
                })?
        };

        Ok(Self {
            store,
            generations,
            builder,
            embedder,
            policy,
            since_rebuild: AtomicUsize::new(0),
            cancel,
            worker: Mutex::new(Some(RebuildWorker { requests, handle })),
        })
    }

    #[must_use]
    pub fn policy(&self) -> RebuildPolicy {
        self.policy
    }

    /// Embeds and stores every item, reporting per-item outcomes.
    ///
    /// Never fails as a whole; an embedding outage shows up as one
    /// `EmbeddingUnavailable` failure per affected item.
    pub fn ingest_batch(&self, items: Vec<IngestItem>) -> IngestReport {
        let mut report = IngestReport::default();
        if items.is_empty() {
            return report;
        }

        let embeddings = self.embed_all(&items);
        for (index, (item, embedding)) in items.into_iter().zip(embeddings).enumerate() {
            let outcome = embedding
                .and_then(|vector| self.store.append(item.title, item.content, vector));
            match outcome {
                Ok(id) => report.succeeded.push((index, id)),
                Err(error) => {
                    tracing::warn!("ingest item {index} rejected: {error}");
                    report.failed.push(IngestFailure { index, error });
                }
            }
        }

        tracing::info!(
            "ingested {} of {} documents",
            report.succeeded.len(),
            report.succeeded.len() + report.failed.len()
        );
        self.note_inserted(report.succeeded.len());
        report
    }

    /// Queues a background rebuild. Returns immediately; a request already
    /// waiting absorbs this one.
    pub fn request_rebuild(&self) {
        let worker = self.worker.lock();
        let Some(worker) = worker.as_ref() else {
            tracing::debug!("rebuild requested after shutdown; ignored");
            return;
        };
        match worker.requests.try_send(()) {
            Ok(()) => tracing::debug!("rebuild queued"),
            Err(TrySendError::Full(())) => tracing::debug!("rebuild already queued"),
            Err(TrySendError::Disconnected(())) => {
                tracing::warn!("rebuild worker is gone; request dropped");
            }
        }
    }

    /// Rebuilds and publishes on the calling thread.
    pub fn rebuild_now(&self) -> Result<Arc<IndexGeneration>, VectorError> {
        self.since_rebuild.store(0, Ordering::Relaxed);
        self.builder
            .build_and_publish(&self.store, &self.generations, &self.cancel)
    }

    /// Cancels any in-flight build and joins the worker. Idempotent.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        let Some(RebuildWorker { requests, handle }) = self.worker.lock().take() else {
            return;
        };
        drop(requests);
        if handle.join().is_err() {
            tracing::error!("rebuild worker panicked");
        }
    }

    fn note_inserted(&self, inserted: usize) {
        let every = self.policy.rebuild_every;
        if every == 0 || inserted == 0 {
            return;
        }
        let total = self.since_rebuild.fetch_add(inserted, Ordering::AcqRel) + inserted;
        if total >= every
            && self
                .since_rebuild
                .compare_exchange(total, 0, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
        {
            self.request_rebuild();
        }
    }

    fn embed_all(&self, items: &[IngestItem]) -> Vec<Result<Vec<f32>, VectorError>> {
        let texts: Vec<&str> = items.iter().map(|item| item.text.as_str()).collect();
        match self.embedder.generate_embeddings(&texts) {
            Ok(vectors) if vectors.len() == texts.len() => vectors.into_iter().map(Ok).collect(),
            Ok(vectors) => {
                tracing::warn!(
                    "embedding batch returned {} vectors for {} texts; embedding one by one",
                    vectors.len(),
                    texts.len()
                );
                texts.iter().map(|text| self.embedder.embed(text)).collect()
            }
            Err(e) => {
                tracing::warn!("embedding batch failed ({e}); embedding one by one");
                texts.iter().map(|text| self.embedder.embed(text)).collect()
            }
        }
    }
}

impl Drop for IngestPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}
