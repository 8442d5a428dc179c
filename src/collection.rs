//! Collection facade: one explicit handle per document collection.
//!
//! A [`Collection`] owns the record store, the generation cell, the index
//! builder, the query engine and the ingestion pipeline, and exposes the two
//! entry points the outside world uses: [`Collection::upload`] for title and
//! content rows, and [`Collection::query`] for free-text search.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::error::{SemdexError, SemdexResult};
use crate::vector::{
    BuildParams, Document, DocumentId, EmbeddingGenerator, GenerationCell, IndexBuilder,
    IndexFile, IndexGeneration, IngestFailure, IngestItem, IngestPipeline, QueryEngine,
    RebuildPolicy, RecordLog, RecordStore, SearchHit, VectorDimension, VectorError,
};

/// One uploaded row. The content is what gets embedded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRow {
    pub title: String,
    pub content: String,
}

impl UploadRow {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
        }
    }
}

/// Result of an upload: ids of stored rows plus per-row failures.
#[derive(Debug, Default)]
pub struct UploadSummary {
    pub inserted: Vec<DocumentId>,
    pub errors: Vec<IngestFailure>,
}

/// A query result with its document resolved.
#[derive(Debug, Clone)]
pub struct QueryMatch {
    pub document: Arc<Document>,
    /// Squared Euclidean distance to the query; smaller is closer.
    pub distance: f32,
}

/// Point-in-time statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionStats {
    pub documents: usize,
    pub generation: u64,
    pub indexed: usize,
    pub pending: usize,
    pub clusters: usize,
    pub build_iterations: usize,
    pub nprobe: usize,
    pub search_pending: bool,
    pub log_bytes: Option<u64>,
    pub index_bytes: Option<u64>,
}

pub struct Collection {
    store: Arc<RecordStore>,
    generations: Arc<GenerationCell>,
    engine: QueryEngine,
    pipeline: IngestPipeline,
    embedder: Arc<dyn EmbeddingGenerator>,
    log: Option<Arc<RecordLog>>,
    index_file: Option<IndexFile>,
    nprobe: usize,
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("store", &self.store)
            .field("generation", &self.generations.version())
            .field("pipeline", &self.pipeline)
            .field("log", &self.log.as_ref().map(|log| log.path().to_path_buf()))
            .finish()
    }
}

impl Collection {
    /// Opens (or creates) the persistent collection under `settings.data_path`.
    ///
    /// Documents already in the record log are restored together with the
    /// last published index generation, so queries work without a rebuild.
    /// Documents appended after that generation was built stay pending until
    /// the next rebuild.
    pub fn open(settings: &Settings, embedder: Arc<dyn EmbeddingGenerator>) -> SemdexResult<Self> {
        let dimension = check_settings(settings, embedder.as_ref())?;

        let data_dir = data_dir(settings);
        let (log, documents) =
            RecordLog::open_or_create(&data_dir, dimension).map_err(|source| {
                SemdexError::Storage {
                    path: data_dir.clone(),
                    source,
                }
            })?;

        let restored = documents.len();
        let log = Arc::new(log);
        let store = RecordStore::restore(dimension, documents, Arc::clone(&log))?;

        let index_file = IndexFile::new(&data_dir, dimension);
        let generations = GenerationCell::with_sink(index_file.clone());
        if let Some(generation) = load_generation(&index_file, restored) {
            let generation = generations.restore(generation)?;
            tracing::debug!(
                "restored index generation {} covering {} documents",
                generation.version(),
                generation.indexed_count()
            );
        }
        tracing::info!(
            "opened collection in {} with {restored} documents (index generation {})",
            data_dir.display(),
            generations.version()
        );

        Self::assemble(settings, store, generations, embedder, Some((log, index_file)))
    }

    /// Creates a collection that keeps everything in memory.
    pub fn in_memory(
        settings: &Settings,
        embedder: Arc<dyn EmbeddingGenerator>,
    ) -> SemdexResult<Self> {
        let dimension = check_settings(settings, embedder.as_ref())?;
        Self::assemble(
            settings,
            RecordStore::new(dimension),
            GenerationCell::new(),
            embedder,
            None,
        )
    }

    fn assemble(
        settings: &Settings,
        store: RecordStore,
        generations: GenerationCell,
        embedder: Arc<dyn EmbeddingGenerator>,
        files: Option<(Arc<RecordLog>, IndexFile)>,
    ) -> SemdexResult<Self> {
        let store = Arc::new(store);
        let generations = Arc::new(generations);
        let builder = Arc::new(IndexBuilder::with_threads(
            BuildParams::from(&settings.index),
            settings.index.parallel_threads.max(1),
        ));
        let engine = QueryEngine::new(
            Arc::clone(&store),
            Arc::clone(&generations),
            settings.index.search_pending,
        );
        let pipeline = IngestPipeline::new(
            Arc::clone(&store),
            Arc::clone(&generations),
            builder,
            Arc::clone(&embedder),
            RebuildPolicy {
                rebuild_every: settings.ingest.rebuild_every,
            },
        )
        .map_err(SemdexError::WorkerSpawn)?;

        let (log, index_file) = files.unzip();
        Ok(Self {
            store,
            generations,
            engine,
            pipeline,
            embedder,
            log,
            index_file,
            nprobe: settings.index.nprobe,
        })
    }

    /// Embeds and stores every row. Failures are reported per row.
    pub fn upload(&self, rows: Vec<UploadRow>) -> UploadSummary {
        let items = rows
            .into_iter()
            .map(|row| IngestItem::from_content(row.title, row.content))
            .collect();
        let report = self.pipeline.ingest_batch(items);
        UploadSummary {
            inserted: report.ids(),
            errors: report.failed,
        }
    }

    /// Embeds `text` and returns its `top_k` nearest documents.
    pub fn query(&self, text: &str, top_k: usize) -> SemdexResult<Vec<QueryMatch>> {
        self.query_with_nprobe(text, top_k, self.nprobe)
    }

    /// Like [`query`](Self::query) with an explicit `nprobe`.
    pub fn query_with_nprobe(
        &self,
        text: &str,
        top_k: usize,
        nprobe: usize,
    ) -> SemdexResult<Vec<QueryMatch>> {
        let vector = self.embedder.embed(text)?;
        let hits = self.engine.search(&vector, top_k, nprobe)?;
        self.resolve(hits)
    }

    /// Searches with a precomputed query vector.
    pub fn search_vector(
        &self,
        vector: &[f32],
        top_k: usize,
        nprobe: usize,
    ) -> Result<Vec<SearchHit>, VectorError> {
        self.engine.search(vector, top_k, nprobe)
    }

    /// Rebuilds the index on the calling thread.
    pub fn rebuild(&self) -> SemdexResult<Arc<IndexGeneration>> {
        Ok(self.pipeline.rebuild_now()?)
    }

    /// Queues a background rebuild.
    pub fn request_rebuild(&self) {
        self.pipeline.request_rebuild();
    }

    /// Rebuilds synchronously if any stored document is still pending or no
    /// generation was ever published.
    pub fn ensure_indexed(&self) -> SemdexResult<Arc<IndexGeneration>> {
        let current = self.generations.load();
        if current.built_from().document_count == self.store.len() && current.version() > 0 {
            return Ok(current);
        }
        self.rebuild()
    }

    pub fn get(&self, id: DocumentId) -> SemdexResult<Arc<Document>> {
        Ok(self.store.get(id)?)
    }

    #[must_use]
    pub fn generation(&self) -> Arc<IndexGeneration> {
        self.generations.load()
    }

    #[must_use]
    pub fn engine(&self) -> &QueryEngine {
        &self.engine
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Path of the record log, `None` for in-memory collections.
    #[must_use]
    pub fn log_path(&self) -> Option<PathBuf> {
        self.log.as_ref().map(|log| log.path().to_path_buf())
    }

    #[must_use]
    pub fn stats(&self) -> CollectionStats {
        let generation = self.generations.load();
        let documents = self.store.len();
        let built = generation.built_from().document_count;
        CollectionStats {
            documents,
            generation: generation.version(),
            indexed: generation.indexed_count(),
            pending: documents.saturating_sub(built),
            clusters: generation.nlist(),
            build_iterations: generation.iterations(),
            nprobe: self.nprobe,
            search_pending: self.engine.search_pending(),
            log_bytes: self.log.as_ref().and_then(|log| log.file_size().ok()),
            index_bytes: self.index_file.as_ref().and_then(IndexFile::file_size),
        }
    }

    /// Cancels any running build and stops the rebuild worker.
    pub fn shutdown(self) {
        self.pipeline.shutdown();
        tracing::debug!("collection shut down");
    }

    fn resolve(&self, hits: Vec<SearchHit>) -> SemdexResult<Vec<QueryMatch>> {
        hits.into_iter()
            .map(|hit| {
                Ok(QueryMatch {
                    document: self.store.get(hit.id)?,
                    distance: hit.distance,
                })
            })
            .collect()
    }
}

/// Validates settings and checks them against the embedding model.
fn check_settings(
    settings: &Settings,
    embedder: &dyn EmbeddingGenerator,
) -> SemdexResult<VectorDimension> {
    settings.validate()?;
    let dimension = VectorDimension::new(settings.index.dimension)?;
    if embedder.dimension() != dimension {
        return Err(SemdexError::InvalidConfig {
            field: "index.dimension",
            reason: format!(
                "embedding model produces {}-dimensional vectors, configured {}",
                embedder.dimension().get(),
                dimension.get()
            ),
        });
    }
    Ok(dimension)
}

/// Reads the saved generation, discarding it if it cannot describe the
/// restored documents. A discarded index is rebuilt on the next publish.
fn load_generation(index_file: &IndexFile, documents: usize) -> Option<IndexGeneration> {
    match index_file.load() {
        Ok(Some(generation)) if generation.built_from().document_count <= documents => {
            Some(generation)
        }
        Ok(Some(generation)) => {
            tracing::warn!(
                "ignoring {}: generation {} covers {} documents but only {documents} were restored",
                index_file.path().display(),
                generation.version(),
                generation.built_from().document_count
            );
            None
        }
        Ok(None) => None,
        Err(e) => {
            tracing::warn!("ignoring unreadable {}: {e}", index_file.path().display());
            None
        }
    }
}

/// Data directory a collection opened with `settings` would use.
#[must_use]
pub fn data_dir(settings: &Settings) -> PathBuf {
    Settings::resolve_path(&settings.data_path)
}
