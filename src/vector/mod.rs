//! Semantic document index.
//!
//! Documents live in an append-only record store; an IVF (inverted file)
//! partition index over their vectors is rebuilt in the background and
//! swapped in atomically as immutable generations, so queries and inserts
//! proceed while a rebuild runs.
//!
//! # Architecture
//! - [`RecordStore`]: canonical id -> document mapping, cheap snapshots
//! - [`IndexBuilder`]: seeded K-means over a snapshot, full assignment, publish
//! - [`GenerationCell`]: the current [`IndexGeneration`] behind an `ArcSwap`,
//!   saved to an [`IndexFile`] on every publish for durable collections
//! - [`QueryEngine`]: nprobe nearest clusters, posting scan, top-k selection
//! - [`IngestPipeline`]: batch embed + append, background rebuild worker
//!
//! Distances are squared Euclidean throughout; smaller is closer.

mod builder;
mod clustering;
mod embedding;
mod engine;
mod generation;
mod index_file;
mod pipeline;
mod storage;
mod store;
mod types;

// Re-export core types for public API
pub use builder::{BuildParams, IndexBuilder};
pub use clustering::{
    ClusteringError, KMeansParams, KMeansResult, assign_to_nearest_centroid, kmeans_clustering,
    squared_euclidean,
};
#[cfg(test)]
pub use embedding::MockEmbeddingGenerator;
pub use embedding::{EmbeddingGenerator, FastEmbedGenerator, parse_embedding_model};
pub use engine::{QueryEngine, Searcher};
pub use generation::{
    Centroid, GenerationCell, GenerationSink, IndexGeneration, PostingList, SnapshotMarker,
};
pub use index_file::IndexFile;
pub use pipeline::{
    DEFAULT_REBUILD_EVERY, IngestFailure, IngestItem, IngestPipeline, IngestReport, RebuildPolicy,
};
pub use storage::{RecordLog, VectorStorageError};
pub use store::{Document, NullSink, RecordSink, RecordStore, StoreSnapshot};
pub use types::{
    ClusterId, DocumentField, DocumentId, MAX_CONTENT_BYTES, MAX_TITLE_BYTES, SearchHit,
    VECTOR_DIMENSION_384, VectorDimension, VectorError,
};
