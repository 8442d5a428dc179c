//! Semantic document index.
//!
//! Short documents are embedded into fixed-dimension vectors, stored in an
//! append-only record store and indexed by an IVF partition index that is
//! rebuilt in the background and swapped in atomically. Queries keep running
//! against the current index generation while inserts and rebuilds proceed.
//!
//! The [`Collection`] handle wires the pieces together; the [`vector`]
//! module exposes them individually.

pub mod collection;
pub mod config;
pub mod display;
pub mod error;
pub mod vector;

// Explicit exports for better API clarity
pub use collection::{Collection, CollectionStats, QueryMatch, UploadRow, UploadSummary};
pub use config::Settings;
pub use error::{SemdexError, SemdexResult};
pub use vector::{
    Document, DocumentId, EmbeddingGenerator, IndexGeneration, IngestItem, IngestReport,
    SearchHit, VectorDimension, VectorError,
};
