//! Error types for the semantic document index
//!
//! `VectorError` (in `vector::types`) is the core taxonomy; this module wraps
//! it together with configuration, storage and I/O failures into the
//! crate-level `SemdexError` used by the collection facade and the CLI.

use std::path::PathBuf;
use thiserror::Error;

use crate::vector::{VectorError, VectorStorageError};

/// Main error type for collection operations
#[derive(Error, Debug)]
pub enum SemdexError {
    /// Configuration errors
    #[error("Failed to load configuration: {0}")]
    ConfigLoad(#[from] Box<figment::Error>),

    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    /// File system errors
    #[error("Failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Record log errors
    #[error("Failed to open record log in '{path}': {source}")]
    Storage {
        path: PathBuf,
        source: VectorStorageError,
    },

    /// Index, ingestion and query errors
    #[error(transparent)]
    Vector(#[from] VectorError),

    #[error("Failed to start background rebuild worker: {0}")]
    WorkerSpawn(std::io::Error),
}

impl SemdexError {
    /// Get a stable status code for this error type.
    ///
    /// Returns a string identifier that can be used in JSON responses
    /// for programmatic error handling.
    pub fn status_code(&self) -> String {
        match self {
            Self::ConfigLoad(_) => "CONFIG_LOAD_ERROR",
            Self::InvalidConfig { .. } => "CONFIG_ERROR",
            Self::FileRead { .. } => "FILE_READ_ERROR",
            Self::Storage { .. } => "STORAGE_ERROR",
            Self::Vector(e) => match e {
                VectorError::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
                VectorError::NonFiniteComponent { .. } => "NON_FINITE_VECTOR",
                VectorError::FieldTooLong { .. } => "FIELD_TOO_LONG",
                VectorError::NotFound(_) => "NOT_FOUND",
                VectorError::EmbeddingUnavailable(_) => "EMBEDDING_UNAVAILABLE",
                VectorError::BuildCancelled => "BUILD_CANCELLED",
                VectorError::QueryCancelled => "QUERY_CANCELLED",
                VectorError::InvalidDimension { .. } => "INVALID_DIMENSION",
                VectorError::StaleGeneration { .. } => "STALE_GENERATION",
                VectorError::ClusteringFailed(_) => "CLUSTERING_FAILED",
                VectorError::Persistence(_) => "PERSISTENCE_ERROR",
            },
            Self::WorkerSpawn(_) => "WORKER_SPAWN_ERROR",
        }
        .to_string()
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::ConfigLoad(_) | Self::InvalidConfig { .. } => vec![
                "Check .semdex/settings.toml and SEMDEX_* environment variables",
                "Run 'semdex init --force' to regenerate the default configuration",
            ],
            Self::Storage { .. } => vec![
                "Check disk space and permissions in the data directory",
                "A corrupted record log can be moved aside; documents must then be re-ingested",
            ],
            Self::FileRead { .. } => vec![
                "Check that the file exists and you have read permissions",
                "Ensure the file is not locked by another process",
            ],
            Self::Vector(VectorError::DimensionMismatch { .. }) => vec![
                "Ensure index.dimension matches the embedding model (384 for AllMiniLML6V2)",
            ],
            Self::Vector(VectorError::NonFiniteComponent { .. }) => vec![
                "The embedding model produced NaN or infinite values",
                "Check the input text and the configured embedding.model",
            ],
            Self::Vector(VectorError::FieldTooLong { .. }) => vec![
                "Titles are limited to 512 bytes and content to 1024 bytes",
                "Split long documents before ingesting them",
            ],
            Self::Vector(VectorError::EmbeddingUnavailable(_)) => vec![
                "Check the internet connection for the first model download",
                "Verify embedding.model names a supported model",
            ],
            Self::Vector(VectorError::BuildCancelled) => vec![
                "The previous index generation is still current",
                "Run 'semdex build' to rebuild the index",
            ],
            _ => vec![],
        }
    }
}

/// Result type alias for collection operations
pub type SemdexResult<T> = Result<T, SemdexError>;
