//! Type-safe wrappers and core types for the document vector index.
//!
//! Newtypes keep document ids, cluster ids and dimensions from being mixed
//! up with plain integers. All record-shape limits live here so that every
//! component validates against the same constants.

use std::num::NonZeroU64;
use thiserror::Error;

/// Standard vector dimension for document embeddings (all-MiniLM-L6-v2 model).
pub const VECTOR_DIMENSION_384: usize = 384;

/// Maximum byte length of a document title.
pub const MAX_TITLE_BYTES: usize = 512;

/// Maximum byte length of a document body.
pub const MAX_CONTENT_BYTES: usize = 1024;

/// Type-safe wrapper for document IDs.
///
/// Uses `NonZeroU64` internally: ids start at 1 and zero never names a
/// stored document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(NonZeroU64);

impl DocumentId {
    /// Creates a new `DocumentId` from a non-zero u64.
    ///
    /// Returns `None` if the provided ID is zero.
    #[must_use]
    pub fn new(id: u64) -> Option<Self> {
        NonZeroU64::new(id).map(Self)
    }

    /// Creates a new `DocumentId` from a non-zero u64, panicking if zero.
    ///
    /// # Panics
    /// Panics if `id` is zero. Use `new()` for fallible construction.
    #[must_use]
    pub fn new_unchecked(id: u64) -> Self {
        Self(NonZeroU64::new(id).expect("DocumentId cannot be zero"))
    }

    /// Returns the underlying u64 value.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.0.get()
    }

    /// Position of this document in the store's dense record table.
    #[must_use]
    pub(crate) fn slot(&self) -> usize {
        (self.0.get() - 1) as usize
    }

    /// Converts to little-endian bytes for storage.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 8] {
        self.0.get().to_le_bytes()
    }

    /// Creates from little-endian bytes.
    ///
    /// Returns `None` if the bytes represent zero.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 8]) -> Option<Self> {
        Self::new(u64::from_le_bytes(bytes))
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a cluster inside one index generation.
///
/// Cluster ids are dense, `0..nlist`, and double as the index of the
/// cluster's centroid and posting list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClusterId(u32);

impl ClusterId {
    /// Creates a new `ClusterId`.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the underlying u32 value.
    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0
    }

    /// Returns the id as a table index.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for ClusterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Type-safe wrapper for vector dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorDimension(usize);

impl VectorDimension {
    /// Creates a new `VectorDimension` with validation.
    ///
    /// Returns an error if the dimension is zero.
    pub fn new(dim: usize) -> Result<Self, VectorError> {
        if dim == 0 {
            return Err(VectorError::InvalidDimension {
                dimension: 0,
                reason: "Vector dimension cannot be zero",
            });
        }
        Ok(Self(dim))
    }

    /// Creates a standard 384-dimensional vector dimension.
    #[must_use]
    pub const fn dimension_384() -> Self {
        Self(VECTOR_DIMENSION_384)
    }

    /// Returns the underlying dimension value.
    #[must_use]
    pub const fn get(&self) -> usize {
        self.0
    }

    /// Validates that a vector has the expected dimension and only finite
    /// components.
    pub fn validate_vector(&self, vector: &[f32]) -> Result<(), VectorError> {
        if vector.len() != self.0 {
            return Err(VectorError::DimensionMismatch {
                expected: self.0,
                actual: vector.len(),
            });
        }
        if let Some(index) = vector.iter().position(|v| !v.is_finite()) {
            return Err(VectorError::NonFiniteComponent {
                index,
                value: vector[index],
            });
        }
        Ok(())
    }
}

impl Default for VectorDimension {
    fn default() -> Self {
        Self::dimension_384()
    }
}

/// Which document field violated its length limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentField {
    Title,
    Content,
}

impl DocumentField {
    /// Byte limit for this field.
    #[must_use]
    pub const fn max_bytes(&self) -> usize {
        match self {
            Self::Title => MAX_TITLE_BYTES,
            Self::Content => MAX_CONTENT_BYTES,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Content => "content",
        }
    }
}

impl std::fmt::Display for DocumentField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A document search hit: id plus squared Euclidean distance to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    pub id: DocumentId,
    pub distance: f32,
}

impl SearchHit {
    #[must_use]
    pub fn new(id: DocumentId, distance: f32) -> Self {
        Self { id, distance }
    }
}

impl Eq for SearchHit {}

impl PartialOrd for SearchHit {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Orders by distance, then by id. `total_cmp` keeps the order total even
/// if a NaN distance slips through.
impl Ord for SearchHit {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Errors that can occur during vector index operations.
///
/// All error messages include actionable suggestions for resolution.
#[derive(Error, Debug)]
pub enum VectorError {
    #[error(
        "Vector dimension mismatch: expected {expected}, got {actual}\nSuggestion: Ensure all vectors use the same embedding model"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error(
        "Vector component {index} is not finite ({value})\nSuggestion: Check the embedding model output; NaN and infinite values cannot be indexed"
    )]
    NonFiniteComponent { index: usize, value: f32 },

    #[error(
        "Field '{field}' is too long: {actual} bytes (max {max})\nSuggestion: Shorten the field before ingesting; values are never truncated"
    )]
    FieldTooLong {
        field: DocumentField,
        max: usize,
        actual: usize,
    },

    #[error("Document not found: ID {0}\nSuggestion: Verify the document was ingested")]
    NotFound(u64),

    #[error(
        "Embedding unavailable: {0}\nSuggestion: Verify the embedding model is properly initialized"
    )]
    EmbeddingUnavailable(String),

    #[error("Index build was cancelled\nSuggestion: The previous index generation is still current")]
    BuildCancelled,

    #[error("Search was cancelled")]
    QueryCancelled,

    #[error("Invalid vector dimension: {dimension}\nReason: {reason}")]
    InvalidDimension {
        dimension: usize,
        reason: &'static str,
    },

    #[error(
        "Refusing to publish generation {attempted}: current generation is {current}\nSuggestion: Rebuild from a fresh snapshot"
    )]
    StaleGeneration { current: u64, attempted: u64 },

    #[error(
        "Clustering failed: {0}\nSuggestion: Ensure the snapshot holds valid vectors of one dimension"
    )]
    ClusteringFailed(String),

    #[error("Persistence failed: {0}\nSuggestion: Check disk space and file permissions")]
    Persistence(String),
}

impl VectorError {
    /// Shorthand for a field length violation.
    pub(crate) fn field_too_long(field: DocumentField, actual: usize) -> Self {
        Self::FieldTooLong {
            field,
            max: field.max_bytes(),
            actual,
        }
    }
}
