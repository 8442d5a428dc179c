//! Immutable index generations and the cell that publishes them.
//!
//! A generation is one complete build of the partition index: centroids plus
//! one posting list per cluster. Generations never change after
//! construction. The [`GenerationCell`] holds the current one behind an
//! `ArcSwap`, so readers load it without locking and keep whatever
//! generation they loaded alive for as long as they hold the `Arc`.

use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::vector::types::{ClusterId, DocumentId, VectorError};

/// Cluster centre inside one generation.
#[derive(Debug, Clone, PartialEq)]
pub struct Centroid {
    pub cluster_id: ClusterId,
    pub center: Vec<f32>,
}

/// Documents assigned to one cluster, in ascending id order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostingList {
    pub cluster_id: ClusterId,
    pub members: Vec<DocumentId>,
}

impl PostingList {
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Point-in-time cut of the record store a generation was built from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotMarker {
    /// Number of documents in the snapshot.
    pub document_count: usize,
    /// Highest document id in the snapshot, `None` for an empty store.
    pub last_id: Option<DocumentId>,
}

impl SnapshotMarker {
    /// Whether `id` was part of the snapshot.
    #[must_use]
    pub fn covers(&self, id: DocumentId) -> bool {
        self.last_id.is_some_and(|last| id <= last)
    }
}

/// One complete, immutable build of the partition index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexGeneration {
    version: u64,
    centroids: Vec<Centroid>,
    postings: Vec<PostingList>,
    built_from: SnapshotMarker,
    /// Lloyd iterations the build ran, zero for empty generations.
    iterations: usize,
}

impl IndexGeneration {
    /// The generation every collection starts with: version 0, no clusters.
    #[must_use]
    pub fn initial() -> Self {
        Self::empty(0, SnapshotMarker::default())
    }

    /// An empty generation, built from an empty snapshot.
    #[must_use]
    pub fn empty(version: u64, built_from: SnapshotMarker) -> Self {
        Self {
            version,
            centroids: Vec::new(),
            postings: Vec::new(),
            built_from,
            iterations: 0,
        }
    }

    /// Assembles a generation from centroids and per-document assignments.
    ///
    /// `assignments` is in snapshot (ascending id) order, so every posting
    /// list comes out sorted.
    pub(crate) fn from_assignments(
        version: u64,
        centers: Vec<Vec<f32>>,
        assignments: impl IntoIterator<Item = (DocumentId, ClusterId)>,
        built_from: SnapshotMarker,
        iterations: usize,
    ) -> Self {
        let mut postings: Vec<PostingList> = (0..centers.len())
            .map(|c| PostingList {
                cluster_id: ClusterId::new(c as u32),
                members: Vec::new(),
            })
            .collect();

        for (id, cluster) in assignments {
            postings[cluster.index()].members.push(id);
        }

        let centroids = centers
            .into_iter()
            .enumerate()
            .map(|(c, center)| Centroid {
                cluster_id: ClusterId::new(c as u32),
                center,
            })
            .collect();

        Self {
            version,
            centroids,
            postings,
            built_from,
            iterations,
        }
    }

    /// Returns a copy carrying a different version number.
    #[must_use]
    pub(crate) fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// True when the generation has no clusters; searches return nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.centroids.is_empty()
    }

    #[must_use]
    pub fn centroids(&self) -> &[Centroid] {
        &self.centroids
    }

    #[must_use]
    pub fn postings(&self) -> &[PostingList] {
        &self.postings
    }

    #[must_use]
    pub fn posting(&self, cluster: ClusterId) -> Option<&PostingList> {
        self.postings.get(cluster.index())
    }

    #[must_use]
    pub fn built_from(&self) -> SnapshotMarker {
        self.built_from
    }

    #[must_use]
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    #[must_use]
    pub fn nlist(&self) -> usize {
        self.centroids.len()
    }

    /// Total number of indexed documents across all posting lists.
    #[must_use]
    pub fn indexed_count(&self) -> usize {
        self.postings.iter().map(PostingList::len).sum()
    }

}

/// Persistence hook invoked for every published generation, in version order.
///
/// Called while the cell's publish lock is held. A failure is logged and the
/// generation is published anyway; it only lives in memory until the next
/// successful publish.
pub trait GenerationSink: Send + Sync {
    fn persist(&self, generation: &IndexGeneration) -> Result<(), VectorError>;
}

/// Holder of the single "current generation" pointer.
///
/// Loads are wait-free. Publishing is serialized and only accepts strictly
/// newer versions, so a reader never sees the version go backwards.
pub struct GenerationCell {
    current: ArcSwap<IndexGeneration>,
    publish_lock: Mutex<()>,
    sink: Option<Box<dyn GenerationSink>>,
}

impl std::fmt::Debug for GenerationCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationCell")
            .field("version", &self.version())
            .field("persistent", &self.sink.is_some())
            .finish()
    }
}

impl Default for GenerationCell {
    fn default() -> Self {
        Self::new()
    }
}

impl GenerationCell {
    /// Creates a cell holding the initial empty generation.
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(IndexGeneration::initial()),
            publish_lock: Mutex::new(()),
            sink: None,
        }
    }

    /// Creates a cell that hands every published generation to `sink`.
    #[must_use]
    pub fn with_sink(sink: impl GenerationSink + 'static) -> Self {
        Self {
            sink: Some(Box::new(sink)),
            ..Self::new()
        }
    }

    /// Returns the current generation.
    #[must_use]
    pub fn load(&self) -> Arc<IndexGeneration> {
        self.current.load_full()
    }

    /// Version of the current generation.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.current.load().version()
    }

    /// Installs a previously persisted generation without persisting it again.
    ///
    /// Fails with `StaleGeneration` if `generation` is not newer than the
    /// current one; the current generation is left in place.
    pub(crate) fn restore(
        &self,
        generation: IndexGeneration,
    ) -> Result<Arc<IndexGeneration>, VectorError> {
        let _guard = self.publish_lock.lock();
        let current = self.current.load().version();
        if generation.version() <= current {
            return Err(VectorError::StaleGeneration {
                current,
                attempted: generation.version(),
            });
        }
        let generation = Arc::new(generation);
        self.current.store(Arc::clone(&generation));
        Ok(generation)
    }

    /// Publishes `generation` under the next free version number.
    pub(crate) fn publish_next(&self, generation: IndexGeneration) -> Arc<IndexGeneration> {
        let _guard = self.publish_lock.lock();
        let version = self.current.load().version() + 1;
        let generation = Arc::new(generation.with_version(version));
        if let Some(sink) = &self.sink {
            if let Err(e) = sink.persist(&generation) {
                tracing::warn!("generation {version} was published but not saved: {e}");
            }
        }
        self.current.store(Arc::clone(&generation));
        generation
    }
}
