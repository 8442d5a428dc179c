//! Query engine over the current index generation.
//!
//! A search loads the current generation once, ranks its centroids against
//! the query, scans the posting lists of the `nprobe` nearest clusters and
//! keeps the `top_k` closest documents in a bounded max-heap. Readers never
//! block the builder: the loaded `Arc` keeps the generation alive for the
//! whole call even if a newer one is published meanwhile.

use std::collections::BinaryHeap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;

use crate::vector::clustering::squared_euclidean;
use crate::vector::generation::{GenerationCell, IndexGeneration};
use crate::vector::store::RecordStore;
use crate::vector::types::{ClusterId, DocumentId, SearchHit, VectorError};

/// Answers nearest-neighbor queries for one collection.
#[derive(Debug, Clone)]
pub struct QueryEngine {
    store: Arc<RecordStore>,
    generations: Arc<GenerationCell>,
    search_pending: bool,
}

impl QueryEngine {
    /// Creates an engine over `store` and the generations published to `generations`.
    ///
    /// With `search_pending` set, documents appended after the current
    /// generation was built are scanned exhaustively and merged in.
    #[must_use]
    pub fn new(
        store: Arc<RecordStore>,
        generations: Arc<GenerationCell>,
        search_pending: bool,
    ) -> Self {
        Self {
            store,
            generations,
            search_pending,
        }
    }

    #[must_use]
    pub fn search_pending(&self) -> bool {
        self.search_pending
    }

    /// Returns up to `top_k` hits, ascending by distance, ties by lower id.
    ///
    /// # Errors
    /// `DimensionMismatch` if the query length differs from the collection's
    /// dimension, `NonFiniteComponent` if it holds NaN or infinity; no
    /// scanning happens in either case.
    pub fn search(
        &self,
        query: &[f32],
        top_k: usize,
        nprobe: usize,
    ) -> Result<Vec<SearchHit>, VectorError> {
        let generation = self.generations.load();
        self.search_generation(&generation, query, top_k, nprobe, None)
    }

    /// Like [`search`](Self::search), checking `cancel` between cluster scans.
    ///
    /// # Errors
    /// `QueryCancelled` once the token fires, in addition to the errors of `search`.
    pub fn search_with_cancel(
        &self,
        query: &[f32],
        top_k: usize,
        nprobe: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchHit>, VectorError> {
        let generation = self.generations.load();
        self.search_generation(&generation, query, top_k, nprobe, Some(cancel))
    }

    /// Creates a handle that remembers the newest generation it has seen.
    #[must_use]
    pub fn searcher(&self) -> Searcher {
        Searcher {
            engine: self.clone(),
            last_version: AtomicU64::new(0),
        }
    }

    fn search_generation(
        &self,
        generation: &IndexGeneration,
        query: &[f32],
        top_k: usize,
        nprobe: usize,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<SearchHit>, VectorError> {
        self.store.dimension().validate_vector(query)?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let mut top = TopK::new(top_k);
        let is_cancelled = || cancel.is_some_and(CancellationToken::is_cancelled);

        if !generation.is_empty() {
            for cluster in nearest_clusters(generation, query, nprobe) {
                if is_cancelled() {
                    return Err(VectorError::QueryCancelled);
                }
                if let Some(posting) = generation.posting(cluster) {
                    self.store.for_each_vector(&posting.members, |id, vector| {
                        top.offer(id, squared_euclidean(query, vector));
                    });
                }
            }
        }

        if self.search_pending {
            if is_cancelled() {
                return Err(VectorError::QueryCancelled);
            }
            let pending = self.store.documents_after(generation.built_from());
            if !pending.is_empty() {
                tracing::debug!(
                    "scanning {} pending documents outside generation {}",
                    pending.len(),
                    generation.version()
                );
            }
            for document in pending {
                top.offer(document.id, squared_euclidean(query, &document.vector));
            }
        }

        Ok(top.into_sorted())
    }
}

/// Search handle whose observed generation version never goes backwards.
#[derive(Debug)]
pub struct Searcher {
    engine: QueryEngine,
    last_version: AtomicU64,
}

impl Searcher {
    /// Searches the current generation and records its version.
    pub fn search(
        &self,
        query: &[f32],
        top_k: usize,
        nprobe: usize,
    ) -> Result<Vec<SearchHit>, VectorError> {
        let generation = self.engine.generations.load();
        self.last_version
            .fetch_max(generation.version(), Ordering::AcqRel);
        self.engine
            .search_generation(&generation, query, top_k, nprobe, None)
    }

    /// Version of the newest generation this handle has searched.
    #[must_use]
    pub fn last_version(&self) -> u64 {
        self.last_version.load(Ordering::Acquire)
    }
}

/// The `nprobe` clusters nearest to `query`, nearest first, ties by lower id.
fn nearest_clusters(generation: &IndexGeneration, query: &[f32], nprobe: usize) -> Vec<ClusterId> {
    let nprobe = nprobe.clamp(1, generation.nlist());
    let mut ranked: Vec<(f32, ClusterId)> = generation
        .centroids()
        .iter()
        .map(|c| (squared_euclidean(query, &c.center), c.cluster_id))
        .collect();
    ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    ranked.truncate(nprobe);
    ranked.into_iter().map(|(_, cluster)| cluster).collect()
}

/// Bounded max-heap keeping the `k` smallest hits seen so far.
struct TopK {
    k: usize,
    heap: BinaryHeap<SearchHit>,
}

impl TopK {
    fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k + 1),
        }
    }

    fn offer(&mut self, id: DocumentId, distance: f32) {
        let hit = SearchHit::new(id, distance);
        if self.heap.len() < self.k {
            self.heap.push(hit);
        } else if self.heap.peek().is_some_and(|worst| hit < *worst) {
            self.heap.pop();
            self.heap.push(hit);
        }
    }

    fn into_sorted(self) -> Vec<SearchHit> {
        self.heap.into_sorted_vec()
    }
}
