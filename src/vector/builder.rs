//! Builds index generations from record store snapshots.
//!
//! A build trains centroids on a (possibly sampled) training set, assigns
//! every snapshot document to its nearest centroid and publishes the result
//! through the [`GenerationCell`]. Builds are serialized per builder, work
//! only on the snapshot taken at their start, and publish nothing when
//! cancelled.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio_util::sync::CancellationToken;

use crate::config::IndexConfig;
use crate::vector::clustering::{ClusteringError, KMeansParams, assign_batch, kmeans_clustering};
use crate::vector::generation::{GenerationCell, IndexGeneration};
use crate::vector::store::{RecordStore, StoreSnapshot};
use crate::vector::types::VectorError;

/// Tuning knobs for one builder.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildParams {
    /// Target number of clusters.
    pub nlist: usize,
    /// Lloyd iteration cap.
    pub max_iterations: usize,
    /// Changed-assignment fraction treated as converged.
    pub convergence_threshold: f32,
    /// Snapshots larger than this train on a sample of this size.
    pub training_sample_size: usize,
    /// Seed for sampling and centroid initialization.
    pub seed: u64,
}

impl Default for BuildParams {
    fn default() -> Self {
        Self::from(&IndexConfig::default())
    }
}

impl From<&IndexConfig> for BuildParams {
    fn from(config: &IndexConfig) -> Self {
        Self {
            nlist: config.nlist,
            max_iterations: config.max_build_iterations,
            convergence_threshold: config.convergence_threshold,
            training_sample_size: config.training_sample_size,
            seed: config.seed,
        }
    }
}

/// Produces and publishes index generations.
pub struct IndexBuilder {
    params: BuildParams,
    pool: Option<rayon::ThreadPool>,
    build_lock: Mutex<()>,
}

impl std::fmt::Debug for IndexBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexBuilder")
            .field("params", &self.params)
            .field(
                "threads",
                &self.pool.as_ref().map(rayon::ThreadPool::current_num_threads),
            )
            .finish()
    }
}

impl IndexBuilder {
    /// Creates a builder running on the global rayon pool.
    #[must_use]
    pub fn new(params: BuildParams) -> Self {
        Self {
            params,
            pool: None,
            build_lock: Mutex::new(()),
        }
    }

    /// Creates a builder with a dedicated pool of `threads` workers.
    ///
    /// Falls back to the global pool if the dedicated pool cannot start.
    #[must_use]
    pub fn with_threads(params: BuildParams, threads: usize) -> Self {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("semdex-build-{i}"))
            .build();
        match pool {
            Ok(pool) => Self {
                params,
                pool: Some(pool),
                build_lock: Mutex::new(()),
            },
            Err(e) => {
                tracing::warn!("failed to start index build pool, using global pool: {e}");
                Self::new(params)
            }
        }
    }

    #[must_use]
    pub fn params(&self) -> &BuildParams {
        &self.params
    }

    /// Builds a generation from `snapshot` without publishing it.
    ///
    /// The returned generation carries `version`.
    pub fn build(
        &self,
        snapshot: &StoreSnapshot,
        version: u64,
        cancel: &CancellationToken,
    ) -> Result<IndexGeneration, VectorError> {
        let marker = snapshot.marker();
        if snapshot.is_empty() {
            return Ok(IndexGeneration::empty(version, marker));
        }
        if cancel.is_cancelled() {
            return Err(VectorError::BuildCancelled);
        }

        let run = || -> Result<IndexGeneration, VectorError> {
            let documents = snapshot.documents();
            let vectors: Vec<&[f32]> = documents.iter().map(|d| d.vector.as_slice()).collect();

            let sample = self.training_sample(vectors.len());
            let training: Vec<&[f32]> = match &sample {
                Some(indices) => indices.iter().map(|&i| vectors[i]).collect(),
                None => vectors.clone(),
            };

            let k = self.params.nlist.min(training.len());
            let params = KMeansParams {
                k,
                max_iterations: self.params.max_iterations,
                convergence_threshold: self.params.convergence_threshold,
                seed: self.params.seed,
            };
            let result = kmeans_clustering(&training, &params, cancel).map_err(clustering_error)?;

            let assignments = match sample {
                None => result.assignments,
                Some(_) => assign_batch(&vectors, &result.centroids, cancel)
                    .map_err(clustering_error)?
                    .into_iter()
                    .map(|(cluster, _)| cluster)
                    .collect(),
            };

            tracing::debug!(
                "trained {k} centroids on {} of {} vectors ({} iterations, converged: {}, re-seeded: {})",
                training.len(),
                vectors.len(),
                result.iterations,
                result.converged,
                result.reseeded
            );

            Ok(IndexGeneration::from_assignments(
                version,
                result.centroids,
                documents.iter().map(|d| d.id).zip(assignments),
                marker,
                result.iterations,
            ))
        };

        match &self.pool {
            Some(pool) => pool.install(run),
            None => run(),
        }
    }

    /// Snapshots `store`, builds a generation and publishes it to `cell`.
    ///
    /// Builds through one builder never overlap, so generations are published
    /// in snapshot order. On error or cancellation the current generation is
    /// left untouched.
    pub fn build_and_publish(
        &self,
        store: &RecordStore,
        cell: &GenerationCell,
        cancel: &CancellationToken,
    ) -> Result<Arc<IndexGeneration>, VectorError> {
        let _guard = self.build_lock.lock();
        let started = Instant::now();

        let snapshot = store.snapshot();
        let generation = match self.build(&snapshot, 0, cancel) {
            Ok(generation) => generation,
            Err(e) => {
                if matches!(e, VectorError::BuildCancelled) {
                    tracing::warn!(
                        "index build cancelled; generation {} stays current",
                        cell.version()
                    );
                }
                return Err(e);
            }
        };
        if cancel.is_cancelled() {
            tracing::warn!(
                "index build cancelled before publish; generation {} stays current",
                cell.version()
            );
            return Err(VectorError::BuildCancelled);
        }

        let published = cell.publish_next(generation);
        tracing::info!(
            "published index generation {}: {} documents in {} clusters ({} iterations, {:?})",
            published.version(),
            published.indexed_count(),
            published.nlist(),
            published.iterations(),
            started.elapsed()
        );
        Ok(published)
    }

    /// Sorted sample indices, or `None` when the whole set is used.
    fn training_sample(&self, total: usize) -> Option<Vec<usize>> {
        let limit = self.params.training_sample_size.max(self.params.nlist);
        if total <= limit {
            return None;
        }
        let mut rng = StdRng::seed_from_u64(self.params.seed);
        let mut indices = rand::seq::index::sample(&mut rng, total, limit).into_vec();
        indices.sort_unstable();
        Some(indices)
    }
}

fn clustering_error(e: ClusteringError) -> VectorError {
    match e {
        ClusteringError::Cancelled => VectorError::BuildCancelled,
        other => VectorError::ClusteringFailed(other.to_string()),
    }
}
