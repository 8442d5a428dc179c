//! K-means clustering for IVF partitioning.
//!
//! Pure Rust Lloyd's algorithm over squared Euclidean distance, seeded with
//! K-means++ from a deterministic RNG so that a fixed seed always produces
//! the same centroids.
//!
//! # Algorithm Details
//! - Distance metric: squared Euclidean (monotonic with Euclidean, no sqrt)
//! - Initialization: K-means++ driven by `StdRng::seed_from_u64(seed)`
//! - Stop: changed-assignment fraction at or below the threshold, or the
//!   iteration cap (non-convergence is not an error)
//! - Empty clusters are re-seeded from the globally farthest points
//!
//! # Performance Characteristics
//! - O(n * k * d * iterations) time complexity
//! - O(k * d) space for centroids
//! - Assignment step runs on the ambient rayon pool

use crate::vector::types::ClusterId;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Default iteration cap for Lloyd refinement.
pub const DEFAULT_MAX_ITERATIONS: usize = 20;

/// Default fraction of changed assignments that counts as converged.
pub const DEFAULT_CONVERGENCE_THRESHOLD: f32 = 1e-3;

/// Vectors assigned per parallel work item; cancellation is checked per chunk.
const ASSIGN_CHUNK_SIZE: usize = 256;

/// Epsilon for floating-point comparisons.
const EPSILON: f64 = 1e-12;

/// Parameters for one clustering run.
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansParams {
    /// Number of clusters to produce.
    pub k: usize,
    /// Iteration cap for Lloyd refinement.
    pub max_iterations: usize,
    /// Converged once `changed / n` is at or below this value.
    pub convergence_threshold: f32,
    /// RNG seed for centroid initialization.
    pub seed: u64,
}

impl KMeansParams {
    /// Parameters with default iteration cap, threshold and seed 42.
    #[must_use]
    pub fn new(k: usize) -> Self {
        Self {
            k,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            convergence_threshold: DEFAULT_CONVERGENCE_THRESHOLD,
            seed: 42,
        }
    }
}

/// Result of K-means clustering operation.
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansResult {
    /// Cluster centroids, each a vector of the same dimension as input vectors.
    pub centroids: Vec<Vec<f32>>,

    /// Cluster assignment for each input vector against the final centroids.
    pub assignments: Vec<ClusterId>,

    /// Number of Lloyd iterations performed.
    pub iterations: usize,

    /// Whether the changed-assignment threshold was reached before the cap.
    pub converged: bool,

    /// Total number of empty-cluster re-seeds across all iterations.
    pub reseeded: usize,
}

/// Errors that can occur during clustering operations.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ClusteringError {
    #[error(
        "Empty vector set provided for clustering\nSuggestion: Ensure vectors are ingested before clustering"
    )]
    EmptyVectorSet,

    #[error("Invalid cluster count: {0}\nSuggestion: Use k between 1 and the number of vectors")]
    InvalidClusterCount(usize),

    #[error(
        "Dimension mismatch in vectors\nSuggestion: Ensure all vectors come from the same embedding model"
    )]
    DimensionMismatch,

    #[error("Clustering was cancelled")]
    Cancelled,
}

/// Performs K-means clustering on a set of vectors.
///
/// # Arguments
/// * `vectors` - Input vectors (non-empty, same dimension)
/// * `params` - Cluster count, iteration cap, threshold and seed
/// * `cancel` - Checked before every iteration and between assignment chunks
///
/// # Algorithm
/// 1. Initialize centroids using seeded K-means++
/// 2. Iterate until the changed fraction drops to the threshold or the cap:
///    - Assign each vector to its nearest centroid
///    - Recompute centroids as means, re-seeding empty clusters
/// 3. Assign once more so assignments match the returned centroids
#[must_use = "clustering results should be used or the computation is wasted"]
pub fn kmeans_clustering(
    vectors: &[&[f32]],
    params: &KMeansParams,
    cancel: &CancellationToken,
) -> Result<KMeansResult, ClusteringError> {
    if vectors.is_empty() {
        return Err(ClusteringError::EmptyVectorSet);
    }

    let k = params.k;
    if k == 0 || k > vectors.len() {
        return Err(ClusteringError::InvalidClusterCount(k));
    }

    let dimension = vectors[0].len();
    if vectors.iter().any(|v| v.len() != dimension) {
        return Err(ClusteringError::DimensionMismatch);
    }

    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut centroids = initialize_centroids_kmeans_plus_plus(vectors, k, &mut rng);
    let mut assignments: Option<Vec<ClusterId>> = None;
    let mut iterations = 0;
    let mut converged = false;
    let mut reseeded = 0;

    while iterations < params.max_iterations {
        if cancel.is_cancelled() {
            return Err(ClusteringError::Cancelled);
        }
        iterations += 1;

        let nearest = assign_batch(vectors, &centroids, cancel)?;
        let changed = match &assignments {
            Some(previous) => previous
                .iter()
                .zip(nearest.iter())
                .filter(|(old, (new, _))| *old != new)
                .count(),
            None => vectors.len(),
        };

        let (new_centroids, empty) = update_centroids(vectors, &nearest, k, dimension);
        centroids = new_centroids;
        reseeded += empty;
        assignments = Some(nearest.into_iter().map(|(cluster, _)| cluster).collect());

        let changed_fraction = changed as f32 / vectors.len() as f32;
        tracing::debug!(
            "k-means iteration {iterations}: {changed} assignments changed, {empty} clusters re-seeded"
        );
        if iterations > 1 && changed_fraction <= params.convergence_threshold {
            converged = true;
            break;
        }
    }

    if !converged {
        tracing::debug!(
            "k-means stopped at the iteration cap ({}) without converging",
            params.max_iterations
        );
    }

    let assignments = assign_batch(vectors, &centroids, cancel)?
        .into_iter()
        .map(|(cluster, _)| cluster)
        .collect();

    Ok(KMeansResult {
        centroids,
        assignments,
        iterations,
        converged,
        reseeded,
    })
}

/// Assigns a vector to the nearest centroid by squared Euclidean distance.
///
/// Ties go to the lower cluster id. Returns the cluster and the distance.
pub fn assign_to_nearest_centroid<C: AsRef<[f32]>>(
    vector: &[f32],
    centroids: &[C],
) -> (ClusterId, f32) {
    let mut best_distance = f32::INFINITY;
    let mut best_cluster = 0;

    for (i, centroid) in centroids.iter().enumerate() {
        let distance = squared_euclidean(vector, centroid.as_ref());
        if distance < best_distance {
            best_distance = distance;
            best_cluster = i;
        }
    }

    (ClusterId::new(best_cluster as u32), best_distance)
}

/// Assigns every vector to its nearest centroid in parallel.
///
/// Returns `Cancelled` if the token fires while chunks are still pending.
pub(crate) fn assign_batch(
    vectors: &[&[f32]],
    centroids: &[Vec<f32>],
    cancel: &CancellationToken,
) -> Result<Vec<(ClusterId, f32)>, ClusteringError> {
    let chunks: Vec<Option<Vec<(ClusterId, f32)>>> = vectors
        .par_chunks(ASSIGN_CHUNK_SIZE)
        .map(|chunk| {
            if cancel.is_cancelled() {
                return None;
            }
            Some(
                chunk
                    .iter()
                    .map(|vector| assign_to_nearest_centroid(vector, centroids))
                    .collect(),
            )
        })
        .collect();

    let mut nearest = Vec::with_capacity(vectors.len());
    for chunk in chunks {
        nearest.extend(chunk.ok_or(ClusteringError::Cancelled)?);
    }
    Ok(nearest)
}

/// Squared Euclidean distance between two vectors of equal length.
#[inline]
pub fn squared_euclidean(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vectors must have same dimension");
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Recomputes centroids as the mean of their assigned vectors.
///
/// Clusters left empty take the farthest vectors from their current
/// centroids, one distinct vector per empty cluster. Returns the new
/// centroids and the number of re-seeded clusters.
fn update_centroids(
    vectors: &[&[f32]],
    nearest: &[(ClusterId, f32)],
    k: usize,
    dimension: usize,
) -> (Vec<Vec<f32>>, usize) {
    let mut sums = vec![vec![0.0f64; dimension]; k];
    let mut sizes = vec![0usize; k];

    for (vector, (cluster, _)) in vectors.iter().zip(nearest.iter()) {
        let idx = cluster.index();
        for (sum, &value) in sums[idx].iter_mut().zip(vector.iter()) {
            *sum += f64::from(value);
        }
        sizes[idx] += 1;
    }

    let empty: Vec<usize> = (0..k).filter(|&c| sizes[c] == 0).collect();

    let mut centroids: Vec<Vec<f32>> = sums
        .into_iter()
        .zip(sizes.iter())
        .map(|(sum, &size)| {
            if size == 0 {
                Vec::new()
            } else {
                sum.into_iter().map(|s| (s / size as f64) as f32).collect()
            }
        })
        .collect();

    if !empty.is_empty() {
        // Farthest first; ties by lower vector index keep it deterministic.
        let mut by_distance: Vec<usize> = (0..vectors.len()).collect();
        by_distance.sort_by(|&a, &b| nearest[b].1.total_cmp(&nearest[a].1).then(a.cmp(&b)));

        for (cluster, &donor) in empty.iter().zip(by_distance.iter()) {
            centroids[*cluster] = vectors[donor].to_vec();
        }
    }

    (centroids, empty.len())
}

/// Initializes centroids using the K-means++ algorithm.
///
/// The first centroid is drawn uniformly; each next one is drawn with
/// probability proportional to its squared distance from the closest chosen
/// centroid. When every remaining vector coincides with a chosen centroid the
/// first centroid is repeated; Lloyd's empty-cluster handling takes over.
fn initialize_centroids_kmeans_plus_plus(
    vectors: &[&[f32]],
    k: usize,
    rng: &mut StdRng,
) -> Vec<Vec<f32>> {
    let mut centroids: Vec<Vec<f32>> = Vec::with_capacity(k);

    let first_idx = rng.random_range(0..vectors.len());
    centroids.push(vectors[first_idx].to_vec());

    let mut min_distances: Vec<f64> = vectors
        .iter()
        .map(|v| f64::from(squared_euclidean(v, &centroids[0])))
        .collect();

    while centroids.len() < k {
        let total: f64 = min_distances.iter().sum();

        let next = if total < EPSILON {
            None
        } else {
            let target = rng.random::<f64>() * total;
            let mut cumulative = 0.0;
            let mut chosen = None;
            for (i, &distance) in min_distances.iter().enumerate() {
                cumulative += distance;
                if distance > 0.0 && cumulative >= target {
                    chosen = Some(i);
                    break;
                }
            }
            // Rounding can leave the target just past the last weight.
            chosen.or_else(|| min_distances.iter().rposition(|&d| d > 0.0))
        };

        let centroid = match next {
            Some(i) => vectors[i].to_vec(),
            None => centroids[0].clone(),
        };

        for (slot, vector) in min_distances.iter_mut().zip(vectors.iter()) {
            let d = f64::from(squared_euclidean(vector, &centroid));
            if d < *slot {
                *slot = d;
            }
        }
        centroids.push(centroid);
    }

    centroids
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refs(vectors: &[Vec<f32>]) -> Vec<&[f32]> {
        vectors.iter().map(|v| v.as_slice()).collect()
    }

    fn three_blobs() -> Vec<Vec<f32>> {
        vec![
            vec![1.0, 0.1, 0.0],
            vec![0.9, 0.2, 0.1],
            vec![1.1, 0.0, 0.2],
            vec![10.1, 11.0, 10.0],
            vec![10.2, 10.9, 10.1],
            vec![10.0, 11.1, 10.2],
            vec![-10.0, 0.1, -9.0],
            vec![-10.1, 0.2, -8.9],
            vec![-9.8, 0.0, -9.1],
        ]
    }

    #[test]
    fn test_squared_euclidean() {
        assert_eq!(squared_euclidean(&[1.0, 2.0], &[1.0, 2.0]), 0.0);
        assert_eq!(squared_euclidean(&[0.0, 0.0], &[3.0, 4.0]), 25.0);
        assert_eq!(squared_euclidean(&[1.0, -1.0], &[-1.0, 1.0]), 8.0);
    }

    #[test]
    fn test_assign_to_nearest_centroid() {
        let centroids = [
            vec![1.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.0, 0.0, 1.0],
        ];

        let (cluster, _) = assign_to_nearest_centroid(&[0.9, 0.1, 0.0], &centroids);
        assert_eq!(cluster.get(), 0);

        let (cluster, _) = assign_to_nearest_centroid(&[0.1, 0.9, 0.1], &centroids);
        assert_eq!(cluster.get(), 1);

        let (cluster, distance) = assign_to_nearest_centroid(&[0.0, 0.0, 1.0], &centroids);
        assert_eq!(cluster.get(), 2);
        assert_eq!(distance, 0.0);
    }

    #[test]
    fn test_assign_ties_prefer_lower_cluster() {
        let centroids = [vec![1.0, 0.0], vec![-1.0, 0.0]];
        let (cluster, _) = assign_to_nearest_centroid(&[0.0, 5.0], &centroids);
        assert_eq!(cluster.get(), 0);
    }

    #[test]
    fn test_kmeans_clustering_basic() {
        let vectors = three_blobs();
        let result =
            kmeans_clustering(&refs(&vectors), &KMeansParams::new(3), &CancellationToken::new())
                .unwrap();

        assert_eq!(result.centroids.len(), 3);
        assert_eq!(result.assignments.len(), 9);
        assert!(result.iterations <= DEFAULT_MAX_ITERATIONS);

        for blob in result.assignments.chunks(3) {
            assert!(blob.iter().all(|&c| c == blob[0]));
        }
        assert_ne!(result.assignments[0], result.assignments[3]);
        assert_ne!(result.assignments[3], result.assignments[6]);
        assert_ne!(result.assignments[0], result.assignments[6]);
    }

    #[test]
    fn test_kmeans_is_deterministic_for_seed() {
        let vectors: Vec<Vec<f32>> = (0..60)
            .map(|i| {
                let x = i as f32;
                vec![(x * 0.37).sin() * 5.0, (x * 0.11).cos() * 3.0, x % 7.0]
            })
            .collect();
        let params = KMeansParams {
            seed: 7,
            ..KMeansParams::new(5)
        };
        let cancel = CancellationToken::new();

        let a = kmeans_clustering(&refs(&vectors), &params, &cancel).unwrap();
        let b = kmeans_clustering(&refs(&vectors), &params, &cancel).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_kmeans_edge_cases() {
        let cancel = CancellationToken::new();

        let vectors: Vec<Vec<f32>> = vec![];
        assert_eq!(
            kmeans_clustering(&refs(&vectors), &KMeansParams::new(1), &cancel),
            Err(ClusteringError::EmptyVectorSet)
        );

        let vectors = vec![vec![1.0, 2.0]];
        assert_eq!(
            kmeans_clustering(&refs(&vectors), &KMeansParams::new(0), &cancel),
            Err(ClusteringError::InvalidClusterCount(0))
        );

        let vectors = vec![vec![1.0, 2.0], vec![3.0, 4.0]];
        assert_eq!(
            kmeans_clustering(&refs(&vectors), &KMeansParams::new(3), &cancel),
            Err(ClusteringError::InvalidClusterCount(3))
        );

        let vectors = vec![vec![1.0, 2.0], vec![3.0, 4.0, 5.0]];
        assert_eq!(
            kmeans_clustering(&refs(&vectors), &KMeansParams::new(1), &cancel),
            Err(ClusteringError::DimensionMismatch)
        );
    }

    #[test]
    fn test_single_cluster_is_mean() {
        let vectors = vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]];
        let result =
            kmeans_clustering(&refs(&vectors), &KMeansParams::new(1), &CancellationToken::new())
                .unwrap();

        assert_eq!(result.centroids, vec![vec![3.0, 4.0]]);
        assert!(result.assignments.iter().all(|c| c.get() == 0));
    }

    #[test]
    fn test_duplicate_points_do_not_fail() {
        let vectors = vec![vec![1.0, 1.0]; 6];
        let result =
            kmeans_clustering(&refs(&vectors), &KMeansParams::new(3), &CancellationToken::new())
                .unwrap();

        assert_eq!(result.centroids.len(), 3);
        assert_eq!(result.assignments.len(), 6);
    }

    #[test]
    fn test_empty_cluster_is_reseeded_from_farthest_point() {
        let vectors = vec![vec![0.0], vec![1.0], vec![100.0]];
        let nearest = vec![
            (ClusterId::new(0), 0.25),
            (ClusterId::new(0), 0.25),
            (ClusterId::new(0), 9000.0),
        ];

        let (centroids, empty) = update_centroids(&refs(&vectors), &nearest, 2, 1);
        assert_eq!(empty, 1);
        assert!((centroids[0][0] - 101.0 / 3.0).abs() < 1e-4);
        assert_eq!(centroids[1], vec![100.0]);
    }

    #[test]
    fn test_iteration_cap_is_not_an_error() {
        let vectors = three_blobs();
        let params = KMeansParams {
            max_iterations: 1,
            ..KMeansParams::new(3)
        };
        let result =
            kmeans_clustering(&refs(&vectors), &params, &CancellationToken::new()).unwrap();

        assert_eq!(result.iterations, 1);
        assert!(!result.converged);
        assert_eq!(result.assignments.len(), vectors.len());
    }

    #[test]
    fn test_cancelled_clustering() {
        let vectors = three_blobs();
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(
            kmeans_clustering(&refs(&vectors), &KMeansParams::new(2), &cancel),
            Err(ClusteringError::Cancelled)
        );
    }
}
