//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use semdex::{Collection, EmbeddingGenerator, Settings, UploadRow, VectorDimension, VectorError};
use tempfile::TempDir;

/// Dimension used by test collections; small keeps builds fast.
pub const TEST_DIMENSION: usize = 32;

/// Deterministic bag-of-bytes embedder: same text, same unit vector.
pub struct HashEmbedder {
    dimension: VectorDimension,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: VectorDimension::new(dimension).expect("non-zero dimension"),
        }
    }
}

impl EmbeddingGenerator for HashEmbedder {
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        let dim = self.dimension.get();
        Ok(texts
            .iter()
            .map(|text| {
                let mut v = vec![0.0f32; dim];
                for (i, byte) in text.bytes().enumerate() {
                    v[(i * 17 + byte as usize) % dim] += 1.0;
                }
                let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
                if norm > 0.0 {
                    v.iter_mut().for_each(|x| *x /= norm);
                }
                v
            })
            .collect())
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }
}

/// A collection whose data directory lives in a temp dir.
pub struct TestCollection {
    pub dir: TempDir,
    pub settings: Settings,
}

impl TestCollection {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let settings = test_settings(&dir.path().join("data"));
        Self { dir, settings }
    }

    pub fn open(&self) -> Collection {
        Collection::open(&self.settings, embedder()).expect("Failed to open collection")
    }
}

pub fn test_settings(data_path: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.data_path = data_path.to_path_buf();
    settings.index.dimension = TEST_DIMENSION;
    settings.index.nlist = 8;
    settings.index.nprobe = 8;
    settings.index.parallel_threads = 2;
    settings.ingest.rebuild_every = 0;
    settings
}

pub fn embedder() -> Arc<dyn EmbeddingGenerator> {
    Arc::new(HashEmbedder::new(TEST_DIMENSION))
}

pub fn sample_rows() -> Vec<UploadRow> {
    [
        ("Ownership", "each value has a single owner that drops it"),
        ("Borrowing", "references must not outlive the value they point to"),
        ("Traits", "traits describe shared behaviour across types"),
        ("Iterators", "lazy adapters such as map and filter compose"),
        ("Channels", "bounded channels apply back pressure to producers"),
        ("Atomics", "compare and swap updates a value without locks"),
    ]
    .into_iter()
    .map(|(title, content)| UploadRow::new(title, content))
    .collect()
}
