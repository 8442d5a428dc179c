//! Index behaviour driven through the public vector API.

use std::sync::Arc;

use semdex::vector::{
    BuildParams, GenerationCell, IndexBuilder, QueryEngine, RecordStore, VectorDimension,
    VectorError,
};
use tokio_util::sync::CancellationToken;

fn parts(dimension: usize, nlist: usize) -> (Arc<RecordStore>, Arc<GenerationCell>, IndexBuilder) {
    let store = Arc::new(RecordStore::new(VectorDimension::new(dimension).unwrap()));
    let cell = Arc::new(GenerationCell::new());
    let builder = IndexBuilder::new(BuildParams {
        nlist,
        ..BuildParams::default()
    });
    (store, cell, builder)
}

#[test]
fn test_three_documents_single_cluster() {
    let (store, cell, builder) = parts(3, 1);
    store.append("x", "", vec![1.0, 0.0, 0.0]).unwrap();
    store.append("y", "", vec![0.0, 1.0, 0.0]).unwrap();
    store.append("near x", "", vec![0.9, 0.1, 0.0]).unwrap();
    builder
        .build_and_publish(&store, &cell, &CancellationToken::new())
        .unwrap();

    let engine = QueryEngine::new(store.clone(), cell.clone(), false);
    let hits = engine.search(&[1.0, 0.0, 0.0], 2, 1).unwrap();
    let ids: Vec<u64> = hits.iter().map(|h| h.id.get()).collect();
    assert_eq!(ids, vec![1, 3]);
    assert!((hits[1].distance - 0.02).abs() < 1e-6);
}

fn padded(head: &[f32], dimension: usize) -> Vec<f32> {
    let mut vector = vec![0.0; dimension];
    vector[..head.len()].copy_from_slice(head);
    vector
}

#[test]
fn test_nearest_of_three_at_model_dimension() {
    let (store, cell, builder) = parts(384, 1);
    store.append("x", "", padded(&[1.0, 0.0], 384)).unwrap();
    store.append("y", "", padded(&[0.0, 1.0], 384)).unwrap();
    store.append("xy", "", padded(&[1.0, 1.0], 384)).unwrap();
    let generation = builder
        .build_and_publish(&store, &cell, &CancellationToken::new())
        .unwrap();
    assert_eq!(generation.nlist(), 1);

    let engine = QueryEngine::new(store.clone(), cell.clone(), false);
    let hits = engine.search(&padded(&[0.9, 0.1], 384), 1, 1).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id.get(), 1);
    assert!((hits[0].distance - 0.02).abs() < 1e-6);
}

#[test]
fn test_wrong_query_dimension() {
    let (store, cell, builder) = parts(384, 4);
    store.append("a", "", vec![0.1; 384]).unwrap();
    builder
        .build_and_publish(&store, &cell, &CancellationToken::new())
        .unwrap();

    let engine = QueryEngine::new(store, cell, false);
    assert!(matches!(
        engine.search(&[0.1; 10], 3, 2),
        Err(VectorError::DimensionMismatch {
            expected: 384,
            actual: 10
        })
    ));
}

#[test]
fn test_every_document_lands_in_one_posting_list() {
    let (store, cell, builder) = parts(4, 16);
    for i in 0..500u32 {
        let f = i as f32;
        store
            .append(format!("doc {i}"), "", vec![f.sin(), f.cos(), (f * 0.1).sin(), (i % 7) as f32])
            .unwrap();
    }
    let generation = builder
        .build_and_publish(&store, &cell, &CancellationToken::new())
        .unwrap();

    let mut members: Vec<u64> = generation
        .postings()
        .iter()
        .flat_map(|p| p.members.iter().map(|id| id.get()))
        .collect();
    members.sort_unstable();
    assert_eq!(members, (1..=500).collect::<Vec<u64>>());
    assert_eq!(generation.nlist(), 16);

    // Scanning every cluster makes the search exact.
    let engine = QueryEngine::new(store.clone(), cell, false);
    let query = [0.3, -0.2, 0.5, 3.0];
    let hits = engine.search(&query, 10, 16).unwrap();
    let mut brute: Vec<(f32, u64)> = store
        .snapshot()
        .documents()
        .iter()
        .map(|d| {
            let dist: f32 = d.vector.iter().zip(&query).map(|(a, b)| (a - b) * (a - b)).sum();
            (dist, d.id.get())
        })
        .collect();
    brute.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    let expected: Vec<u64> = brute.iter().take(10).map(|(_, id)| *id).collect();
    let got: Vec<u64> = hits.iter().map(|h| h.id.get()).collect();
    assert_eq!(got, expected);
}
