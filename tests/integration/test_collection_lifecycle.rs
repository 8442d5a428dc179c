//! Upload, index, query and reopen a persistent collection.

use crate::common::{TestCollection, embedder, sample_rows, test_settings};
use semdex::{Collection, SemdexError, UploadRow, VectorError};
use tempfile::TempDir;

#[test]
fn test_upload_then_query_finds_exact_content() {
    let project = TestCollection::new();
    let collection = project.open();

    let summary = collection.upload(sample_rows());
    assert_eq!(summary.inserted.len(), 6);
    assert!(summary.errors.is_empty());
    let ids: Vec<u64> = summary.inserted.iter().map(|id| id.get()).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5, 6]);

    let generation = collection.ensure_indexed().unwrap();
    assert_eq!(generation.version(), 1);
    assert_eq!(generation.indexed_count(), 6);

    let matches = collection
        .query("bounded channels apply back pressure to producers", 3)
        .unwrap();
    assert_eq!(matches.len(), 3);
    assert_eq!(matches[0].document.title, "Channels");
    assert_eq!(matches[0].distance, 0.0);
    assert!(matches.windows(2).all(|w| w[0].distance <= w[1].distance));

    collection.shutdown();
}

#[test]
fn test_invalid_rows_are_reported_not_truncated() {
    let project = TestCollection::new();
    let collection = project.open();

    let rows = vec![
        UploadRow::new("ok", "fine"),
        UploadRow::new("t".repeat(513), "title too long"),
        UploadRow::new("content", "c".repeat(1025)),
        UploadRow::new("also ok", "fine too"),
    ];
    let summary = collection.upload(rows);

    assert_eq!(summary.inserted.len(), 2);
    let failed: Vec<usize> = summary.errors.iter().map(|f| f.index).collect();
    assert_eq!(failed, vec![1, 2]);
    assert!(summary
        .errors
        .iter()
        .all(|f| matches!(f.error, VectorError::FieldTooLong { .. })));

    // Rejected rows consume no ids.
    let ids: Vec<u64> = summary.inserted.iter().map(|id| id.get()).collect();
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(collection.get(summary.inserted[1]).unwrap().title, "also ok");
}

#[test]
fn test_empty_collection_has_nothing_to_find() {
    let project = TestCollection::new();
    let collection = project.open();

    let generation = collection.rebuild().unwrap();
    assert!(generation.is_empty());
    assert_eq!(generation.version(), 1);
    assert!(collection.query("anything", 5).unwrap().is_empty());
}

#[test]
fn test_reopen_keeps_documents_and_ids() {
    let project = TestCollection::new();
    {
        let collection = project.open();
        collection.upload(sample_rows());
        collection.shutdown();
    }

    let collection = project.open();
    assert_eq!(collection.len(), 6);
    assert_eq!(collection.stats().pending, 6);

    let next = collection.upload(vec![UploadRow::new("Lifetimes", "regions of validity")]);
    assert_eq!(next.inserted[0].get(), 7);

    collection.ensure_indexed().unwrap();
    let matches = collection.query("regions of validity", 1).unwrap();
    assert_eq!(matches[0].document.title, "Lifetimes");
}

#[test]
fn test_pending_documents_follow_settings() {
    let dir = TempDir::new().unwrap();

    for search_pending in [false, true] {
        let mut settings = test_settings(&dir.path().join(format!("data-{search_pending}")));
        settings.index.search_pending = search_pending;
        let collection = Collection::open(&settings, embedder()).unwrap();

        collection.upload(sample_rows());
        collection.rebuild().unwrap();
        collection.upload(vec![UploadRow::new("Late", "arrived after the build")]);

        let matches = collection.query("arrived after the build", 10).unwrap();
        let found_late = matches.iter().any(|m| m.document.title == "Late");
        assert_eq!(found_late, search_pending);
        assert_eq!(collection.stats().pending, 1);
    }
}

#[test]
fn test_unsupported_metric_is_rejected() {
    let dir = TempDir::new().unwrap();
    let mut settings = test_settings(dir.path());
    settings.index.distance_metric = "cosine".to_string();

    let err = Collection::open(&settings, embedder()).unwrap_err();
    assert!(matches!(
        err,
        SemdexError::InvalidConfig {
            field: "index.distance_metric",
            ..
        }
    ));
    assert_eq!(err.status_code(), "CONFIG_ERROR");
}
