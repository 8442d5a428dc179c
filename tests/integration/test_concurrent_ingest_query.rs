//! Queries and uploads running while background rebuilds publish generations.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::common::{TestCollection, embedder};
use semdex::{Collection, UploadRow};

#[test]
fn test_queries_see_consistent_generations_during_ingest() {
    let mut project = TestCollection::new();
    project.settings.ingest.rebuild_every = 40;
    let collection = Arc::new(Collection::open(&project.settings, embedder()).unwrap());

    let writers: Vec<_> = (0..3)
        .map(|w| {
            let collection = Arc::clone(&collection);
            thread::spawn(move || {
                for batch in 0..10 {
                    let rows = (0..10)
                        .map(|i| {
                            UploadRow::new(
                                format!("w{w}-b{batch}-{i}"),
                                format!("writer {w} batch {batch} item {i}"),
                            )
                        })
                        .collect();
                    let summary = collection.upload(rows);
                    assert_eq!(summary.inserted.len(), 10);
                }
            })
        })
        .collect();

    let reader = {
        let collection = Arc::clone(&collection);
        thread::spawn(move || {
            let searcher = collection.engine().searcher();
            let mut last = 0;
            for _ in 0..200 {
                // Resolving every hit proves no generation references an unknown id.
                let matches = collection.query("writer 1 batch 4 item 2", 5).unwrap();
                assert!(matches.len() <= 5);
                assert!(matches.windows(2).all(|w| w[0].distance <= w[1].distance));

                searcher.search(&[0.0; crate::common::TEST_DIMENSION], 1, 2).unwrap();
                assert!(searcher.last_version() >= last);
                last = searcher.last_version();
                thread::sleep(Duration::from_millis(1));
            }
        })
    };

    for writer in writers {
        writer.join().unwrap();
    }
    reader.join().unwrap();

    // The worker eventually catches up; a final synchronous build covers everything.
    let deadline = Instant::now() + Duration::from_secs(10);
    while collection.generation().version() == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert!(collection.generation().version() >= 1);

    let generation = collection.rebuild().unwrap();
    assert_eq!(generation.indexed_count(), 300);
    assert_eq!(collection.stats().pending, 0);

    let matches = collection.query("writer 1 batch 4 item 2", 5).unwrap();
    assert!(
        matches
            .iter()
            .any(|m| m.document.title == "w1-b4-2" && m.distance == 0.0)
    );
}
