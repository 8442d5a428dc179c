//! Canonical document records.
//!
//! The store assigns ids, validates record shape and hands out cheap
//! point-in-time snapshots for the index builder. Records live in a dense
//! table indexed by `id - 1`; ids are handed out under the write lock, so
//! they are unique, strictly increasing and gap-free for successful appends.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::vector::generation::SnapshotMarker;
use crate::vector::types::{
    DocumentField, DocumentId, MAX_CONTENT_BYTES, MAX_TITLE_BYTES, VectorDimension, VectorError,
};

/// A stored document. Immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: DocumentId,
    pub title: String,
    pub content: String,
    pub vector: Vec<f32>,
}

/// Persistence hook invoked for every accepted record, in id order.
///
/// Called while the store's write lock is held; implementations must not
/// call back into the store.
pub trait RecordSink: Send + Sync {
    fn persist(&self, document: &Document) -> Result<(), VectorError>;
}

impl<S: RecordSink + ?Sized> RecordSink for Arc<S> {
    fn persist(&self, document: &Document) -> Result<(), VectorError> {
        (**self).persist(document)
    }
}

/// Sink for purely in-memory stores.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl RecordSink for NullSink {
    fn persist(&self, _document: &Document) -> Result<(), VectorError> {
        Ok(())
    }
}

/// Immutable point-in-time view of the store.
#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    documents: Vec<Arc<Document>>,
}

impl StoreSnapshot {
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Documents in ascending id order.
    #[must_use]
    pub fn documents(&self) -> &[Arc<Document>] {
        &self.documents
    }

    /// Marker describing where this snapshot was cut.
    #[must_use]
    pub fn marker(&self) -> SnapshotMarker {
        SnapshotMarker {
            document_count: self.documents.len(),
            last_id: self.documents.last().map(|d| d.id),
        }
    }
}

/// Thread-safe record store.
pub struct RecordStore {
    dimension: VectorDimension,
    records: RwLock<Vec<Arc<Document>>>,
    sink: Box<dyn RecordSink>,
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("dimension", &self.dimension)
            .field("documents", &self.records.read().len())
            .finish()
    }
}

impl RecordStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new(dimension: VectorDimension) -> Self {
        Self::with_sink(dimension, NullSink)
    }

    /// Creates an empty store that forwards every record to `sink`.
    #[must_use]
    pub fn with_sink(dimension: VectorDimension, sink: impl RecordSink + 'static) -> Self {
        Self {
            dimension,
            records: RwLock::new(Vec::new()),
            sink: Box::new(sink),
        }
    }

    /// Rebuilds a store from previously persisted records.
    ///
    /// Records must carry ids `1..=n` in order and match `dimension`; they
    /// are not forwarded to `sink` again.
    pub fn restore(
        dimension: VectorDimension,
        documents: Vec<Document>,
        sink: impl RecordSink + 'static,
    ) -> Result<Self, VectorError> {
        let mut records = Vec::with_capacity(documents.len());
        for (slot, document) in documents.into_iter().enumerate() {
            let expected = slot as u64 + 1;
            if document.id.get() != expected {
                return Err(VectorError::Persistence(format!(
                    "record log is out of order: expected id {expected}, found {}",
                    document.id
                )));
            }
            validate_record(dimension, &document.title, &document.content, &document.vector)?;
            records.push(Arc::new(document));
        }

        Ok(Self {
            dimension,
            records: RwLock::new(records),
            sink: Box::new(sink),
        })
    }

    /// Validates and stores a record, returning its new id.
    ///
    /// # Errors
    /// `DimensionMismatch`, `NonFiniteComponent` or `FieldTooLong` for invalid
    /// records (nothing is stored and no id is consumed), `Persistence` if the
    /// sink fails.
    pub fn append(
        &self,
        title: impl Into<String>,
        content: impl Into<String>,
        vector: Vec<f32>,
    ) -> Result<DocumentId, VectorError> {
        let title = title.into();
        let content = content.into();
        validate_record(self.dimension, &title, &content, &vector)?;

        let mut records = self.records.write();
        let id = DocumentId::new_unchecked(records.len() as u64 + 1);
        let document = Document {
            id,
            title,
            content,
            vector,
        };
        self.sink.persist(&document)?;
        records.push(Arc::new(document));
        Ok(id)
    }

    /// Fetches a document by id.
    pub fn get(&self, id: DocumentId) -> Result<Arc<Document>, VectorError> {
        self.records
            .read()
            .get(id.slot())
            .cloned()
            .ok_or(VectorError::NotFound(id.get()))
    }

    /// Takes a point-in-time snapshot. Later appends are not visible in it.
    #[must_use]
    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            documents: self.records.read().clone(),
        }
    }

    /// Documents appended after `marker` was cut.
    #[must_use]
    pub fn documents_after(&self, marker: SnapshotMarker) -> Vec<Arc<Document>> {
        let records = self.records.read();
        let start = marker.document_count.min(records.len());
        records[start..].to_vec()
    }

    /// Calls `visit` with the vector of every listed id that exists.
    ///
    /// Holds the read lock for the duration of one call only.
    pub(crate) fn for_each_vector(&self, ids: &[DocumentId], mut visit: impl FnMut(DocumentId, &[f32])) {
        let records = self.records.read();
        for &id in ids {
            if let Some(document) = records.get(id.slot()) {
                visit(id, &document.vector);
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Highest id handed out so far.
    #[must_use]
    pub fn last_id(&self) -> Option<DocumentId> {
        DocumentId::new(self.len() as u64)
    }

    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }
}

/// Checks dimension, finiteness and byte-length limits. Nothing is ever
/// truncated.
fn validate_record(
    dimension: VectorDimension,
    title: &str,
    content: &str,
    vector: &[f32],
) -> Result<(), VectorError> {
    dimension.validate_vector(vector)?;
    if title.len() > MAX_TITLE_BYTES {
        return Err(VectorError::field_too_long(DocumentField::Title, title.len()));
    }
    if content.len() > MAX_CONTENT_BYTES {
        return Err(VectorError::field_too_long(
            DocumentField::Content,
            content.len(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::thread;

    fn small_store() -> RecordStore {
        RecordStore::new(VectorDimension::new(4).unwrap())
    }

    #[test]
    fn test_append_and_get_round_trip() {
        let store = small_store();
        let id = store.append("Rust", "Ownership and borrowing", vec![1.0, 2.0, 3.0, 4.0]).unwrap();

        let doc = store.get(id).unwrap();
        assert_eq!(doc.id, id);
        assert_eq!(doc.title, "Rust");
        assert_eq!(doc.content, "Ownership and borrowing");
        assert_eq!(doc.vector, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_ids_are_dense_and_increasing() {
        let store = small_store();
        let a = store.append("a", "", vec![0.0; 4]).unwrap();
        assert!(store.append("bad", "", vec![0.0; 3]).is_err());
        let b = store.append("b", "", vec![0.0; 4]).unwrap();

        assert_eq!(a.get(), 1);
        assert_eq!(b.get(), 2);
        assert_eq!(store.last_id(), Some(b));
    }

    #[test]
    fn test_rejects_dimension_mismatch() {
        let store = small_store();
        assert!(matches!(
            store.append("t", "c", vec![0.0; 5]),
            Err(VectorError::DimensionMismatch {
                expected: 4,
                actual: 5
            })
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_rejects_non_finite_vectors() {
        let store = small_store();
        store.append("a", "", vec![0.0; 4]).unwrap();

        assert!(matches!(
            store.append("nan", "", vec![0.0, f32::NAN, 0.0, 0.0]),
            Err(VectorError::NonFiniteComponent { index: 1, .. })
        ));
        assert!(matches!(
            store.append("inf", "", vec![f32::INFINITY, 0.0, 0.0, 0.0]),
            Err(VectorError::NonFiniteComponent { index: 0, .. })
        ));

        // Rejected records consume no id.
        let b = store.append("b", "", vec![1.0; 4]).unwrap();
        assert_eq!(b.get(), 2);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_rejects_long_fields_without_truncating() {
        let store = small_store();
        let long_title = "t".repeat(MAX_TITLE_BYTES + 1);
        assert!(matches!(
            store.append(long_title, "c", vec![0.0; 4]),
            Err(VectorError::FieldTooLong {
                field: DocumentField::Title,
                ..
            })
        ));

        // 'é' is two bytes: 513 chars of it is well past the byte limit.
        let long_content = "é".repeat(513);
        assert!(matches!(
            store.append("t", long_content, vec![0.0; 4]),
            Err(VectorError::FieldTooLong {
                field: DocumentField::Content,
                actual: 1026,
                ..
            })
        ));

        let exact = "x".repeat(MAX_CONTENT_BYTES);
        assert!(store.append("t".repeat(MAX_TITLE_BYTES), exact, vec![0.0; 4]).is_ok());
    }

    #[test]
    fn test_get_missing() {
        let store = small_store();
        assert!(matches!(
            store.get(DocumentId::new_unchecked(9)),
            Err(VectorError::NotFound(9))
        ));
    }

    #[test]
    fn test_snapshot_is_point_in_time() {
        let store = small_store();
        store.append("a", "", vec![0.0; 4]).unwrap();
        let snapshot = store.snapshot();
        store.append("b", "", vec![1.0; 4]).unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.marker().last_id.map(|id| id.get()), Some(1));
        assert_eq!(store.len(), 2);

        let pending = store.documents_after(snapshot.marker());
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].title, "b");
    }

    #[test]
    fn test_concurrent_appends_get_unique_ids() {
        let store = Arc::new(small_store());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    (0..100)
                        .map(|i| store.append(format!("{t}-{i}"), "", vec![t as f32; 4]).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all = Vec::new();
        for handle in handles {
            let ids = handle.join().unwrap();
            assert!(ids.windows(2).all(|w| w[0] < w[1]));
            all.extend(ids);
        }
        all.sort();
        let expected: Vec<u64> = (1..=400).collect();
        assert_eq!(all.iter().map(|id| id.get()).collect::<Vec<_>>(), expected);
    }

    struct RecordingSink(Arc<Mutex<Vec<u64>>>);

    impl RecordSink for RecordingSink {
        fn persist(&self, document: &Document) -> Result<(), VectorError> {
            self.0.lock().push(document.id.get());
            Ok(())
        }
    }

    struct FailingSink;

    impl RecordSink for FailingSink {
        fn persist(&self, _document: &Document) -> Result<(), VectorError> {
            Err(VectorError::Persistence("disk full".to_string()))
        }
    }

    #[test]
    fn test_sink_sees_records_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let store =
            RecordStore::with_sink(VectorDimension::new(4).unwrap(), RecordingSink(seen.clone()));
        store.append("a", "", vec![0.0; 4]).unwrap();
        store.append("b", "", vec![0.0; 4]).unwrap();

        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[test]
    fn test_failed_persist_consumes_no_id() {
        let store = RecordStore::with_sink(VectorDimension::new(4).unwrap(), FailingSink);
        assert!(matches!(
            store.append("a", "", vec![0.0; 4]),
            Err(VectorError::Persistence(_))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_restore_requires_dense_ids() {
        let dim = VectorDimension::new(2).unwrap();
        let doc = |id: u64| Document {
            id: DocumentId::new_unchecked(id),
            title: format!("doc {id}"),
            content: String::new(),
            vector: vec![id as f32, 0.0],
        };

        let store = RecordStore::restore(dim, vec![doc(1), doc(2)], NullSink).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(DocumentId::new_unchecked(2)).unwrap().title, "doc 2");

        assert!(RecordStore::restore(dim, vec![doc(1), doc(3)], NullSink).is_err());
    }
}
