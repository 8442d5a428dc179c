//! On-disk copy of the latest published index generation.
//!
//! Only the newest generation is kept. It is rewritten on every publish
//! through a temporary file and a rename, so a crash leaves either the old
//! or the new generation on disk, never a mix.
//!
//! # Storage Format
//!
//! - Header (40 bytes): magic, format version, dimension, nlist, generation
//!   version (u64), `built_from` document count (u64), iterations, reserved
//! - Per cluster, in cluster id order: `dimension` little-endian f32 centroid
//!   values, `member_count: u32`, then `member_count` u64 document ids

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use memmap2::MmapOptions;

use crate::vector::generation::{GenerationSink, IndexGeneration, SnapshotMarker};
use crate::vector::storage::VectorStorageError;
use crate::vector::types::{ClusterId, DocumentId, VectorDimension, VectorError};

/// Current index file format version.
const INDEX_FORMAT_VERSION: u32 = 1;

/// Size of the index file header in bytes.
const HEADER_SIZE: usize = 40;

/// Magic bytes to identify index files.
const MAGIC_BYTES: &[u8; 4] = b"SGEN";

/// File name of the index inside the data directory.
const INDEX_FILE_NAME: &str = "index.gen";

/// Latest published generation, stored next to the record log.
#[derive(Debug, Clone)]
pub struct IndexFile {
    path: PathBuf,
    dimension: VectorDimension,
}

impl IndexFile {
    #[must_use]
    pub fn new(base_path: impl AsRef<Path>, dimension: VectorDimension) -> Self {
        Self {
            path: Self::index_path(base_path.as_ref()),
            dimension,
        }
    }

    /// Location of the index file inside a data directory.
    #[must_use]
    pub fn index_path(base_path: &Path) -> PathBuf {
        base_path.join(INDEX_FILE_NAME)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the stored generation, `None` if nothing was saved yet.
    pub fn load(&self) -> Result<Option<IndexGeneration>, VectorStorageError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if file.metadata()?.len() < HEADER_SIZE as u64 {
            return Err(VectorStorageError::InvalidFormat(
                "File too small to contain header".to_string(),
            ));
        }

        // SAFETY: index files are replaced by rename, never modified in place.
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        decode(&mmap, self.dimension).map(Some)
    }

    /// Replaces the stored generation with `generation`.
    pub fn save(&self, generation: &IndexGeneration) -> Result<(), VectorStorageError> {
        let bytes = encode(generation, self.dimension)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = self.path.with_extension("gen.tmp");
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        tracing::debug!(
            "saved index generation {} to {} ({} bytes)",
            generation.version(),
            self.path.display(),
            bytes.len()
        );
        Ok(())
    }

    /// Size of the index file in bytes, `None` if it does not exist.
    #[must_use]
    pub fn file_size(&self) -> Option<u64> {
        fs::metadata(&self.path).ok().map(|m| m.len())
    }
}

impl GenerationSink for IndexFile {
    fn persist(&self, generation: &IndexGeneration) -> Result<(), VectorError> {
        self.save(generation)
            .map_err(|e| VectorError::Persistence(format!("{}: {e}", self.path.display())))
    }
}

fn encode(
    generation: &IndexGeneration,
    dimension: VectorDimension,
) -> Result<Vec<u8>, VectorStorageError> {
    let members = generation.indexed_count();
    let mut buf = Vec::with_capacity(
        HEADER_SIZE + generation.nlist() * (dimension.get() * 4 + 4) + members * 8,
    );

    buf.extend_from_slice(MAGIC_BYTES);
    buf.extend_from_slice(&INDEX_FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&(dimension.get() as u32).to_le_bytes());
    buf.extend_from_slice(&(generation.nlist() as u32).to_le_bytes());
    buf.extend_from_slice(&generation.version().to_le_bytes());
    buf.extend_from_slice(&(generation.built_from().document_count as u64).to_le_bytes());
    buf.extend_from_slice(&(generation.iterations() as u32).to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes());

    for (centroid, posting) in generation.centroids().iter().zip(generation.postings()) {
        dimension.validate_vector(&centroid.center)?;
        for &value in &centroid.center {
            buf.extend_from_slice(&value.to_le_bytes());
        }
        buf.extend_from_slice(&(posting.len() as u32).to_le_bytes());
        for id in &posting.members {
            buf.extend_from_slice(&id.to_bytes());
        }
    }
    Ok(buf)
}

/// Little-endian cursor that reports overruns as format errors.
struct Cursor<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], VectorStorageError> {
        let end = self.offset + len;
        let slice = self.bytes.get(self.offset..end).ok_or_else(|| {
            VectorStorageError::InvalidFormat(format!(
                "Index file truncated at offset {}",
                self.offset
            ))
        })?;
        self.offset = end;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32, VectorStorageError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, VectorStorageError> {
        let mut b = [0u8; 8];
        b.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(b))
    }

    fn f32s(&mut self, count: usize) -> Result<Vec<f32>, VectorStorageError> {
        Ok(self
            .take(count * 4)?
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }
}

fn invalid(reason: impl Into<String>) -> VectorStorageError {
    VectorStorageError::InvalidFormat(reason.into())
}

fn decode(bytes: &[u8], dimension: VectorDimension) -> Result<IndexGeneration, VectorStorageError> {
    let mut cursor = Cursor { bytes, offset: 0 };

    if cursor.take(4)? != MAGIC_BYTES {
        return Err(invalid("Invalid magic bytes"));
    }
    let format = cursor.u32()?;
    if format != INDEX_FORMAT_VERSION {
        return Err(invalid(format!(
            "Unsupported index file version {format} (expected {INDEX_FORMAT_VERSION})"
        )));
    }
    let stored_dimension = cursor.u32()? as usize;
    if stored_dimension != dimension.get() {
        return Err(VectorError::DimensionMismatch {
            expected: dimension.get(),
            actual: stored_dimension,
        }
        .into());
    }
    let nlist = cursor.u32()? as usize;
    let version = cursor.u64()?;
    if version == 0 {
        return Err(invalid("Stored generation has version 0"));
    }
    let document_count = cursor.u64()? as usize;
    let iterations = cursor.u32()? as usize;
    let _reserved = cursor.u32()?;
    let body = bytes.len() - HEADER_SIZE;
    if document_count > body / 8 || nlist > body / (dimension.get() * 4 + 4) {
        return Err(invalid(format!(
            "Header claims {nlist} clusters and {document_count} documents, more than the file can hold"
        )));
    }

    let mut centers = Vec::with_capacity(nlist);
    let mut assignments = Vec::with_capacity(document_count);
    let mut seen = vec![false; document_count];
    for cluster in 0..nlist {
        let center = cursor.f32s(dimension.get())?;
        dimension.validate_vector(&center)?;
        centers.push(center);

        let member_count = cursor.u32()? as usize;
        let mut previous = 0u64;
        for _ in 0..member_count {
            let raw = cursor.u64()?;
            if raw <= previous || raw as usize > document_count {
                return Err(invalid(format!(
                    "Posting list {cluster} holds out-of-range or unsorted id {raw}"
                )));
            }
            let slot = (raw - 1) as usize;
            if std::mem::replace(&mut seen[slot], true) {
                return Err(invalid(format!("Document {raw} is in more than one posting list")));
            }
            previous = raw;
            assignments.push((DocumentId::new_unchecked(raw), ClusterId::new(cluster as u32)));
        }
    }

    if assignments.len() != document_count {
        return Err(invalid(format!(
            "Index covers {} of {document_count} documents",
            assignments.len()
        )));
    }
    if cursor.offset != bytes.len() {
        return Err(invalid(format!(
            "{} trailing bytes after the last posting list",
            bytes.len() - cursor.offset
        )));
    }

    let built_from = SnapshotMarker {
        document_count,
        last_id: DocumentId::new(document_count as u64),
    };
    Ok(IndexGeneration::from_assignments(
        version,
        centers,
        assignments,
        built_from,
        iterations,
    ))
}
