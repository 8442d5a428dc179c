//! Append-only record log backing the record store.
//!
//! Every accepted document is appended to a single binary file. On startup
//! the file is memory-mapped and decoded back into documents, so a
//! collection survives process restarts without re-embedding anything.
//!
//! # Storage Format
//!
//! - Header (16 bytes): magic, version, dimension, record count
//! - Records: `id: u64`, `title_len: u32`, `content_len: u32`, title bytes,
//!   content bytes, `dimension` little-endian f32 values
//!
//! A torn trailing record (crash mid-write) is cut off on open. A failed
//! append is rolled back to the previous end of file, so the next append
//! can reuse the id without leaving a duplicate behind.

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use memmap2::MmapOptions;
use parking_lot::Mutex;
use thiserror::Error;

use crate::vector::store::{Document, RecordSink};
use crate::vector::types::{DocumentId, VectorDimension, VectorError};

/// Current storage format version.
const STORAGE_VERSION: u32 = 1;

/// Size of the storage header in bytes.
const HEADER_SIZE: usize = 16;

/// Magic bytes to identify record log files.
const MAGIC_BYTES: &[u8; 4] = b"SDOC";

/// Number of bytes per f32 value.
const BYTES_PER_F32: usize = 4;

/// Fixed per-record prefix: id + two length fields.
const RECORD_PREFIX: usize = 8 + 4 + 4;

/// File name of the log inside the data directory.
const LOG_FILE_NAME: &str = "records.log";

/// Errors specific to record log operations.
#[derive(Error, Debug)]
pub enum VectorStorageError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid storage format: {0}")]
    InvalidFormat(String),

    #[error("Vector error: {0}")]
    Vector(#[from] VectorError),

    #[error("Record log could not be rolled back after a failed append; reopen the collection")]
    Poisoned,
}

/// Append-only log of documents.
#[derive(Debug)]
pub struct RecordLog {
    path: PathBuf,
    dimension: VectorDimension,
    writer: Mutex<LogWriter>,
}

#[derive(Debug)]
struct LogWriter {
    file: File,
    record_count: u32,
    /// Set when a rollback failed; the file tail is unknown from then on.
    poisoned: bool,
    #[cfg(test)]
    fail_point: Option<FailPoint>,
}

/// Injected write failures, consumed on first use.
#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailPoint {
    /// Write half of the record, then fail.
    TornRecord,
    /// Write the record, then fail updating the header count.
    CountUpdate,
}

impl RecordLog {
    /// Opens the log under `base_path`, creating it if necessary, and
    /// returns it together with every record it already holds.
    pub fn open_or_create(
        base_path: impl AsRef<Path>,
        dimension: VectorDimension,
    ) -> Result<(Self, Vec<Document>), VectorStorageError> {
        let path = Self::log_path(base_path.as_ref());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if file.metadata()?.len() == 0 {
            write_header(&mut file, dimension)?;
            file.flush()?;
        }

        let (documents, valid_len) = read_records(&file, dimension)?;
        let file_len = file.metadata()?.len();
        if valid_len < file_len {
            tracing::warn!(
                "record log {} has a torn trailing record; truncating {} bytes",
                path.display(),
                file_len - valid_len
            );
            file.set_len(valid_len)?;
        }

        let record_count = documents.len() as u32;
        let mut writer = LogWriter {
            file,
            record_count,
            poisoned: false,
            #[cfg(test)]
            fail_point: None,
        };
        writer.write_count()?;

        tracing::debug!(
            "opened record log {} with {} records",
            path.display(),
            documents.len()
        );

        Ok((
            Self {
                path,
                dimension,
                writer: Mutex::new(writer),
            },
            documents,
        ))
    }

    /// Returns the path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the vector dimension recorded in the header.
    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    /// Returns the size of the log file in bytes.
    pub fn file_size(&self) -> Result<u64, io::Error> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    /// Location of the log inside a data directory.
    #[must_use]
    pub fn log_path(base_path: &Path) -> PathBuf {
        base_path.join(LOG_FILE_NAME)
    }

    fn append(&self, document: &Document) -> Result<(), VectorStorageError> {
        self.dimension.validate_vector(&document.vector)?;

        let mut buf = Vec::with_capacity(
            RECORD_PREFIX
                + document.title.len()
                + document.content.len()
                + document.vector.len() * BYTES_PER_F32,
        );
        buf.extend_from_slice(&document.id.to_bytes());
        buf.extend_from_slice(&(document.title.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(document.content.len() as u32).to_le_bytes());
        buf.extend_from_slice(document.title.as_bytes());
        buf.extend_from_slice(document.content.as_bytes());
        for &value in &document.vector {
            buf.extend_from_slice(&value.to_le_bytes());
        }

        let mut writer = self.writer.lock();
        if writer.poisoned {
            return Err(VectorStorageError::Poisoned);
        }
        let end = writer.file.seek(SeekFrom::End(0))?;
        let record_count = writer.record_count;
        if let Err(e) = writer.append_record(&buf) {
            writer.roll_back(end, record_count);
            return Err(e.into());
        }
        Ok(())
    }
}

impl RecordSink for RecordLog {
    fn persist(&self, document: &Document) -> Result<(), VectorError> {
        self.append(document)
            .map_err(|e| VectorError::Persistence(format!("{}: {e}", self.path.display())))
    }
}

impl LogWriter {
    fn append_record(&mut self, buf: &[u8]) -> Result<(), io::Error> {
        #[cfg(test)]
        if self.fail_point.take_if(|p| *p == FailPoint::TornRecord).is_some() {
            self.file.write_all(&buf[..buf.len() / 2])?;
            return Err(io::Error::other("injected torn write"));
        }
        self.file.write_all(buf)?;
        self.record_count += 1;
        self.write_count()
    }

    /// Truncates the file back to `end` and restores the header count.
    fn roll_back(&mut self, end: u64, record_count: u32) {
        self.record_count = record_count;
        let restored = self.file.set_len(end).and_then(|()| self.write_count());
        if let Err(e) = restored {
            tracing::error!("failed to roll back record log to {end} bytes: {e}");
            self.poisoned = true;
        }
    }

    fn write_count(&mut self) -> Result<(), io::Error> {
        #[cfg(test)]
        if self.fail_point.take_if(|p| *p == FailPoint::CountUpdate).is_some() {
            return Err(io::Error::other("injected header write failure"));
        }
        // Record count lives at byte offset 12 of the header.
        self.file.seek(SeekFrom::Start(12))?;
        self.file.write_all(&self.record_count.to_le_bytes())?;
        self.file.flush()
    }
}

fn write_header(file: &mut File, dimension: VectorDimension) -> Result<(), io::Error> {
    file.write_all(MAGIC_BYTES)?;
    file.write_all(&STORAGE_VERSION.to_le_bytes())?;
    file.write_all(&(dimension.get() as u32).to_le_bytes())?;
    file.write_all(&0u32.to_le_bytes())?;
    Ok(())
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// Decodes every complete record. Returns the documents and the byte length
/// of the valid prefix of the file.
fn read_records(
    file: &File,
    dimension: VectorDimension,
) -> Result<(Vec<Document>, u64), VectorStorageError> {
    // SAFETY: the log is only written through `RecordLog`, which appends; the
    // mapping is dropped before this function returns.
    let mmap = unsafe { MmapOptions::new().map(file)? };

    if mmap.len() < HEADER_SIZE {
        return Err(VectorStorageError::InvalidFormat(
            "File too small to contain header".to_string(),
        ));
    }
    if &mmap[0..4] != MAGIC_BYTES {
        return Err(VectorStorageError::InvalidFormat(
            "Invalid magic bytes".to_string(),
        ));
    }

    let version = read_u32(&mmap, 4);
    if version != STORAGE_VERSION {
        return Err(VectorStorageError::InvalidFormat(format!(
            "Unsupported record log version {version} (expected {STORAGE_VERSION})"
        )));
    }

    let stored_dimension = read_u32(&mmap, 8) as usize;
    if stored_dimension != dimension.get() {
        return Err(VectorError::DimensionMismatch {
            expected: dimension.get(),
            actual: stored_dimension,
        }
        .into());
    }

    let vector_bytes = dimension.get() * BYTES_PER_F32;
    let mut documents = Vec::new();
    let mut offset = HEADER_SIZE;

    while offset + RECORD_PREFIX <= mmap.len() {
        let mut id_bytes = [0u8; 8];
        id_bytes.copy_from_slice(&mmap[offset..offset + 8]);
        let title_len = read_u32(&mmap, offset + 8) as usize;
        let content_len = read_u32(&mmap, offset + 12) as usize;

        let record_len = RECORD_PREFIX + title_len + content_len + vector_bytes;
        if offset + record_len > mmap.len() {
            break;
        }

        let id = DocumentId::from_bytes(id_bytes).ok_or_else(|| {
            VectorStorageError::InvalidFormat(format!("Zero document id at offset {offset}"))
        })?;

        let title_start = offset + RECORD_PREFIX;
        let content_start = title_start + title_len;
        let vector_start = content_start + content_len;

        let title = String::from_utf8(mmap[title_start..content_start].to_vec()).map_err(|e| {
            VectorStorageError::InvalidFormat(format!("Title of document {id} is not UTF-8: {e}"))
        })?;
        let content = String::from_utf8(mmap[content_start..vector_start].to_vec()).map_err(|e| {
            VectorStorageError::InvalidFormat(format!(
                "Content of document {id} is not UTF-8: {e}"
            ))
        })?;

        let vector = mmap[vector_start..vector_start + vector_bytes]
            .chunks_exact(BYTES_PER_F32)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        documents.push(Document {
            id,
            title,
            content,
            vector,
        });
        offset += record_len;
    }

    Ok((documents, offset as u64))
}
