//! Hit-table sinks.
//!
//! Every sink writes to `<target>.partial` and only renames the file to its
//! final name in [`HitSink::finish`]. A sink dropped before that removes its
//! partial file.

use crate::format::{encode_record, TableHeader, RECORD_LEN};
use crate::Result;
use log::warn;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tbsim_core::HitBatch;

/// Append-only destination for the hits of one plane.
pub trait HitSink {
    /// Append the hits of one chunk.
    ///
    /// # Errors
    /// Returns an error if the underlying storage fails.
    fn append(&mut self, hits: &HitBatch) -> Result<()>;

    /// Number of hits appended so far.
    fn hits_written(&self) -> u64;

    /// Flush, close and move the table to its final name.
    ///
    /// # Errors
    /// Returns an error if flushing or renaming fails.
    fn finish(self: Box<Self>) -> Result<PathBuf>;
}

/// Temporary path next to `target` used while a table is being written.
#[must_use]
pub fn partial_path(target: &Path) -> PathBuf {
    let mut name = OsString::from(target.as_os_str());
    name.push(".partial");
    PathBuf::from(name)
}

/// Owns a `.partial` file until it is committed to its final name.
#[derive(Debug)]
pub struct PartialFile {
    partial: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl PartialFile {
    /// Guard for a table that will end up at `target`.
    #[must_use]
    pub fn new(target: impl Into<PathBuf>) -> Self {
        let target = target.into();
        Self {
            partial: partial_path(&target),
            target,
            committed: false,
        }
    }

    /// Path written while the table is incomplete.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.partial
    }

    /// Final path of the table.
    #[must_use]
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Rename the partial file to the final name.
    ///
    /// # Errors
    /// Returns an error if the rename fails; the partial file is then
    /// removed on drop.
    pub fn commit(mut self) -> Result<PathBuf> {
        fs::rename(&self.partial, &self.target)?;
        self.committed = true;
        Ok(self.target.clone())
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        match fs::remove_file(&self.partial) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {e}", self.partial.display()),
        }
    }
}

/// Binary hit table (see [`crate::format`]).
pub struct BinaryHitSink {
    writer: BufWriter<File>,
    guard: PartialFile,
    hits: u64,
}

impl BinaryHitSink {
    /// Create a table for `header` that will be published at `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P, header: &TableHeader) -> Result<Self> {
        let guard = PartialFile::new(path.as_ref());
        let file = File::create(guard.path())?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&header.encode())?;
        Ok(Self {
            writer,
            guard,
            hits: 0,
        })
    }
}

impl HitSink for BinaryHitSink {
    fn append(&mut self, hits: &HitBatch) -> Result<()> {
        let mut record = [0u8; RECORD_LEN];
        for hit in hits.records() {
            encode_record(&hit, &mut record);
            self.writer.write_all(&record)?;
        }
        self.hits += hits.len() as u64;
        Ok(())
    }

    fn hits_written(&self) -> u64 {
        self.hits
    }

    fn finish(self: Box<Self>) -> Result<PathBuf> {
        let Self { writer, guard, .. } = *self;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);
        guard.commit()
    }
}
