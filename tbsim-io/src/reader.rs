//! Memory-mapped hit-table reader.
//!

use crate::format::{decode_record, TableHeader, HEADER_LEN, RECORD_LEN};
use crate::{Error, Result};
use memmap2::Mmap;
use rayon::prelude::*;
use std::fs::File;
use std::path::{Path, PathBuf};
use tbsim_core::{DigitizedHit, HitBatch};

/// A memory-mapped file reader.
///
/// Uses memmap2 to access file contents without loading the entire file
/// into memory.
pub struct MappedFileReader {
    mmap: Mmap,
    path: PathBuf,
}

impl MappedFileReader {
    /// Opens a file for memory-mapped reading.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or memory-mapped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)?;
        // SAFETY: The file is opened read-only and we assume it is not modified concurrently.
        // This is the standard safety contract for memory mapping.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self {
            mmap,
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Returns the file contents as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap[..]
    }

    /// Returns the file size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    /// Returns true if the file is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Path of the mapped file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Aggregate view of a hit table.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TableSummary {
    /// Number of hits.
    pub hits: u64,
    /// Smallest and largest event number, if any hit exists.
    pub event_range: Option<(i64, i64)>,
    /// Mean column.
    pub mean_column: f64,
    /// Mean row.
    pub mean_row: f64,
    /// Mean charge in electrons.
    pub mean_charge_e: f64,
}

impl TableSummary {
    /// Summarize hits held in memory.
    #[must_use]
    pub fn from_hits<'a>(hits: impl IntoIterator<Item = &'a DigitizedHit>) -> Self {
        hits.into_iter()
            .fold(Accumulator::default(), Accumulator::add)
            .summary()
    }
}

#[derive(Clone, Copy, Default)]
struct Accumulator {
    hits: u64,
    min_event: i64,
    max_event: i64,
    column: f64,
    row: f64,
    charge: f64,
}

impl Accumulator {
    fn add(mut self, hit: &DigitizedHit) -> Self {
        if self.hits == 0 {
            self.min_event = hit.event_number;
            self.max_event = hit.event_number;
        } else {
            self.min_event = self.min_event.min(hit.event_number);
            self.max_event = self.max_event.max(hit.event_number);
        }
        self.hits += 1;
        self.column += f64::from(hit.column);
        self.row += f64::from(hit.row);
        self.charge += hit.charge_electrons();
        self
    }

    fn merge(self, other: Self) -> Self {
        match (self.hits, other.hits) {
            (0, _) => other,
            (_, 0) => self,
            _ => Self {
                hits: self.hits + other.hits,
                min_event: self.min_event.min(other.min_event),
                max_event: self.max_event.max(other.max_event),
                column: self.column + other.column,
                row: self.row + other.row,
                charge: self.charge + other.charge,
            },
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn summary(self) -> TableSummary {
        if self.hits == 0 {
            return TableSummary::default();
        }
        let n = self.hits as f64;
        TableSummary {
            hits: self.hits,
            event_range: Some((self.min_event, self.max_event)),
            mean_column: self.column / n,
            mean_row: self.row / n,
            mean_charge_e: self.charge / n,
        }
    }
}

/// Reader for binary hit tables written by [`crate::BinaryHitSink`].
pub struct HitTableReader {
    reader: MappedFileReader,
    header: TableHeader,
}

impl HitTableReader {
    /// Open and validate a hit table.
    ///
    /// # Errors
    /// Returns an error if the file cannot be mapped, the header is invalid
    /// or the payload is not a whole number of records.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = MappedFileReader::open(path)?;
        let header = TableHeader::decode(reader.as_bytes())?;
        let payload = reader.len() - HEADER_LEN;
        if payload % RECORD_LEN != 0 {
            return Err(Error::InvalidFormat(format!(
                "{}: payload of {payload} bytes is not a multiple of {RECORD_LEN}",
                reader.path().display()
            )));
        }
        Ok(Self { reader, header })
    }

    /// Table header.
    #[must_use]
    pub fn header(&self) -> &TableHeader {
        &self.header
    }

    /// Number of hits in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        (self.reader.len() - HEADER_LEN) / RECORD_LEN
    }

    /// Returns true if the table holds no hits.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn payload(&self) -> &[u8] {
        &self.reader.as_bytes()[HEADER_LEN..]
    }

    /// Hit at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<DigitizedHit> {
        let start = index.checked_mul(RECORD_LEN)?;
        self.payload()
            .get(start..start + RECORD_LEN)
            .map(decode_record)
    }

    /// Iterate over all hits in file order.
    pub fn records(&self) -> impl Iterator<Item = DigitizedHit> + '_ {
        self.payload().chunks_exact(RECORD_LEN).map(decode_record)
    }

    /// Load the table into a batch; charges are converted back to electrons.
    #[must_use]
    pub fn to_batch(&self) -> HitBatch {
        let mut batch = HitBatch::with_capacity(self.len());
        for hit in self.records() {
            batch.push(hit.event_number, hit.column, hit.row, hit.charge_electrons());
        }
        batch
    }

    /// Compute hit count, event range and mean position and charge.
    #[must_use]
    pub fn summary(&self) -> TableSummary {
        self.payload()
            .par_chunks_exact(RECORD_LEN)
            .fold(Accumulator::default, |acc, bytes| acc.add(&decode_record(bytes)))
            .reduce(Accumulator::default, Accumulator::merge)
            .summary()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::{BinaryHitSink, HitSink};
    use approx::assert_relative_eq;
    use tempfile::tempdir;

    #[test]
    fn test_read_back_table() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.bin");
        let header = TableHeader {
            plane_index: 2,
            n_columns: 100,
            n_rows: 50,
        };

        let mut batch = HitBatch::default();
        batch.push(4, 10, 20, 1000.0);
        batch.push(2, 30, 40, 3005.0);
        let mut sink = Box::new(BinaryHitSink::create(&path, &header).unwrap());
        sink.append(&batch).unwrap();
        sink.finish().unwrap();

        let reader = HitTableReader::open(&path).unwrap();
        assert_eq!(reader.header(), &header);
        assert_eq!(reader.len(), 2);
        let hit = reader.get(1).unwrap();
        assert_eq!((hit.event_number, hit.column, hit.row, hit.charge), (2, 30, 40, 300));
        assert!(reader.get(2).is_none());

        let summary = reader.summary();
        let records: Vec<_> = reader.records().collect();
        assert_eq!(TableSummary::from_hits(&records), summary);
        assert_eq!(summary.hits, 2);
        assert_eq!(summary.event_range, Some((2, 4)));
        assert_relative_eq!(summary.mean_column, 20.0);
        assert_relative_eq!(summary.mean_row, 30.0);
        assert_relative_eq!(summary.mean_charge_e, 2000.0);

        let loaded = reader.to_batch();
        assert_eq!(loaded.column, batch.column);
        assert_relative_eq!(loaded.charge[1], 3000.0);
    }

    #[test]
    fn test_empty_table_summary() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.bin");
        let header = TableHeader {
            plane_index: 0,
            n_columns: 1,
            n_rows: 1,
        };
        Box::new(BinaryHitSink::create(&path, &header).unwrap())
            .finish()
            .unwrap();

        let reader = HitTableReader::open(&path).unwrap();
        assert!(reader.is_empty());
        assert_eq!(reader.summary(), TableSummary::default());
    }

    #[test]
    fn test_truncated_table_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.bin");
        let header = TableHeader {
            plane_index: 0,
            n_columns: 1,
            n_rows: 1,
        };
        let mut bytes = header.encode().to_vec();
        bytes.extend_from_slice(&[0u8; RECORD_LEN + 3]);
        std::fs::write(&path, bytes).unwrap();
        assert!(HitTableReader::open(&path).is_err());
    }
}
