//! HDF5 hit tables.
//!
//! Layout: group `/Hits` with one extendable dataset per record field and
//! the plane geometry as group attributes.

use crate::format::TableHeader;
use crate::writer::{HitSink, PartialFile};
use crate::{Error, Result};
use hdf5::types::{H5Type, VarLenUnicode};
use hdf5::{Dataset, File, Group};
use ndarray::{s, ArrayView1};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tbsim_core::{DigitizedHit, HitBatch};

const GROUP: &str = "Hits";

/// Dataset layout options.
#[derive(Clone, Debug)]
pub struct Hdf5WriteOptions {
    /// Chunk length of each dataset (hits).
    pub chunk_hits: usize,
    /// Deflate level, if any.
    pub compression: Option<u8>,
    /// Apply the shuffle filter.
    pub shuffle: bool,
}

impl Default for Hdf5WriteOptions {
    fn default() -> Self {
        Self {
            chunk_hits: 100_000,
            compression: Some(1),
            shuffle: true,
        }
    }
}

struct HitDatasets {
    event_number: Dataset,
    frame: Dataset,
    column: Dataset,
    row: Dataset,
    charge: Dataset,
}

/// Streaming HDF5 hit-table writer.
pub struct Hdf5HitSink {
    file: File,
    datasets: HitDatasets,
    written: usize,
    guard: PartialFile,
}

impl Hdf5HitSink {
    /// Create a table for `header` that will be published at `path`.
    ///
    /// # Errors
    /// Returns an error if the HDF5 file or datasets cannot be created.
    pub fn create<P: AsRef<Path>>(
        path: P,
        header: &TableHeader,
        options: &Hdf5WriteOptions,
    ) -> Result<Self> {
        let guard = PartialFile::new(path.as_ref());
        let file = File::create(guard.path())?;
        let group = file.create_group(GROUP)?;
        group
            .new_attr::<u32>()
            .create("n_columns")?
            .write_scalar(&header.n_columns)?;
        group
            .new_attr::<u32>()
            .create("n_rows")?
            .write_scalar(&header.n_rows)?;
        group
            .new_attr::<u16>()
            .create("plane_index")?
            .write_scalar(&header.plane_index)?;

        let datasets = HitDatasets {
            event_number: create_extendable_dataset::<i64>(&group, "event_number", options)?,
            frame: create_extendable_dataset::<u8>(&group, "frame", options)?,
            column: create_extendable_dataset::<u16>(&group, "column", options)?,
            row: create_extendable_dataset::<u16>(&group, "row", options)?,
            charge: create_extendable_dataset::<u16>(&group, "charge", options)?,
        };
        set_dataset_units(&datasets.column, "pixel")?;
        set_dataset_units(&datasets.row, "pixel")?;
        set_dataset_units(&datasets.charge, "10 electrons")?;

        Ok(Self {
            file,
            datasets,
            written: 0,
            guard,
        })
    }
}

impl HitSink for Hdf5HitSink {
    fn append(&mut self, hits: &HitBatch) -> Result<()> {
        if hits.is_empty() {
            return Ok(());
        }
        let records: Vec<DigitizedHit> = hits.records().collect();
        let offset = self.written;
        append_slice(&self.datasets.event_number, offset, &hits.event_number)?;
        append_slice(
            &self.datasets.frame,
            offset,
            &records.iter().map(|h| h.frame).collect::<Vec<_>>(),
        )?;
        append_slice(&self.datasets.column, offset, &hits.column)?;
        append_slice(&self.datasets.row, offset, &hits.row)?;
        append_slice(
            &self.datasets.charge,
            offset,
            &records.iter().map(|h| h.charge).collect::<Vec<_>>(),
        )?;
        self.written += hits.len();
        Ok(())
    }

    fn hits_written(&self) -> u64 {
        self.written as u64
    }

    fn finish(self: Box<Self>) -> Result<PathBuf> {
        let Self {
            file,
            datasets,
            guard,
            ..
        } = *self;
        file.flush()?;
        // Open dataset handles keep the file alive
        drop(datasets);
        file.close()?;
        guard.commit()
    }
}

/// Read a table written by [`Hdf5HitSink`].
///
/// # Errors
/// Returns an error if HDF5 I/O fails or the datasets differ in length.
pub fn read_hits_hdf5<P: AsRef<Path>>(path: P) -> Result<(TableHeader, Vec<DigitizedHit>)> {
    let file = File::open(path)?;
    let group = file.group(GROUP)?;
    let header = TableHeader {
        plane_index: group.attr("plane_index")?.read_scalar::<u16>()?,
        n_columns: group.attr("n_columns")?.read_scalar::<u32>()?,
        n_rows: group.attr("n_rows")?.read_scalar::<u32>()?,
    };

    let event_number = read_dataset_vec::<i64>(&group, "event_number")?;
    let frame = read_dataset_vec::<u8>(&group, "frame")?;
    let column = read_dataset_vec::<u16>(&group, "column")?;
    let row = read_dataset_vec::<u16>(&group, "row")?;
    let charge = read_dataset_vec::<u16>(&group, "charge")?;

    let n = event_number.len();
    if [frame.len(), column.len(), row.len(), charge.len()]
        .iter()
        .any(|&len| len != n)
    {
        return Err(Error::InvalidFormat(
            "hit datasets differ in length".to_string(),
        ));
    }

    let hits = (0..n)
        .map(|i| DigitizedHit {
            event_number: event_number[i],
            frame: frame[i],
            column: column[i],
            row: row[i],
            charge: charge[i],
        })
        .collect();
    Ok((header, hits))
}

fn create_extendable_dataset<T: H5Type>(
    group: &Group,
    name: &str,
    options: &Hdf5WriteOptions,
) -> Result<Dataset> {
    let mut builder = group
        .new_dataset::<T>()
        .shape((0..,))
        .chunk((options.chunk_hits,));

    if let Some(level) = options.compression {
        builder = builder.deflate(level);
    }

    if options.shuffle {
        builder = builder.shuffle();
    }

    Ok(builder.create(name)?)
}

fn append_slice<T: H5Type>(dataset: &Dataset, offset: usize, data: &[T]) -> Result<()> {
    if data.is_empty() {
        return Ok(());
    }
    let new_len = offset + data.len();
    dataset.resize((new_len,))?;
    let view = ArrayView1::from(data);
    dataset.write_slice(view, s![offset..new_len])?;
    Ok(())
}

fn set_dataset_units(dataset: &Dataset, units: &str) -> Result<()> {
    let value = to_var_len_unicode(units)?;
    dataset
        .new_attr::<VarLenUnicode>()
        .create("units")?
        .write_scalar(&value)?;
    Ok(())
}

fn read_dataset_vec<T: H5Type>(group: &Group, name: &str) -> Result<Vec<T>> {
    let dataset = group.dataset(name)?;
    Ok(dataset.read_raw::<T>()?)
}

fn to_var_len_unicode(value: &str) -> Result<VarLenUnicode> {
    VarLenUnicode::from_str(value)
        .map_err(|e| Error::InvalidFormat(format!("invalid utf-8 attribute: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::partial_path;
    use tempfile::tempdir;

    #[test]
    fn test_hdf5_hit_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run_DUT0.h5");
        let header = TableHeader {
            plane_index: 0,
            n_columns: 80,
            n_rows: 336,
        };

        let mut batch = HitBatch::default();
        batch.push(0, 1, 2, 7700.0);
        batch.push(1, 3, 4, 120.0);

        let mut sink = Box::new(
            Hdf5HitSink::create(&path, &header, &Hdf5WriteOptions::default()).unwrap(),
        );
        sink.append(&batch).unwrap();
        sink.append(&batch).unwrap();
        assert!(partial_path(&path).exists());
        sink.finish().unwrap();
        assert!(!partial_path(&path).exists());

        let (read_header, hits) = read_hits_hdf5(&path).unwrap();
        assert_eq!(read_header, header);
        assert_eq!(hits.len(), 4);
        assert_eq!(hits[1].charge, 12);
        assert_eq!(hits[3].event_number, 1);
        assert!(hits.iter().all(|h| h.frame == 0));
    }
}
