//! tbsim-io: Chunked output of simulated hit tables.
//!
//! This crate drives a simulation run chunk by chunk and streams the hits
//! of every plane into its own table, either packed binary (read back with
//! memory-mapped I/O via memmap2) or HDF5 behind the `hdf5` feature.
//!

mod chunked;
mod error;
pub mod format;
#[cfg(feature = "hdf5")]
pub mod hdf5;
mod reader;
mod writer;

pub use chunked::{estimate_bytes_per_event, ChunkPlan, ChunkedWriter, OutputFormat, RunSummary};
pub use error::{Error, Result};
pub use format::TableHeader;
#[cfg(feature = "hdf5")]
pub use hdf5::{read_hits_hdf5, Hdf5HitSink, Hdf5WriteOptions};
pub use reader::{HitTableReader, MappedFileReader, TableSummary};
pub use writer::{partial_path, BinaryHitSink, HitSink, PartialFile};
