//! Chunked simulation runs written to per-plane hit tables.

use crate::format::TableHeader;
use crate::writer::{BinaryHitSink, HitSink};
use crate::{Error, Result};
use log::{debug, info, warn};
use std::fmt;
use std::mem::size_of;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use sysinfo::System;
use tbsim_core::SimulationConfig;
use tbsim_physics::sharing::CLUSTER_CAPACITY_HINT;
use tbsim_physics::{run_rng, ChunkSimulator, DigitizationStatistics};

const MEMORY_OVERHEAD_FACTOR: f64 = 1.2;

/// Bytes held per simulated track (`TrackBatch` and intersection columns).
const TRACK_BYTES: usize = size_of::<i64>() + 6 * size_of::<f64>();

/// Bytes held per digitized pixel (`HitBatch` columns and cluster entry).
const PIXEL_BYTES: usize =
    size_of::<i64>() + 2 * size_of::<u16>() + 2 * size_of::<f64>() + 2 * size_of::<i32>();

/// On-disk format of the hit tables.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Packed binary records (see [`crate::format`]).
    #[default]
    Binary,
    /// HDF5 datasets.
    #[cfg(feature = "hdf5")]
    Hdf5,
}

impl OutputFormat {
    /// File extension without the dot.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Binary => "bin",
            #[cfg(feature = "hdf5")]
            Self::Hdf5 => "h5",
        }
    }

    fn create_sink(self, path: &Path, header: &TableHeader) -> Result<Box<dyn HitSink>> {
        match self {
            Self::Binary => Ok(Box::new(BinaryHitSink::create(path, header)?)),
            #[cfg(feature = "hdf5")]
            Self::Hdf5 => Ok(Box::new(crate::hdf5::Hdf5HitSink::create(
                path,
                header,
                &crate::hdf5::Hdf5WriteOptions::default(),
            )?)),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "bin" | "binary" => Ok(Self::Binary),
            #[cfg(feature = "hdf5")]
            "h5" | "hdf5" => Ok(Self::Hdf5),
            other => Err(Error::InvalidFormat(format!(
                "unsupported output format '{other}'"
            ))),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// How many events are simulated per chunk.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ChunkPlan {
    /// Fixed number of events per chunk.
    Fixed(usize),
    /// Derive the chunk size from a fraction of the available memory.
    Auto {
        /// Fraction of available system memory to target (0.0 < fraction <= 1.0).
        memory_fraction: f64,
    },
}

impl Default for ChunkPlan {
    fn default() -> Self {
        Self::Auto {
            memory_fraction: 0.25,
        }
    }
}

impl ChunkPlan {
    /// Resolve the chunk size for a run of `total_events`.
    ///
    /// # Errors
    /// Returns an error for a zero fixed size, an invalid memory fraction or
    /// if system memory cannot be queried.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn resolve(&self, config: &SimulationConfig, total_events: u64) -> Result<usize> {
        let chunk = match *self {
            Self::Fixed(0) => {
                return Err(tbsim_core::Error::invalid_config(
                    "chunk_size",
                    "must be at least 1",
                )
                .into())
            }
            Self::Fixed(size) => size,
            Self::Auto { memory_fraction } => {
                if !(0.0 < memory_fraction && memory_fraction <= 1.0) {
                    return Err(tbsim_core::Error::invalid_config(
                        "memory_fraction",
                        "must be in (0.0, 1.0]",
                    )
                    .into());
                }
                let mut system = System::new();
                system.refresh_memory();
                let available = system.available_memory();
                if available == 0 {
                    return Err(Error::Io(std::io::Error::other(
                        "available system memory reported as 0",
                    )));
                }
                let budget = available as f64 * memory_fraction;
                let size = (budget / estimate_bytes_per_event(config) as f64).floor() as u64;
                let size = size.clamp(1, total_events.max(1));
                debug!("Memory budget {budget:.0} bytes -> {size} events per chunk");
                usize::try_from(size).unwrap_or(usize::MAX)
            }
        };
        Ok(chunk)
    }
}

/// Rough peak memory per simulated event.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
pub fn estimate_bytes_per_event(config: &SimulationConfig) -> usize {
    let beam = &config.beam;
    let tracks = (beam.tracks_per_event + beam.tracks_per_event_sigma).max(1.0);
    let pixels_per_track = if beam.charge_sharing {
        CLUSTER_CAPACITY_HINT as f64
    } else {
        1.0
    };
    let per_track =
        TRACK_BYTES as f64 + config.n_planes() as f64 * pixels_per_track * PIXEL_BYTES as f64;
    (tracks * per_track * MEMORY_OVERHEAD_FACTOR).ceil() as usize
}

/// Outcome of a completed run.
#[derive(Clone, Debug, Default)]
pub struct RunSummary {
    /// Seed the run was generated with.
    pub seed: u64,
    /// Number of simulated events.
    pub events: u64,
    /// Number of chunks.
    pub chunks: usize,
    /// Events per chunk.
    pub chunk_size: usize,
    /// Published tables, one per plane.
    pub files: Vec<PathBuf>,
    /// Hits written per plane.
    pub hits_per_plane: Vec<u64>,
    /// Digitization counters per plane, summed over chunks.
    pub statistics_per_plane: Vec<DigitizationStatistics>,
}

/// Drives a simulation over windows of events and streams the hits to disk.
#[derive(Debug, Clone)]
pub struct ChunkedWriter {
    simulator: ChunkSimulator,
    format: OutputFormat,
}

impl ChunkedWriter {
    /// Validate `config` and prepare a writer.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        Ok(Self {
            simulator: ChunkSimulator::new(config)?,
            format: OutputFormat::default(),
        })
    }

    /// Select the output format.
    #[must_use]
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Run configuration.
    #[must_use]
    pub fn config(&self) -> &SimulationConfig {
        self.simulator.config()
    }

    /// Table path of plane `index`: `{base}_DUT{index}.{ext}`.
    #[must_use]
    pub fn output_path(base: &Path, index: usize, format: OutputFormat) -> PathBuf {
        let mut name = base.as_os_str().to_owned();
        name.push(format!("_DUT{index}.{}", format.extension()));
        PathBuf::from(name)
    }

    /// Simulate `total_events` events in windows of `chunk_size`.
    ///
    /// The last window is shortened so exactly `total_events` are produced.
    /// Tables only appear under their final names if the whole run succeeds.
    ///
    /// # Errors
    /// Returns an error for a zero chunk size or if any table cannot be
    /// written; no final-named table is left behind in that case.
    pub fn produce(
        &self,
        base: impl AsRef<Path>,
        total_events: u64,
        chunk_size: usize,
    ) -> Result<RunSummary> {
        if chunk_size == 0 {
            return Err(
                tbsim_core::Error::invalid_config("chunk_size", "must be at least 1").into(),
            );
        }
        let base = base.as_ref();
        let config = self.simulator.config();
        let (mut rng, seed) = run_rng(config.seed);
        info!(
            "Simulating {total_events} events on {} planes (seed {seed}, {chunk_size} events per chunk)",
            config.n_planes()
        );

        let mut sinks = config
            .planes
            .iter()
            .enumerate()
            .map(|(index, plane)| {
                let header = TableHeader::for_plane(index, plane)?;
                self.format
                    .create_sink(&Self::output_path(base, index, self.format), &header)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut statistics = vec![DigitizationStatistics::default(); sinks.len()];
        let mut done: u64 = 0;
        let mut chunks = 0;
        while done < total_events {
            let n_events = usize::try_from(total_events - done)
                .unwrap_or(usize::MAX)
                .min(chunk_size);
            let first_event = i64::try_from(done).map_err(|_| {
                Error::InvalidFormat(format!("event number {done} exceeds i64"))
            })?;

            let planes = self.simulator.simulate_chunk(&mut rng, first_event, n_events);
            for ((sink, plane), stats) in sinks.iter_mut().zip(&planes).zip(&mut statistics) {
                sink.append(&plane.hits)?;
                *stats += plane.stats;
            }

            done += n_events as u64;
            chunks += 1;
            debug!("Chunk {chunks}: {done}/{total_events} events");
        }

        let hits_per_plane: Vec<u64> = sinks.iter().map(|s| s.hits_written()).collect();
        let files = finish_all(sinks)?;

        for (index, (hits, stats)) in hits_per_plane.iter().zip(&statistics).enumerate() {
            info!(
                "DUT{index}: {hits} hits, mean cluster size {:.2}",
                stats.mean_cluster_size()
            );
        }

        Ok(RunSummary {
            seed,
            events: total_events,
            chunks,
            chunk_size,
            files,
            hits_per_plane,
            statistics_per_plane: statistics,
        })
    }

    /// Like [`Self::produce`] with the chunk size taken from `plan`.
    ///
    /// # Errors
    /// Returns an error if the plan cannot be resolved or the run fails.
    pub fn produce_with_plan(
        &self,
        base: impl AsRef<Path>,
        total_events: u64,
        plan: &ChunkPlan,
    ) -> Result<RunSummary> {
        let chunk_size = plan.resolve(self.config(), total_events)?;
        self.produce(base, total_events, chunk_size)
    }
}

/// Publish every table, or none: tables already renamed are removed again
/// if a later one fails.
fn finish_all(sinks: Vec<Box<dyn HitSink>>) -> Result<Vec<PathBuf>> {
    let mut files = Vec::with_capacity(sinks.len());
    for sink in sinks {
        match sink.finish() {
            Ok(path) => files.push(path),
            Err(e) => {
                for path in &files {
                    if let Err(remove) = std::fs::remove_file(path) {
                        warn!("Failed to remove {}: {remove}", path.display());
                    }
                }
                return Err(e);
            }
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_path() {
        let path = ChunkedWriter::output_path(Path::new("out/run"), 3, OutputFormat::Binary);
        assert_eq!(path, PathBuf::from("out/run_DUT3.bin"));
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("bin".parse::<OutputFormat>().unwrap(), OutputFormat::Binary);
        assert_eq!("BINARY".parse::<OutputFormat>().unwrap(), OutputFormat::Binary);
        assert!("csv".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_fixed_plan() {
        let config = SimulationConfig::default();
        assert_eq!(ChunkPlan::Fixed(293).resolve(&config, 10).unwrap(), 293);
        assert!(ChunkPlan::Fixed(0).resolve(&config, 10).is_err());
    }

    #[test]
    fn test_auto_plan_bounded_by_total() {
        let config = SimulationConfig::default();
        let size = ChunkPlan::Auto {
            memory_fraction: 0.1,
        }
        .resolve(&config, 1000)
        .unwrap();
        assert!((1..=1000).contains(&size));

        for memory_fraction in [0.0, 1.5, f64::NAN] {
            let invalid = ChunkPlan::Auto { memory_fraction };
            assert!(matches!(
                invalid.resolve(&config, 1000),
                Err(Error::Core(tbsim_core::Error::InvalidConfig { ref field, .. }))
                    if field == "memory_fraction"
            ));
        }
    }

    #[test]
    fn test_bytes_per_event_grows_with_sharing() {
        let mut config = SimulationConfig::default();
        let shared = estimate_bytes_per_event(&config);
        config.beam.charge_sharing = false;
        assert!(estimate_bytes_per_event(&config) < shared);
    }
}
