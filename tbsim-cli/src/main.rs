//! tbsim CLI - Monte-Carlo simulation of pixel testbeam telescopes.
//!
//! Writes one hit table per detector plane.
#![allow(clippy::uninlined_format_args)]

use clap::{Parser, Subcommand, ValueEnum};
use log::{info, LevelFilter};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tbsim_core::SimulationConfig;
use tbsim_io::{ChunkPlan, ChunkedWriter, HitTableReader, OutputFormat, TableSummary};
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error: {0}")]
    TbsimIo(#[from] tbsim_io::Error),

    #[error("Configuration error: {0}")]
    Core(#[from] tbsim_core::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Usage(String),
}

/// Hit table format.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    /// Packed little-endian records
    Bin,
    /// HDF5 datasets (requires the `hdf5` feature)
    H5,
}

impl Format {
    fn output_format(self) -> Result<OutputFormat> {
        match self {
            Self::Bin => Ok(OutputFormat::Binary),
            #[cfg(feature = "hdf5")]
            Self::H5 => Ok(OutputFormat::Hdf5),
            #[cfg(not(feature = "hdf5"))]
            Self::H5 => Err(CliError::Usage(
                "HDF5 output requires building with the `hdf5` feature".to_string(),
            )),
        }
    }
}

/// Monte-Carlo testbeam telescope simulator.
#[derive(Parser)]
#[command(name = "tbsim")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate events and write one hit table per plane
    Simulate {
        /// Output base name; tables are written to <BASE>_DUT<i>.<ext>
        #[arg(short, long)]
        output: PathBuf,

        /// Number of events
        #[arg(short = 'n', long)]
        events: u64,

        /// JSON configuration file (missing fields take default values)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Events per chunk
        #[arg(long, conflicts_with = "auto_chunk", default_value = "1000000")]
        chunk_size: usize,

        /// Derive the chunk size from available memory
        #[arg(long)]
        auto_chunk: bool,

        /// Random seed (overrides the configuration)
        #[arg(long)]
        seed: Option<u64>,

        /// Output table format
        #[arg(short, long, value_enum, default_value = "bin")]
        format: Format,

        /// Disable charge sharing between pixels
        #[arg(long)]
        no_charge_sharing: bool,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Show information about a hit table
    Info {
        /// Input table
        input: PathBuf,
    },

    /// Print the default configuration as JSON
    DefaultConfig,
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(default)
        .parse_default_env()
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate {
            output,
            events,
            config,
            chunk_size,
            auto_chunk,
            seed,
            format,
            no_charge_sharing,
            verbose,
        } => {
            init_logging(verbose);

            let mut config = match &config {
                Some(path) => SimulationConfig::from_file(path)?,
                None => SimulationConfig::default(),
            };
            if let Some(seed) = seed {
                config.seed = Some(seed);
            }
            if no_charge_sharing {
                config.beam.charge_sharing = false;
            }

            let plan = if auto_chunk {
                ChunkPlan::default()
            } else {
                ChunkPlan::Fixed(chunk_size)
            };

            let start = Instant::now();
            let writer = ChunkedWriter::new(config)?.with_format(format.output_format()?);
            let summary = writer.produce_with_plan(&output, events, &plan)?;
            let elapsed = start.elapsed();

            info!(
                "Simulated {} events in {} chunks of {} ({:.2} s, seed {})",
                summary.events,
                summary.chunks,
                summary.chunk_size,
                elapsed.as_secs_f64(),
                summary.seed
            );
            for (file, hits) in summary.files.iter().zip(&summary.hits_per_plane) {
                println!("{}: {} hits", file.display(), hits);
            }
        }

        Commands::Info { input } => {
            let summary = table_summary(&input)?;
            println!("File: {}", input.display());
            println!("Hits: {}", summary.hits);
            match summary.event_range {
                Some((first, last)) => println!("Events: {} .. {}", first, last),
                None => println!("Events: none"),
            }
            println!("Mean column: {:.2}", summary.mean_column);
            println!("Mean row: {:.2}", summary.mean_row);
            println!("Mean charge: {:.1} e", summary.mean_charge_e);
        }

        Commands::DefaultConfig => {
            println!(
                "{}",
                serde_json::to_string_pretty(&SimulationConfig::default())?
            );
        }
    }

    Ok(())
}

#[cfg(feature = "hdf5")]
fn table_summary(path: &Path) -> Result<TableSummary> {
    let is_hdf5 = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("h5"));
    if !is_hdf5 {
        return Ok(HitTableReader::open(path)?.summary());
    }

    let (_, hits) = tbsim_io::read_hits_hdf5(path)?;
    Ok(TableSummary::from_hits(&hits))
}

#[cfg(not(feature = "hdf5"))]
fn table_summary(path: &Path) -> Result<TableSummary> {
    Ok(HitTableReader::open(path)?.summary())
}
