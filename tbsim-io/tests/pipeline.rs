//! End-to-end runs: simulate, write per-plane tables and read them back.

use std::fs;
use tbsim_core::{BeamConfig, SimulationConfig};
use tbsim_io::{partial_path, ChunkPlan, ChunkedWriter, HitTableReader, OutputFormat};
use tempfile::tempdir;

/// One track per event, always inside the sensor, every pixel kept.
fn deterministic_config() -> SimulationConfig {
    SimulationConfig::default()
        .with_beam(
            BeamConfig::default()
                .with_position(10_000.0, 10_000.0)
                .with_position_sigma(1000.0, 1000.0)
                .with_tracks_per_event(1.0, 0.0)
                .with_charge_sharing(false),
        )
        .map_planes(|_, plane| {
            plane
                .with_efficiency(1.0)
                .with_noise_and_threshold(0.0, 0.0)
        })
        .with_seed(7)
}

#[test]
fn chunked_and_unchunked_runs_agree() {
    let dir = tempdir().unwrap();
    let writer = ChunkedWriter::new(deterministic_config()).unwrap();

    let chunked = writer.produce(dir.path().join("chunked"), 1000, 293).unwrap();
    let single = writer.produce(dir.path().join("single"), 1000, 1000).unwrap();

    assert_eq!(chunked.chunks, 4);
    assert_eq!(single.chunks, 1);
    assert_eq!(chunked.hits_per_plane, vec![1000; 6]);
    assert_eq!(chunked.hits_per_plane, single.hits_per_plane);

    for (a, b) in chunked.files.iter().zip(&single.files) {
        let a = HitTableReader::open(a).unwrap();
        let b = HitTableReader::open(b).unwrap();
        assert_eq!(a.header(), b.header());
        assert_eq!(a.len(), b.len());

        let (sa, sb) = (a.summary(), b.summary());
        assert_eq!(sa.event_range, Some((0, 999)));
        assert_eq!(sb.event_range, Some((0, 999)));
        assert!((sa.mean_column - sb.mean_column).abs() < 3.0);
        assert!((sa.mean_row - sb.mean_row).abs() < 3.0);
        assert!((sa.mean_charge_e - sb.mean_charge_e).abs() / sb.mean_charge_e < 0.1);
    }
}

#[test]
fn event_numbers_continue_across_chunks() {
    let dir = tempdir().unwrap();
    let writer = ChunkedWriter::new(deterministic_config()).unwrap();
    let summary = writer.produce(dir.path().join("run"), 700, 293).unwrap();

    let reader = HitTableReader::open(&summary.files[0]).unwrap();
    let events: Vec<i64> = reader.records().map(|h| h.event_number).collect();
    assert_eq!(events, (0..700).collect::<Vec<i64>>());
}

#[test]
fn same_seed_same_chunk_size_identical_files() {
    let dir = tempdir().unwrap();
    let config = SimulationConfig::default().with_seed(42);
    let writer = ChunkedWriter::new(config).unwrap();

    let first = writer.produce(dir.path().join("a"), 500, 100).unwrap();
    let second = writer.produce(dir.path().join("b"), 500, 100).unwrap();
    assert_eq!(first.seed, 42);

    for (a, b) in first.files.iter().zip(&second.files) {
        assert_eq!(fs::read(a).unwrap(), fs::read(b).unwrap());
    }
}

#[test]
fn tables_named_per_plane_and_within_bounds() {
    let dir = tempdir().unwrap();
    let config = SimulationConfig::default()
        .with_beam(BeamConfig::default().with_position_sigma(30_000.0, 30_000.0))
        .map_planes(|_, plane| plane.with_pixels(336, 80).with_pitch(50.0, 250.0))
        .with_seed(3);
    let writer = ChunkedWriter::new(config).unwrap();
    let base = dir.path().join("telescope");
    let summary = writer.produce(&base, 2000, 512).unwrap();

    for (index, file) in summary.files.iter().enumerate() {
        assert_eq!(
            file,
            &ChunkedWriter::output_path(&base, index, OutputFormat::Binary)
        );
        assert!(file.ends_with(format!("telescope_DUT{index}.bin")));
        assert!(!partial_path(file).exists());

        let reader = HitTableReader::open(file).unwrap();
        assert_eq!(reader.header().plane_index as usize, index);
        assert!(reader
            .records()
            .all(|h| (1..=336).contains(&h.column) && (1..=80).contains(&h.row) && h.frame == 0));
    }
    assert!(summary.statistics_per_plane.iter().any(|s| s.out_of_bounds > 0));
}

#[test]
fn failed_run_leaves_no_tables() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("broken");
    let writer = ChunkedWriter::new(deterministic_config()).unwrap();

    // A directory in place of the second table makes its creation fail
    let second = ChunkedWriter::output_path(&base, 1, OutputFormat::Binary);
    fs::create_dir(partial_path(&second)).unwrap();

    assert!(writer.produce(&base, 100, 10).is_err());
    let first = ChunkedWriter::output_path(&base, 0, OutputFormat::Binary);
    assert!(!first.exists());
    assert!(!partial_path(&first).exists());
    assert!(!second.exists());
}

#[test]
fn zero_chunk_size_rejected() {
    let dir = tempdir().unwrap();
    let writer = ChunkedWriter::new(deterministic_config()).unwrap();
    assert!(writer.produce(dir.path().join("run"), 10, 0).is_err());
    assert!(fs::read_dir(dir.path()).unwrap().next().is_none());
}

#[test]
fn automatic_chunk_size() {
    let dir = tempdir().unwrap();
    let writer = ChunkedWriter::new(deterministic_config()).unwrap();
    let summary = writer
        .produce_with_plan(
            dir.path().join("auto"),
            300,
            &ChunkPlan::Auto {
                memory_fraction: 0.05,
            },
        )
        .unwrap();
    assert_eq!(summary.events, 300);
    assert!(summary.chunk_size >= 1 && summary.chunk_size <= 300);
    assert_eq!(summary.hits_per_plane, vec![300; 6]);
}

#[test]
fn empty_run_publishes_empty_tables() {
    let dir = tempdir().unwrap();
    let writer = ChunkedWriter::new(deterministic_config()).unwrap();
    let summary = writer.produce(dir.path().join("empty"), 0, 100).unwrap();
    assert_eq!(summary.chunks, 0);
    for file in &summary.files {
        assert!(HitTableReader::open(file).unwrap().is_empty());
    }
}
