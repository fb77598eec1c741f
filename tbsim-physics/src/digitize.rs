//! Conversion of continuous plane intersections into pixel hits.
//!
//! Per plane the pipeline discretizes each intersection into a seed pixel,
//! attaches a deposited charge, optionally spreads it over a cluster, masks
//! pixels outside the sensor, applies detection inefficiency and noise, and
//! finally cuts on the detection threshold.

use crate::deposit::ChargeDepositModel;
use crate::projection::Intersections;
use crate::sharing::{ChargeSharingEngine, ClusterPixel, CLUSTER_CAPACITY_HINT};
use log::{debug, warn};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use std::ops::AddAssign;
use tbsim_core::{BeamConfig, Error, HitBatch, PlaneConfig, Result};

/// Counters collected while digitizing one plane.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DigitizationStatistics {
    /// Intersections that became seed pixels.
    pub seeds: usize,
    /// Tracks that never reach the plane (non-finite intersection).
    pub missed_plane: usize,
    /// Pixels produced by charge sharing (equal to `seeds` without sharing).
    pub cluster_pixels: usize,
    /// Clusters cut off by the search radius with charge left uncollected.
    pub truncated_clusters: usize,
    /// Pixels outside the sensor.
    pub out_of_bounds: usize,
    /// Pixels removed by detection inefficiency.
    pub inefficient: usize,
    /// Pixels below the detection threshold after noise.
    pub below_threshold: usize,
    /// Pixels written out.
    pub hits: usize,
}

impl AddAssign for DigitizationStatistics {
    fn add_assign(&mut self, other: Self) {
        self.seeds += other.seeds;
        self.missed_plane += other.missed_plane;
        self.cluster_pixels += other.cluster_pixels;
        self.truncated_clusters += other.truncated_clusters;
        self.out_of_bounds += other.out_of_bounds;
        self.inefficient += other.inefficient;
        self.below_threshold += other.below_threshold;
        self.hits += other.hits;
    }
}

impl DigitizationStatistics {
    /// Mean number of pixels per seed.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean_cluster_size(&self) -> f64 {
        if self.seeds == 0 {
            0.0
        } else {
            self.cluster_pixels as f64 / self.seeds as f64
        }
    }
}

/// Digitized output of one plane for one chunk.
#[derive(Clone, Debug, Default)]
pub struct DigitizedPlane {
    /// Hits that survived all selection steps.
    pub hits: HitBatch,
    /// Counters of the digitization steps.
    pub stats: DigitizationStatistics,
}

/// 1-based pixel index of a local position.
///
/// Ties round to even, matching the numpy convention used by existing
/// analyses of simulated data.
#[inline]
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn pixel_index(position: f64, pitch: f64) -> i64 {
    (position / pitch - 0.5).round_ties_even() as i64 + 1
}

/// Position relative to the centre of the 1-based pixel `index`.
#[inline]
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn offset_in_pixel(position: f64, index: i64, pitch: f64) -> f64 {
    position - (index as f64 - 0.5) * pitch
}

/// Detector response of one plane.
#[derive(Debug, Clone)]
pub struct Digitizer {
    plane: PlaneConfig,
    deposit: ChargeDepositModel,
    sharing: Option<ChargeSharingEngine>,
    noise: Option<Normal<f64>>,
}

/// Seed pixel before masking (indices may lie outside the sensor).
#[derive(Debug, Clone, Copy)]
struct Seed {
    event_number: i64,
    column: i64,
    row: i64,
    offset: [f64; 2],
}

impl Digitizer {
    /// Create the response model of `plane` under `beam` conditions.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] if the noise sigma is invalid.
    pub fn new(plane: &PlaneConfig, beam: &BeamConfig) -> Result<Self> {
        let noise = if plane.noise_e > 0.0 {
            Some(
                Normal::new(0.0, plane.noise_e)
                    .map_err(|e| Error::invalid_config("noise_e", e.to_string()))?,
            )
        } else {
            None
        };
        let sharing = beam
            .charge_sharing
            .then(|| ChargeSharingEngine::for_plane(plane, beam));

        Ok(Self {
            plane: plane.clone(),
            deposit: ChargeDepositModel::new(plane.thickness_um),
            sharing,
            noise,
        })
    }

    /// Plane description.
    #[must_use]
    pub fn plane(&self) -> &PlaneConfig {
        &self.plane
    }

    /// Charge-sharing engine, if sharing is enabled.
    #[must_use]
    pub fn sharing(&self) -> Option<&ChargeSharingEngine> {
        self.sharing.as_ref()
    }

    /// Deposited-charge model of this plane.
    #[must_use]
    pub fn deposit(&self) -> &ChargeDepositModel {
        &self.deposit
    }

    /// Digitize the intersections of one chunk.
    ///
    /// `events[i]` owns the intersection `hits.x[i]`, `hits.y[i]`. Random
    /// numbers are drawn in the order deposits, inefficiency, noise.
    pub fn digitize<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        events: &[i64],
        hits: &Intersections,
    ) -> DigitizedPlane {
        let mut stats = DigitizationStatistics::default();
        let seeds = self.seed_pixels(events, hits);
        stats.seeds = seeds.len();
        stats.missed_plane = hits.len() - seeds.len();

        let charges = self.deposit.sample(rng, seeds.len());

        let mut batch = match &self.sharing {
            Some(engine) => self.shared_pixels(engine, &seeds, &charges, &mut stats),
            None => self.seed_only_pixels(&seeds, &charges, &mut stats),
        };

        stats.inefficient = self.apply_inefficiency(rng, &mut batch);

        if let Some(noise) = &self.noise {
            for charge in &mut batch.charge {
                *charge += noise.sample(rng);
            }
        }

        let threshold = self.plane.threshold_e;
        let keep: Vec<bool> = batch.charge.iter().map(|&c| c >= threshold).collect();
        stats.below_threshold = batch.retain_mask(&keep);
        stats.hits = batch.len();

        debug!(
            "Digitized {} seeds into {} pixels, {} kept ({} outside, {} inefficient, {} below threshold)",
            stats.seeds,
            stats.cluster_pixels,
            stats.hits,
            stats.out_of_bounds,
            stats.inefficient,
            stats.below_threshold
        );

        DigitizedPlane { hits: batch, stats }
    }

    fn seed_pixels(&self, events: &[i64], hits: &Intersections) -> Vec<Seed> {
        let [offset_x, offset_y] = self.plane.offset_um;
        let [pitch_x, pitch_y] = self.plane.pitch_um;

        events
            .iter()
            .zip(hits.x.iter().zip(&hits.y))
            .filter(|(_, (x, y))| x.is_finite() && y.is_finite())
            .map(|(&event_number, (&x, &y))| {
                let x = x - offset_x;
                let y = y - offset_y;
                let column = pixel_index(x, pitch_x);
                let row = pixel_index(y, pitch_y);
                Seed {
                    event_number,
                    column,
                    row,
                    offset: [
                        offset_in_pixel(x, column, pitch_x),
                        offset_in_pixel(y, row, pitch_y),
                    ],
                }
            })
            .collect()
    }

    fn seed_only_pixels(
        &self,
        seeds: &[Seed],
        charges: &[f64],
        stats: &mut DigitizationStatistics,
    ) -> HitBatch {
        stats.cluster_pixels = seeds.len();
        let mut batch = HitBatch::with_capacity(seeds.len());
        for (seed, &charge) in seeds.iter().zip(charges) {
            if !self.push_masked(&mut batch, seed.event_number, seed.column, seed.row, charge) {
                stats.out_of_bounds += 1;
            }
        }
        batch
    }

    fn shared_pixels(
        &self,
        engine: &ChargeSharingEngine,
        seeds: &[Seed],
        charges: &[f64],
        stats: &mut DigitizationStatistics,
    ) -> HitBatch {
        // Cluster search draws no random numbers; ordered collect keeps
        // the output independent of the thread count
        let searches: Vec<(Vec<ClusterPixel>, bool)> = seeds
            .par_iter()
            .map(|seed| {
                let mut pixels = Vec::with_capacity(CLUSTER_CAPACITY_HINT);
                let outcome = engine.cluster_into(seed.offset, &mut pixels);
                (pixels, outcome.truncated)
            })
            .collect();

        stats.truncated_clusters = searches.iter().filter(|(_, truncated)| *truncated).count();
        if stats.truncated_clusters > 0 {
            warn!(
                "{} clusters reached the search radius of {} pixels; their remaining charge is dropped",
                stats.truncated_clusters,
                engine.max_search_radius()
            );
        }
        let clusters: Vec<Vec<ClusterPixel>> =
            searches.into_iter().map(|(pixels, _)| pixels).collect();

        stats.cluster_pixels = clusters.iter().map(Vec::len).sum();
        let mut batch = HitBatch::with_capacity(stats.cluster_pixels);
        for ((seed, &charge), cluster) in seeds.iter().zip(charges).zip(&clusters) {
            for pixel in cluster {
                let inside = self.push_masked(
                    &mut batch,
                    seed.event_number,
                    seed.column + i64::from(pixel.d_column),
                    seed.row + i64::from(pixel.d_row),
                    charge * pixel.fraction,
                );
                if !inside {
                    stats.out_of_bounds += 1;
                }
            }
        }
        batch
    }

    /// Push the pixel if it lies on the sensor; returns false if masked.
    fn push_masked(
        &self,
        batch: &mut HitBatch,
        event_number: i64,
        column: i64,
        row: i64,
        charge: f64,
    ) -> bool {
        match (
            to_sensor_index(column, self.plane.columns()),
            to_sensor_index(row, self.plane.rows()),
        ) {
            (Some(column), Some(row)) => {
                batch.push(event_number, column, row, charge);
                true
            }
            _ => false,
        }
    }

    /// Drop a uniformly random subset of `floor((1 - efficiency) * n)` hits.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    fn apply_inefficiency<R: Rng + ?Sized>(&self, rng: &mut R, batch: &mut HitBatch) -> usize {
        let n = batch.len();
        let n_drop = (((1.0 - self.plane.efficiency) * n as f64).floor() as usize).min(n);
        if n_drop == 0 {
            return 0;
        }
        let mut keep = vec![true; n];
        for index in rand::seq::index::sample(rng, n, n_drop) {
            keep[index] = false;
        }
        batch.retain_mask(&keep)
    }
}

fn to_sensor_index(index: i64, n_pixels: u32) -> Option<u16> {
    if index >= 1 && index <= i64::from(n_pixels) {
        u16::try_from(index).ok()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn intersections(points: &[(f64, f64)]) -> Intersections {
        Intersections {
            x: points.iter().map(|p| p.0).collect(),
            y: points.iter().map(|p| p.1).collect(),
        }
    }

    fn quiet_plane() -> PlaneConfig {
        PlaneConfig::default()
            .with_offset(0.0, 0.0)
            .with_noise_and_threshold(0.0, 0.0)
    }

    #[test]
    fn test_pixel_index_convention() {
        // Pixel 1 covers [0, pitch), centres at (i - 0.5) * pitch
        assert_eq!(pixel_index(0.1, 50.0), 1);
        assert_eq!(pixel_index(49.9, 50.0), 1);
        assert_eq!(pixel_index(50.1, 50.0), 2);
        assert_eq!(pixel_index(-0.1, 50.0), 0);
        // Exact boundaries round half to even
        assert_eq!(pixel_index(50.0, 50.0), 1);
        assert_eq!(pixel_index(100.0, 50.0), 3);
        assert_relative_eq!(offset_in_pixel(30.0, 1, 50.0), 5.0);
        assert_relative_eq!(offset_in_pixel(0.0, 1, 50.0), -25.0);
    }

    #[test]
    fn test_without_sharing_one_pixel_per_hit() {
        let beam = BeamConfig::default().with_charge_sharing(false);
        let digitizer = Digitizer::new(&quiet_plane(), &beam).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        let hits = intersections(&[(24.0, 24.0), (1010.0, 2010.0), (49_999.0, 10.0)]);
        let plane = digitizer.digitize(&mut rng, &[0, 0, 1], &hits);

        assert_eq!(plane.hits.len(), 3);
        assert_eq!(plane.hits.column, vec![1, 21, 1000]);
        assert_eq!(plane.hits.row, vec![1, 41, 1]);
        assert_eq!(plane.hits.event_number, vec![0, 0, 1]);
        assert_eq!(plane.stats.cluster_pixels, 3);
        assert!(plane.hits.charge.iter().all(|&c| c > 0.0));
    }

    #[test]
    fn test_sharing_conserves_charge_and_event() {
        let beam = BeamConfig::default().with_diffusion_correction(5.0);
        let plane = quiet_plane();
        let digitizer = Digitizer::new(&plane, &beam).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(2);

        // Corner of pixel (10, 10)
        let hits = intersections(&[(499.0, 499.0)]);
        let result = digitizer.digitize(&mut rng, &[42], &hits);

        assert_eq!(result.stats.seeds, 1);
        assert!(result.hits.len() > 1);
        assert!(result.hits.event_number.iter().all(|&e| e == 42));

        let mut reference = ChaCha8Rng::seed_from_u64(2);
        let deposited = digitizer.deposit().sample_one(&mut reference);
        let collected: f64 = result.hits.charge.iter().sum();
        assert!(collected <= deposited * (1.0 + 1e-12));
        assert!(collected > deposited * 0.98);
    }

    #[test]
    fn test_counts_truncated_clusters() {
        // Cloud of ~100 um over 1 um columns spills past the search radius
        let beam = BeamConfig::default().with_diffusion_correction(62.0);
        let plane = quiet_plane().with_pitch(1.0, 500.0);
        let digitizer = Digitizer::new(&plane, &beam).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(3);

        let hits = intersections(&[(500.3, 25_100.0)]);
        let result = digitizer.digitize(&mut rng, &[0], &hits);
        assert_eq!(result.stats.truncated_clusters, 1);
        assert!(result.stats.cluster_pixels > 1);

        let beam = BeamConfig::default().with_diffusion_correction(5.0);
        let digitizer = Digitizer::new(&quiet_plane(), &beam).unwrap();
        let result = digitizer.digitize(&mut rng, &[0], &intersections(&[(499.0, 499.0)]));
        assert_eq!(result.stats.truncated_clusters, 0);
    }

    #[test]
    fn test_masks_pixels_outside_sensor() {
        let beam = BeamConfig::default().with_charge_sharing(false);
        let plane = quiet_plane().with_pixels(10, 10);
        let digitizer = Digitizer::new(&plane, &beam).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(3);

        let hits = intersections(&[(-10.0, 10.0), (10.0, 600.0), (10.0, 10.0)]);
        let result = digitizer.digitize(&mut rng, &[0, 1, 2], &hits);
        assert_eq!(result.stats.out_of_bounds, 2);
        assert_eq!(result.hits.event_number, vec![2]);
    }

    #[test]
    fn test_missed_plane_dropped() {
        let beam = BeamConfig::default();
        let digitizer = Digitizer::new(&quiet_plane(), &beam).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(4);

        let hits = intersections(&[(f64::NAN, f64::NAN), (100.0, 100.0)]);
        let result = digitizer.digitize(&mut rng, &[0, 1], &hits);
        assert_eq!(result.stats.missed_plane, 1);
        assert_eq!(result.stats.seeds, 1);
        assert!(result.hits.event_number.iter().all(|&e| e == 1));
    }

    #[test]
    fn test_inefficiency_drops_exact_count() {
        let beam = BeamConfig::default().with_charge_sharing(false);
        let plane = quiet_plane().with_efficiency(0.75);
        let digitizer = Digitizer::new(&plane, &beam).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(5);

        let points: Vec<_> = (0..100).map(|i| (f64::from(i) * 50.0 + 10.0, 10.0)).collect();
        let events: Vec<i64> = (0..100).collect();
        let result = digitizer.digitize(&mut rng, &events, &intersections(&points));
        assert_eq!(result.stats.inefficient, 25);
        assert_eq!(result.hits.len(), 75);
        // Survivors keep their order
        assert!(result.hits.event_number.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_threshold_cut() {
        let beam = BeamConfig::default().with_charge_sharing(false);
        let plane = quiet_plane().with_noise_and_threshold(0.0, 1.0e9);
        let digitizer = Digitizer::new(&plane, &beam).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(6);

        let result = digitizer.digitize(&mut rng, &[0, 1], &intersections(&[(10.0, 10.0), (60.0, 60.0)]));
        assert!(result.hits.is_empty());
        assert_eq!(result.stats.below_threshold, 2);
    }

    #[test]
    fn test_noise_changes_charge() {
        let beam = BeamConfig::default().with_charge_sharing(false);
        let noisy = quiet_plane().with_noise_and_threshold(100.0, f64::NEG_INFINITY);
        let quiet = quiet_plane();
        let points = intersections(&[(10.0, 10.0); 50]);
        let events = vec![0; 50];

        let a = Digitizer::new(&noisy, &beam)
            .unwrap()
            .digitize(&mut ChaCha8Rng::seed_from_u64(7), &events, &points);
        let b = Digitizer::new(&quiet, &beam)
            .unwrap()
            .digitize(&mut ChaCha8Rng::seed_from_u64(7), &events, &points);
        assert_eq!(a.hits.len(), b.hits.len());
        assert!(a.hits.charge.iter().zip(&b.hits.charge).any(|(x, y)| x != y));
    }

    #[test]
    fn test_statistics_accumulate() {
        let mut total = DigitizationStatistics::default();
        total += DigitizationStatistics {
            seeds: 2,
            cluster_pixels: 5,
            hits: 4,
            ..Default::default()
        };
        total += DigitizationStatistics {
            seeds: 2,
            cluster_pixels: 3,
            truncated_clusters: 1,
            hits: 3,
            ..Default::default()
        };
        assert_eq!(total.seeds, 4);
        assert_eq!(total.truncated_clusters, 1);
        assert_eq!(total.hits, 7);
        assert_relative_eq!(total.mean_cluster_size(), 2.0);
    }
}
