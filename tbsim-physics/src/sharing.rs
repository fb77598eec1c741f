//! Charge sharing between neighbouring pixels by thermal diffusion.
//!
//! The charge created by a particle drifts to the readout side of the sensor
//! and spreads into a 2-D Gaussian cloud on the way. All charge is treated as
//! created at mid-depth, so the drift distance is half the sensor thickness.
//! The fraction collected by a pixel is the integral of the cloud over the
//! pixel area; with one common sigma for both axes it factorizes into two
//! one-dimensional bin integrals.
//!
//! # Cluster search
//!
//! Pixels are visited column by column going away from the seed, and within
//! a column row by row going away from the seed row. The search relies on
//! the fraction decreasing monotonically with pixel distance from the seed
//! (true for a Gaussian centred inside the seed pixel) and on all fractions
//! summing to 1: a direction is abandoned as soon as a fraction drops below
//! the minimum or the collected total reaches `1 - min_fraction`. Each
//! direction is additionally capped at `max_search_radius` pixels.

use statrs::function::erf::erf;
use std::f64::consts::SQRT_2;
use tbsim_core::{BeamConfig, PlaneConfig};

/// Boltzmann constant in eV/K.
pub const BOLTZMANN_EV_PER_K: f64 = 8.617_332_4e-5;

/// Pixels receiving less than this fraction of the charge are dropped.
pub const MIN_FRACTION: f64 = 1e-3;

/// Maximum distance (pixels) searched from the seed in any direction.
pub const MAX_SEARCH_RADIUS: i32 = 32;

/// Expected upper bound of pixels per seed, used as capacity hint only.
pub const CLUSTER_CAPACITY_HINT: usize = 5;

/// Diffusion width after drifting `distance` um (Einstein relation).
#[inline]
#[must_use]
pub fn diffusion_sigma(distance: f64, temperature_k: f64, bias_v: f64) -> f64 {
    distance * (2.0 * temperature_k / bias_v * BOLTZMANN_EV_PER_K).sqrt()
}

/// Fraction of a 1-D Gaussian (mean `mu`, width `sigma`) inside `[lower, upper]`.
#[inline]
#[must_use]
pub fn bin_fraction(lower: f64, upper: f64, mu: f64, sigma: f64) -> f64 {
    let scale = SQRT_2 * sigma;
    0.5 * (erf((upper - mu) / scale) - erf((lower - mu) / scale))
}

/// One pixel of a cluster, relative to the seed pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterPixel {
    /// Column offset from the seed.
    pub d_column: i32,
    /// Row offset from the seed.
    pub d_row: i32,
    /// Fraction of the seed charge collected by this pixel.
    pub fraction: f64,
}

/// Expands a single hit into the pixels sharing its charge.
#[derive(Debug, Clone)]
pub struct ChargeSharingEngine {
    sigma: f64,
    pitch: [f64; 2],
    min_fraction: f64,
    max_search_radius: i32,
}

impl ChargeSharingEngine {
    /// Create an engine with an explicit diffusion sigma and pixel pitch (um).
    #[must_use]
    pub fn new(sigma: f64, pitch: [f64; 2]) -> Self {
        Self {
            sigma,
            pitch,
            min_fraction: MIN_FRACTION,
            max_search_radius: MAX_SEARCH_RADIUS,
        }
    }

    /// Engine for a plane, using the beam's temperature and sigma correction.
    #[must_use]
    pub fn for_plane(plane: &PlaneConfig, beam: &BeamConfig) -> Self {
        let drift_distance = plane.thickness_um / 2.0;
        let sigma = diffusion_sigma(drift_distance, beam.temperature_k, plane.bias_v)
            * beam.diffusion_correction;
        Self::new(sigma, plane.pitch_um)
    }

    /// Set the minimum fraction for a pixel to be kept.
    #[must_use]
    pub fn with_min_fraction(mut self, min_fraction: f64) -> Self {
        self.min_fraction = min_fraction;
        self
    }

    /// Set the search cap (pixels per direction, at least 1).
    #[must_use]
    pub fn with_max_search_radius(mut self, radius: i32) -> Self {
        self.max_search_radius = radius.max(1);
        self
    }

    /// Search cap in pixels per direction.
    #[must_use]
    pub fn max_search_radius(&self) -> i32 {
        self.max_search_radius
    }

    /// Diffusion sigma (um).
    #[must_use]
    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    /// Whether the charge cloud has a finite, non-zero width.
    #[must_use]
    pub fn diffuses(&self) -> bool {
        self.sigma > 0.0
    }

    /// Charge fraction collected by the pixel at (`d_column`, `d_row`) from
    /// the seed, for a cloud centred at `offset` from the seed pixel centre.
    #[must_use]
    pub fn fraction(&self, offset: [f64; 2], d_column: i32, d_row: i32) -> f64 {
        if !self.diffuses() {
            return if d_column == 0 && d_row == 0 { 1.0 } else { 0.0 };
        }
        let [pitch_x, pitch_y] = self.pitch;
        let column = f64::from(d_column);
        let row = f64::from(d_row);
        bin_fraction(
            pitch_x * (column - 0.5),
            pitch_x * (column + 0.5),
            offset[0],
            self.sigma,
        ) * bin_fraction(
            pitch_y * (row - 0.5),
            pitch_y * (row + 0.5),
            offset[1],
            self.sigma,
        )
    }

    /// Pixels sharing the charge of a hit at `offset` from the seed centre.
    #[must_use]
    pub fn cluster(&self, offset: [f64; 2]) -> Vec<ClusterPixel> {
        let mut pixels = Vec::with_capacity(CLUSTER_CAPACITY_HINT);
        self.cluster_into(offset, &mut pixels);
        pixels
    }

    /// Append the cluster of a hit to `out`.
    ///
    /// The outcome reports the number of pixels added and whether the search
    /// stopped at `max_search_radius` while fractions were still significant.
    pub fn cluster_into(&self, offset: [f64; 2], out: &mut Vec<ClusterPixel>) -> SearchOutcome {
        let start = out.len();
        if !self.diffuses() {
            out.push(ClusterPixel {
                d_column: 0,
                d_row: 0,
                fraction: 1.0,
            });
            return SearchOutcome {
                pixels: 1,
                truncated: false,
            };
        }

        let radius = self.max_search_radius;
        let mut search = Search {
            total: 0.0,
            truncated: false,
            out,
        };
        self.scan_columns(offset, 0..=radius, &mut search);
        self.scan_columns(offset, (-radius..0).rev(), &mut search);
        SearchOutcome {
            pixels: search.out.len() - start,
            truncated: search.truncated,
        }
    }

    fn scan_columns(
        &self,
        offset: [f64; 2],
        columns: impl Iterator<Item = i32>,
        search: &mut Search<'_>,
    ) {
        for d_column in columns {
            if !self.scan_column(offset, d_column, search) {
                return;
            }
        }
        search.truncated = true;
    }

    /// Scan one column; returns false if the column (and all further ones
    /// in this direction) carries no significant charge.
    fn scan_column(&self, offset: [f64; 2], d_column: i32, search: &mut Search<'_>) -> bool {
        if search.total >= 1.0 - self.min_fraction
            || self.fraction(offset, d_column, 0) < self.min_fraction
        {
            return false;
        }
        let radius = self.max_search_radius;
        self.scan_rows(offset, d_column, 0..=radius, search);
        self.scan_rows(offset, d_column, (-radius..0).rev(), search);
        true
    }

    fn scan_rows(
        &self,
        offset: [f64; 2],
        d_column: i32,
        rows: impl Iterator<Item = i32>,
        search: &mut Search<'_>,
    ) {
        for d_row in rows {
            if search.total >= 1.0 - self.min_fraction {
                return;
            }
            let fraction = self.fraction(offset, d_column, d_row);
            search.total += fraction;
            if fraction < self.min_fraction {
                return;
            }
            search.out.push(ClusterPixel {
                d_column,
                d_row,
                fraction,
            });
        }
        search.truncated = true;
    }
}

/// Result of one cluster search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchOutcome {
    /// Pixels appended to the output.
    pub pixels: usize,
    /// The search cap cut off charge above the minimum fraction.
    pub truncated: bool,
}

struct Search<'a> {
    total: f64,
    truncated: bool,
    out: &'a mut Vec<ClusterPixel>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn fraction_sum(pixels: &[ClusterPixel]) -> f64 {
        pixels.iter().map(|p| p.fraction).sum()
    }

    #[test]
    fn test_diffusion_sigma() {
        // 100 um sensor at 50 V and 300 K drifts 50 um
        assert_relative_eq!(diffusion_sigma(50.0, 300.0, 50.0), 1.6079, epsilon = 1e-3);
        assert_relative_eq!(diffusion_sigma(0.0, 300.0, 50.0), 0.0);
        assert!(diffusion_sigma(50.0, 300.0, 10.0) > diffusion_sigma(50.0, 300.0, 50.0));
    }

    #[test]
    fn test_bin_fraction() {
        assert_relative_eq!(bin_fraction(-1e6, 1e6, 3.0, 2.0), 1.0, epsilon = 1e-12);
        assert_relative_eq!(bin_fraction(0.0, 1e6, 0.0, 2.0), 0.5, epsilon = 1e-12);
        // +-1 sigma
        assert_relative_eq!(bin_fraction(-2.0, 2.0, 0.0, 2.0), 0.682_689_49, epsilon = 1e-7);
    }

    #[test]
    fn test_plane_engine() {
        let plane = PlaneConfig::default();
        let beam = BeamConfig::default().with_diffusion_correction(1.0);
        let engine = ChargeSharingEngine::for_plane(&plane, &beam);
        assert_relative_eq!(engine.sigma(), 1.6079, epsilon = 1e-3);

        let beam = beam.with_diffusion_correction(2.0);
        let wider = ChargeSharingEngine::for_plane(&plane, &beam);
        assert_relative_eq!(wider.sigma(), 2.0 * engine.sigma(), epsilon = 1e-12);
    }

    #[test]
    fn test_zero_sigma_single_pixel() {
        let engine = ChargeSharingEngine::new(0.0, [50.0, 50.0]);
        let pixels = engine.cluster([24.0, -24.0]);
        assert_eq!(
            pixels,
            vec![ClusterPixel {
                d_column: 0,
                d_row: 0,
                fraction: 1.0
            }]
        );
        assert!(engine.fraction([0.0, 0.0], 1, 0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_centred_hit_stays_in_seed() {
        let engine = ChargeSharingEngine::new(2.0, [50.0, 50.0]);
        let pixels = engine.cluster([0.0, 0.0]);
        assert_eq!(pixels.len(), 1);
        assert_eq!((pixels[0].d_column, pixels[0].d_row), (0, 0));
        assert_relative_eq!(pixels[0].fraction, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_corner_hit_shares_four_pixels() {
        let engine = ChargeSharingEngine::new(5.0, [50.0, 50.0]);
        let pixels = engine.cluster([24.0, 24.0]);

        let mut offsets: Vec<_> = pixels.iter().map(|p| (p.d_column, p.d_row)).collect();
        offsets.sort_unstable();
        assert_eq!(offsets, vec![(0, 0), (0, 1), (1, 0), (1, 1)]);
        assert_relative_eq!(fraction_sum(&pixels), 1.0, epsilon = 1e-6);

        // The seed keeps the largest share
        let seed = pixels.iter().find(|p| p.d_column == 0 && p.d_row == 0).unwrap();
        assert!(pixels.iter().all(|p| p.fraction <= seed.fraction));
    }

    #[test]
    fn test_negative_directions() {
        let engine = ChargeSharingEngine::new(5.0, [50.0, 50.0]);
        let pixels = engine.cluster([-24.0, -24.0]);
        let mut offsets: Vec<_> = pixels.iter().map(|p| (p.d_column, p.d_row)).collect();
        offsets.sort_unstable();
        assert_eq!(offsets, vec![(-1, -1), (-1, 0), (0, -1), (0, 0)]);
    }

    #[test]
    fn test_fractions_respect_cutoff() {
        let engine = ChargeSharingEngine::new(20.0, [50.0, 50.0]);
        for offset in [[0.0, 0.0], [10.0, -20.0], [-24.9, 24.9]] {
            let pixels = engine.cluster(offset);
            assert!(pixels.iter().all(|p| p.fraction >= MIN_FRACTION));
            let sum = fraction_sum(&pixels);
            assert!(sum <= 1.0 + 1e-12, "sum {sum}");
            assert!(sum > 0.98, "sum {sum}");
        }
    }

    #[test]
    fn test_search_cap_bounds_extreme_aspect_ratio() {
        let engine = ChargeSharingEngine::new(100.0, [1.0, 500.0]).with_max_search_radius(4);
        let pixels = engine.cluster([0.4, 0.0]);
        assert!(!pixels.is_empty());
        assert!(pixels.len() <= 81);
        assert!(pixels.iter().all(|p| p.d_column.abs() <= 4 && p.d_row.abs() <= 4));

        let mut out = Vec::new();
        let outcome = engine.cluster_into([0.4, 0.0], &mut out);
        assert!(outcome.truncated);
        assert_eq!(outcome.pixels, out.len());
    }

    #[test]
    fn test_cluster_into_appends() {
        let engine = ChargeSharingEngine::new(5.0, [50.0, 50.0]);
        let mut out = Vec::new();
        let centred = engine.cluster_into([0.0, 0.0], &mut out);
        let corner = engine.cluster_into([24.0, 24.0], &mut out);
        assert_eq!(centred.pixels, 1);
        assert_eq!(corner.pixels, 4);
        assert!(!centred.truncated && !corner.truncated);
        assert_eq!(out.len(), 5);

        let point = ChargeSharingEngine::new(0.0, [50.0, 50.0]);
        assert!(!point.cluster_into([10.0, 10.0], &mut out).truncated);
    }
}
