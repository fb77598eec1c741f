//! Track generation from beam statistics.
//!
//! Draws the number of tracks per event and, for every track, its position
//! at z = 0 and its emission angles.

use log::{debug, warn};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use std::f64::consts::{PI, TAU};
use tbsim_core::{BeamConfig, Error, Result, TrackBatch};

/// Upper bound on redraw rounds for polar angles outside [0, pi].
///
/// Each round redraws only the values still out of range. Whatever remains
/// after the last round is clamped into range.
pub const MAX_THETA_REDRAW_ROUNDS: usize = 64;

/// Samples tracks from the configured beam distributions.
#[derive(Debug, Clone)]
pub struct TrackSampler {
    tracks_per_event: Gaussian,
    x: Gaussian,
    y: Gaussian,
    theta: Gaussian,
}

impl TrackSampler {
    /// Create a sampler for the given beam.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] if the mean polar angle is outside
    /// [0, pi] or a distribution parameter is invalid.
    pub fn new(beam: &BeamConfig) -> Result<Self> {
        let theta_mean = beam.angle_rad();
        if !(0.0..=PI).contains(&theta_mean) {
            return Err(Error::invalid_config(
                "beam.angle_mrad",
                format!("mean polar angle {theta_mean} rad is outside [0, pi]"),
            ));
        }

        Ok(Self {
            tracks_per_event: Gaussian::new(
                "beam.tracks_per_event_sigma",
                beam.tracks_per_event,
                beam.tracks_per_event_sigma,
            )?,
            x: Gaussian::new(
                "beam.position_sigma_um",
                beam.position_um[0],
                beam.position_sigma_um[0],
            )?,
            y: Gaussian::new(
                "beam.position_sigma_um",
                beam.position_um[1],
                beam.position_sigma_um[1],
            )?,
            theta: Gaussian::new("beam.angle_sigma_mrad", theta_mean, beam.angle_sigma_rad())?,
        })
    }

    /// Draw the number of tracks of each event.
    ///
    /// The Gaussian draw is truncated toward zero and negative counts become
    /// zero, so events without a track (trigger without particle) occur.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn sample_tracks_per_event<R: Rng + ?Sized>(&self, rng: &mut R, n_events: usize) -> Vec<usize> {
        (0..n_events)
            .map(|_| self.tracks_per_event.sample(rng).trunc().max(0.0) as usize)
            .collect()
    }

    /// Draw all tracks of `n_events` consecutive events starting at `first_event`.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R, first_event: i64, n_events: usize) -> TrackBatch {
        let counts = self.sample_tracks_per_event(rng, n_events);
        let n_tracks: usize = counts.iter().sum();

        let mut tracks = TrackBatch::with_capacity(n_tracks);
        for (event, &count) in (first_event..).zip(&counts) {
            tracks
                .event_number
                .extend(std::iter::repeat(event).take(count));
        }

        debug!(
            "Create {n_tracks} tracks at x/y = ({}/{} +- {}/{}) um, theta = {} +- {} rad",
            self.x.mean, self.y.mean, self.x.sigma, self.y.sigma, self.theta.mean, self.theta.sigma
        );

        tracks.x.extend((0..n_tracks).map(|_| self.x.sample(rng)));
        tracks.y.extend((0..n_tracks).map(|_| self.y.sample(rng)));
        tracks.theta = self.sample_theta(rng, n_tracks);
        tracks
            .phi
            .extend((0..n_tracks).map(|_| rng.gen_range(0.0..TAU)));
        tracks
    }

    /// Draw polar angles restricted to [0, pi] by bounded redraw rounds.
    pub fn sample_theta<R: Rng + ?Sized>(&self, rng: &mut R, n_tracks: usize) -> Vec<f64> {
        let mut theta: Vec<f64> = (0..n_tracks).map(|_| self.theta.sample(rng)).collect();

        let mut pending: Vec<usize> = out_of_range(&theta);
        let mut rounds = 0;
        while !pending.is_empty() && rounds < MAX_THETA_REDRAW_ROUNDS {
            for &index in &pending {
                theta[index] = self.theta.sample(rng);
            }
            pending.retain(|&index| !(0.0..=PI).contains(&theta[index]));
            rounds += 1;
        }

        if !pending.is_empty() {
            warn!(
                "{} polar angles still outside [0, pi] after {MAX_THETA_REDRAW_ROUNDS} redraw rounds; clamping",
                pending.len()
            );
            for index in pending {
                theta[index] = theta[index].clamp(0.0, PI);
            }
        }
        theta
    }
}

fn out_of_range(theta: &[f64]) -> Vec<usize> {
    theta
        .iter()
        .enumerate()
        .filter(|(_, value)| !(0.0..=PI).contains(*value))
        .map(|(index, _)| index)
        .collect()
}

/// Normal distribution that degenerates to a constant for zero sigma.
#[derive(Debug, Clone, Copy)]
struct Gaussian {
    mean: f64,
    sigma: f64,
    normal: Option<Normal<f64>>,
}

impl Gaussian {
    fn new(field: &str, mean: f64, sigma: f64) -> Result<Self> {
        let normal = if sigma == 0.0 {
            None
        } else {
            Some(Normal::new(mean, sigma).map_err(|e| Error::invalid_config(field, e.to_string()))?)
        };
        Ok(Self { mean, sigma, normal })
    }

    #[inline]
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match &self.normal {
            Some(normal) => normal.sample(rng),
            None => self.mean,
        }
    }
}
