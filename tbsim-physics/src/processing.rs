//! Per-chunk orchestration of the simulation stages.

use crate::digitize::{DigitizedPlane, Digitizer};
use crate::projection::project;
use crate::track::TrackSampler;
use log::{debug, info};
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tbsim_core::{Result, SimulationConfig};

/// Random number generator of one run and the seed it was created from.
///
/// Without a configured seed a fresh one is drawn and logged so the run
/// can be repeated.
#[must_use]
pub fn run_rng(seed: Option<u64>) -> (ChaCha8Rng, u64) {
    let seed = seed.unwrap_or_else(|| {
        let seed = rand::thread_rng().next_u64();
        info!("No seed configured, using random seed {seed}");
        seed
    });
    (ChaCha8Rng::seed_from_u64(seed), seed)
}

/// Runs tracks, projection and digitization for windows of events.
#[derive(Debug, Clone)]
pub struct ChunkSimulator {
    config: SimulationConfig,
    tracks: TrackSampler,
    digitizers: Vec<Digitizer>,
}

impl ChunkSimulator {
    /// Validate `config` and prepare the per-plane models.
    ///
    /// # Errors
    /// Returns [`tbsim_core::Error::InvalidConfig`] for invalid settings.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        let tracks = TrackSampler::new(&config.beam)?;
        let digitizers = config
            .planes
            .iter()
            .map(|plane| Digitizer::new(plane, &config.beam))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            config,
            tracks,
            digitizers,
        })
    }

    /// Configuration of the run.
    #[must_use]
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Number of planes.
    #[must_use]
    pub fn n_planes(&self) -> usize {
        self.digitizers.len()
    }

    /// Per-plane detector models.
    #[must_use]
    pub fn digitizers(&self) -> &[Digitizer] {
        &self.digitizers
    }

    /// Simulate events `first_event .. first_event + n_events`.
    ///
    /// Returns one entry per plane, in plane order.
    pub fn simulate_chunk<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        first_event: i64,
        n_events: usize,
    ) -> Vec<DigitizedPlane> {
        let tracks = self.tracks.sample(rng, first_event, n_events);
        debug!(
            "Chunk at event {first_event}: {n_events} events, {} tracks",
            tracks.len()
        );

        self.digitizers
            .iter()
            .map(|digitizer| {
                let hits = project(&tracks, digitizer.plane().z_position_um);
                digitizer.digitize(rng, &tracks.event_number, &hits)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tbsim_core::{BeamConfig, PlaneConfig};

    fn single_track_config() -> SimulationConfig {
        SimulationConfig::default()
            .with_beam(
                BeamConfig::default()
                    .with_position_sigma(0.0, 0.0)
                    .with_angle(0.0, 0.0)
                    .with_tracks_per_event(1.0, 0.0)
                    .with_charge_sharing(false),
            )
            .map_planes(|_, plane| plane.with_noise_and_threshold(0.0, 0.0))
    }

    #[test]
    fn test_one_hit_per_event_and_plane() {
        let simulator = ChunkSimulator::new(single_track_config()).unwrap();
        let (mut rng, _) = run_rng(Some(1));
        let planes = simulator.simulate_chunk(&mut rng, 100, 20);

        assert_eq!(planes.len(), 6);
        for plane in &planes {
            assert_eq!(plane.hits.len(), 20);
            assert_eq!(plane.hits.event_number, (100..120).collect::<Vec<i64>>());
            // Beam at 0 with offset -2500 lands on the lower edge of pixel 51
            assert!(plane.hits.column.iter().all(|&c| c == 51));
            assert!(plane.hits.row.iter().all(|&r| r == 51));
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = SimulationConfig::default()
            .with_planes(vec![PlaneConfig::default().with_pitch(0.0, 50.0)]);
        assert!(ChunkSimulator::new(config).is_err());
        assert!(ChunkSimulator::new(SimulationConfig::default().with_planes(Vec::new())).is_err());
    }

    #[test]
    fn test_same_seed_same_chunk() {
        let simulator = ChunkSimulator::new(SimulationConfig::default()).unwrap();
        let a = simulator.simulate_chunk(&mut run_rng(Some(7)).0, 0, 200);
        let b = simulator.simulate_chunk(&mut run_rng(Some(7)).0, 0, 200);
        for (a, b) in a.iter().zip(&b) {
            assert_eq!(a.hits, b.hits);
            assert_eq!(a.stats, b.stats);
        }
    }

    #[test]
    fn test_random_seed_reported() {
        let (_, first) = run_rng(None);
        let (_, second) = run_rng(None);
        assert_ne!(first, second);
        let (_, fixed) = run_rng(Some(3));
        assert_eq!(fixed, 3);
    }
}
