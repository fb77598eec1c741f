//! Run configuration for the testbeam simulation.
//!
//! A [`SimulationConfig`] is built once per run, validated, and then passed
//! by reference to every stage. There is no mutable simulator state: to start
//! over from the standard telescope use [`SimulationConfig::default`].
//!
//! Units: lengths in micrometers, beam angles in milliradians, bias in volts,
//! temperature in kelvin and charges in electrons.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Number of planes in the standard telescope.
pub const DEFAULT_PLANE_COUNT: usize = 6;

/// Distance between neighbouring planes of the standard telescope (um).
pub const DEFAULT_PLANE_SPACING_UM: f64 = 10_000.0;

/// Beam and global digitization settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BeamConfig {
    /// Mean track position (x, y) at z = 0.
    pub position_um: [f64; 2],
    /// Standard deviation of the track position (x, y) at z = 0.
    pub position_sigma_um: [f64; 2],
    /// Mean polar angle theta.
    pub angle_mrad: f64,
    /// Standard deviation of the polar angle theta.
    pub angle_sigma_mrad: f64,
    /// Mean number of tracks per event.
    pub tracks_per_event: f64,
    /// Standard deviation of the number of tracks per event.
    ///
    /// Non-zero values make events without any track possible.
    pub tracks_per_event_sigma: f64,
    /// Sensor temperature used for the diffusion width.
    pub temperature_k: f64,
    /// Spread deposited charge over neighbouring pixels.
    pub charge_sharing: bool,
    /// Correction factor (> 1) on the diffusion sigma for charge cloud repulsion.
    pub diffusion_correction: f64,
}

impl Default for BeamConfig {
    fn default() -> Self {
        Self {
            position_um: [0.0, 0.0],
            position_sigma_um: [2000.0, 2000.0],
            angle_mrad: 0.0,
            angle_sigma_mrad: 1.0,
            tracks_per_event: 1.0,
            tracks_per_event_sigma: 1.0,
            temperature_k: 300.0,
            charge_sharing: true,
            diffusion_correction: 1.35,
        }
    }
}

impl BeamConfig {
    /// Mean polar angle in radians.
    #[must_use]
    pub fn angle_rad(&self) -> f64 {
        self.angle_mrad / 1000.0
    }

    /// Polar angle standard deviation in radians.
    #[must_use]
    pub fn angle_sigma_rad(&self) -> f64 {
        self.angle_sigma_mrad / 1000.0
    }

    /// Set the mean beam position.
    #[must_use]
    pub fn with_position(mut self, x_um: f64, y_um: f64) -> Self {
        self.position_um = [x_um, y_um];
        self
    }

    /// Set the beam position spread.
    #[must_use]
    pub fn with_position_sigma(mut self, x_um: f64, y_um: f64) -> Self {
        self.position_sigma_um = [x_um, y_um];
        self
    }

    /// Set the polar angle distribution.
    #[must_use]
    pub fn with_angle(mut self, mean_mrad: f64, sigma_mrad: f64) -> Self {
        self.angle_mrad = mean_mrad;
        self.angle_sigma_mrad = sigma_mrad;
        self
    }

    /// Set the tracks-per-event distribution.
    #[must_use]
    pub fn with_tracks_per_event(mut self, mean: f64, sigma: f64) -> Self {
        self.tracks_per_event = mean;
        self.tracks_per_event_sigma = sigma;
        self
    }

    /// Enable or disable charge sharing.
    #[must_use]
    pub fn with_charge_sharing(mut self, enabled: bool) -> Self {
        self.charge_sharing = enabled;
        self
    }

    /// Set the diffusion sigma correction factor.
    #[must_use]
    pub fn with_diffusion_correction(mut self, factor: f64) -> Self {
        self.diffusion_correction = factor;
        self
    }

    /// Set the sensor temperature.
    #[must_use]
    pub fn with_temperature(mut self, kelvin: f64) -> Self {
        self.temperature_k = kelvin;
        self
    }

    fn validate(&self) -> Result<()> {
        check_finite("beam.position_um", &self.position_um)?;
        check_non_negative("beam.position_sigma_um", &self.position_sigma_um)?;
        check_non_negative("beam.angle_sigma_mrad", &[self.angle_sigma_mrad])?;
        check_non_negative("beam.tracks_per_event_sigma", &[self.tracks_per_event_sigma])?;
        check_finite("beam.tracks_per_event", &[self.tracks_per_event])?;
        check_non_negative("beam.temperature_k", &[self.temperature_k])?;
        check_non_negative("beam.diffusion_correction", &[self.diffusion_correction])?;

        let angle = self.angle_rad();
        if !(0.0..=PI).contains(&angle) {
            return Err(Error::invalid_config(
                "beam.angle_mrad",
                format!("mean polar angle {angle} rad is outside [0, pi]"),
            ));
        }
        Ok(())
    }
}

/// Static description of one detector plane (DUT).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlaneConfig {
    /// Position of the sensor along the beam axis.
    pub z_position_um: f64,
    /// Lateral position (x, y) of the pixel matrix origin.
    pub offset_um: [f64; 2],
    /// Sensor bias voltage.
    pub bias_v: f64,
    /// Sensor thickness.
    pub thickness_um: f64,
    /// Detection threshold in electrons.
    pub threshold_e: f64,
    /// Gaussian noise per pixel in electrons.
    pub noise_e: f64,
    /// Pixel pitch (x, y).
    pub pitch_um: [f64; 2],
    /// Number of pixels (columns, rows).
    pub n_pixels: [u32; 2],
    /// Fraction of hits above threshold that are detected, in [0, 1].
    pub efficiency: f64,
}

impl Default for PlaneConfig {
    fn default() -> Self {
        Self {
            z_position_um: 0.0,
            offset_um: [-2500.0, -2500.0],
            bias_v: 50.0,
            thickness_um: 100.0,
            threshold_e: 0.0,
            noise_e: 50.0,
            pitch_um: [50.0, 50.0],
            n_pixels: [1000, 1000],
            efficiency: 1.0,
        }
    }
}

impl PlaneConfig {
    /// Standard plane placed at the given depth.
    #[must_use]
    pub fn at_z(z_position_um: f64) -> Self {
        Self {
            z_position_um,
            ..Self::default()
        }
    }

    /// Set the lateral offset.
    #[must_use]
    pub fn with_offset(mut self, x_um: f64, y_um: f64) -> Self {
        self.offset_um = [x_um, y_um];
        self
    }

    /// Set the sensor thickness.
    #[must_use]
    pub fn with_thickness(mut self, thickness_um: f64) -> Self {
        self.thickness_um = thickness_um;
        self
    }

    /// Set the bias voltage.
    #[must_use]
    pub fn with_bias(mut self, bias_v: f64) -> Self {
        self.bias_v = bias_v;
        self
    }

    /// Set pixel pitch.
    #[must_use]
    pub fn with_pitch(mut self, x_um: f64, y_um: f64) -> Self {
        self.pitch_um = [x_um, y_um];
        self
    }

    /// Set the pixel matrix size.
    #[must_use]
    pub fn with_pixels(mut self, columns: u32, rows: u32) -> Self {
        self.n_pixels = [columns, rows];
        self
    }

    /// Set noise and threshold in electrons.
    #[must_use]
    pub fn with_noise_and_threshold(mut self, noise_e: f64, threshold_e: f64) -> Self {
        self.noise_e = noise_e;
        self.threshold_e = threshold_e;
        self
    }

    /// Set detection efficiency.
    #[must_use]
    pub fn with_efficiency(mut self, efficiency: f64) -> Self {
        self.efficiency = efficiency;
        self
    }

    /// Number of pixel columns.
    #[must_use]
    pub fn columns(&self) -> u32 {
        self.n_pixels[0]
    }

    /// Number of pixel rows.
    #[must_use]
    pub fn rows(&self) -> u32 {
        self.n_pixels[1]
    }

    fn validate(&self, index: usize, charge_sharing: bool) -> Result<()> {
        let field = |name: &str| format!("planes[{index}].{name}");

        check_finite(&field("z_position_um"), &[self.z_position_um])?;
        check_finite(&field("offset_um"), &self.offset_um)?;
        check_finite(&field("threshold_e"), &[self.threshold_e])?;
        check_non_negative(&field("noise_e"), &[self.noise_e])?;
        check_positive(&field("thickness_um"), &[self.thickness_um])?;
        check_positive(&field("pitch_um"), &self.pitch_um)?;

        if charge_sharing {
            check_positive(&field("bias_v"), &[self.bias_v])?;
        } else {
            check_finite(&field("bias_v"), &[self.bias_v])?;
        }

        for count in self.n_pixels {
            if count == 0 || count > u32::from(u16::MAX) {
                return Err(Error::invalid_config(
                    field("n_pixels"),
                    format!("pixel count {count} must be in [1, {}]", u16::MAX),
                ));
            }
        }

        if !(0.0..=1.0).contains(&self.efficiency) {
            return Err(Error::invalid_config(
                field("efficiency"),
                format!("{} is outside [0, 1]", self.efficiency),
            ));
        }
        Ok(())
    }
}

/// Complete, immutable configuration of one simulation run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    /// Beam and digitization settings shared by all planes.
    pub beam: BeamConfig,
    /// Detector planes in beam order.
    pub planes: Vec<PlaneConfig>,
    /// Random seed; a fresh seed is drawn per run when absent.
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    /// Standard telescope: six planes every 10 cm.
    #[allow(clippy::cast_precision_loss)]
    fn default() -> Self {
        let planes = (0..DEFAULT_PLANE_COUNT)
            .map(|index| PlaneConfig::at_z(index as f64 * DEFAULT_PLANE_SPACING_UM))
            .collect();
        Self {
            beam: BeamConfig::default(),
            planes,
            seed: None,
        }
    }
}

impl SimulationConfig {
    /// Load and validate configuration from a JSON file.
    ///
    /// Fields that are not present take their standard values.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let config: Self = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate configuration from a JSON string.
    ///
    /// # Errors
    /// Returns an error if the document cannot be parsed or validated.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty-printed JSON.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check every value against its physical domain.
    ///
    /// Called automatically when loading from JSON. For programmatically
    /// built configurations the simulation entry points call it before any
    /// random number is drawn.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.planes.is_empty() {
            return Err(Error::invalid_config(
                "planes",
                "at least one plane is required",
            ));
        }
        self.beam.validate()?;
        for (index, plane) in self.planes.iter().enumerate() {
            plane.validate(index, self.beam.charge_sharing)?;
        }
        Ok(())
    }

    /// Number of detector planes.
    #[must_use]
    pub fn n_planes(&self) -> usize {
        self.planes.len()
    }

    /// Replace the beam settings.
    #[must_use]
    pub fn with_beam(mut self, beam: BeamConfig) -> Self {
        self.beam = beam;
        self
    }

    /// Replace the plane list.
    #[must_use]
    pub fn with_planes(mut self, planes: Vec<PlaneConfig>) -> Self {
        self.planes = planes;
        self
    }

    /// Apply `f` to every plane.
    #[must_use]
    pub fn map_planes(mut self, f: impl Fn(usize, PlaneConfig) -> PlaneConfig) -> Self {
        self.planes = self
            .planes
            .into_iter()
            .enumerate()
            .map(|(index, plane)| f(index, plane))
            .collect();
        self
    }

    /// Fix the random seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

fn check_finite(field: &str, values: &[f64]) -> Result<()> {
    if let Some(value) = values.iter().find(|v| !v.is_finite()) {
        return Err(Error::invalid_config(
            field,
            format!("{value} is not a finite number"),
        ));
    }
    Ok(())
}

fn check_non_negative(field: &str, values: &[f64]) -> Result<()> {
    check_finite(field, values)?;
    if let Some(value) = values.iter().find(|v| **v < 0.0) {
        return Err(Error::invalid_config(
            field,
            format!("{value} must not be negative"),
        ));
    }
    Ok(())
}

fn check_positive(field: &str, values: &[f64]) -> Result<()> {
    check_finite(field, values)?;
    if let Some(value) = values.iter().find(|v| **v <= 0.0) {
        return Err(Error::invalid_config(
            field,
            format!("{value} must be positive"),
        ));
    }
    Ok(())
}
