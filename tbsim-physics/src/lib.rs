//! tbsim-physics: Detector response of a pixel telescope.
//!
//! This crate provides the simulation stages of one chunk of events:
//! - **Tracks** - beam position, angle and multiplicity sampling
//! - **Projection** - straight-line intersection with each plane
//! - **Deposit** - Landau-distributed charge per hit
//! - **Sharing** - diffusion of the charge over neighbouring pixels
//! - **Digitization** - masking, inefficiency, noise and threshold
//!
#![warn(missing_docs)]

pub mod deposit;
mod digitize;
mod processing;
pub mod projection;
pub mod sharing;
mod track;

pub use deposit::{landau_pdf, ChargeDepositModel};
pub use digitize::{
    offset_in_pixel, pixel_index, DigitizationStatistics, DigitizedPlane, Digitizer,
};
pub use processing::{run_rng, ChunkSimulator};
pub use projection::{intersect, project, project_all, Intersections};
pub use sharing::{diffusion_sigma, ChargeSharingEngine, ClusterPixel, SearchOutcome};
pub use track::{TrackSampler, MAX_THETA_REDRAW_ROUNDS};
