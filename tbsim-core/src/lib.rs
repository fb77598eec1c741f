//! tbsim-core: Core types for the testbeam telescope simulator.
//!
//! This crate provides the immutable run configuration, the structure of
//! arrays containers that flow between simulation stages, the on-disk hit
//! record and the shared error type.
//!

pub mod config;
pub mod error;
pub mod hit;
pub mod soa;
pub mod track;

pub use config::{BeamConfig, PlaneConfig, SimulationConfig};
pub use error::{Error, Result};
pub use hit::{DigitizedHit, CHARGE_LSB_ELECTRONS};
pub use soa::HitBatch;
pub use track::TrackBatch;
