//! Digitized hit record as stored in the per-plane hit tables.

use serde::{Deserialize, Serialize};

/// Electrons per stored charge unit.
pub const CHARGE_LSB_ELECTRONS: f64 = 10.0;

/// One row of a plane's hit table.
///
/// This is the contract with downstream reconstruction: column and row are
/// 1-based and charge is stored in units of [`CHARGE_LSB_ELECTRONS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DigitizedHit {
    /// Event the hit belongs to.
    pub event_number: i64,
    /// Reserved, always 0.
    pub frame: u8,
    /// Pixel column in [1, columns].
    pub column: u16,
    /// Pixel row in [1, rows].
    pub row: u16,
    /// Quantized charge.
    pub charge: u16,
}

impl DigitizedHit {
    /// Creates a hit from a physical charge in electrons.
    #[inline]
    #[must_use]
    pub fn new(event_number: i64, column: u16, row: u16, charge_e: f64) -> Self {
        Self {
            event_number,
            frame: 0,
            column,
            row,
            charge: quantize_charge(charge_e),
        }
    }

    /// Stored charge converted back to electrons.
    #[inline]
    #[must_use]
    pub fn charge_electrons(&self) -> f64 {
        f64::from(self.charge) * CHARGE_LSB_ELECTRONS
    }
}

/// Converts a charge in electrons to stored units.
///
/// Truncates toward zero and saturates at the `u16` range.
#[inline]
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn quantize_charge(charge_e: f64) -> u16 {
    let units = (charge_e / CHARGE_LSB_ELECTRONS).trunc();
    if units.is_nan() {
        return 0;
    }
    units.clamp(0.0, f64::from(u16::MAX)) as u16
}
