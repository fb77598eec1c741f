//! Binary hit-table layout.
//!
//! A table starts with a 24-byte header followed by packed little-endian
//! records, one per [`DigitizedHit`]:
//!
//! | Offset | Size | Field                         |
//! |--------|------|-------------------------------|
//! | 0      | 8    | magic `TBSIMHIT`              |
//! | 8      | 2    | format version                |
//! | 10     | 2    | plane index                   |
//! | 12     | 4    | number of columns             |
//! | 16     | 4    | number of rows                |
//! | 20     | 4    | reserved (0)                  |
//!
//! Records are 15 bytes: event number (i64), frame (u8), column (u16),
//! row (u16), charge (u16).

use crate::{Error, Result};
use tbsim_core::{DigitizedHit, PlaneConfig};

/// File magic.
pub const MAGIC: [u8; 8] = *b"TBSIMHIT";

/// Current format version.
pub const FORMAT_VERSION: u16 = 1;

/// Header size in bytes.
pub const HEADER_LEN: usize = 24;

/// Record size in bytes.
pub const RECORD_LEN: usize = 15;

/// Plane description stored in a table header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TableHeader {
    /// Index of the plane in the telescope.
    pub plane_index: u16,
    /// Number of pixel columns.
    pub n_columns: u32,
    /// Number of pixel rows.
    pub n_rows: u32,
}

impl TableHeader {
    /// Header for plane `index` of a telescope.
    ///
    /// # Errors
    /// Returns an error if the plane index does not fit the header field.
    pub fn for_plane(index: usize, plane: &PlaneConfig) -> Result<Self> {
        let plane_index = u16::try_from(index).map_err(|_| {
            Error::InvalidFormat(format!("plane index {index} exceeds {}", u16::MAX))
        })?;
        Ok(Self {
            plane_index,
            n_columns: plane.columns(),
            n_rows: plane.rows(),
        })
    }

    /// Serialize the header.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[0..8].copy_from_slice(&MAGIC);
        bytes[8..10].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes[10..12].copy_from_slice(&self.plane_index.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.n_columns.to_le_bytes());
        bytes[16..20].copy_from_slice(&self.n_rows.to_le_bytes());
        bytes
    }

    /// Parse and check a header.
    ///
    /// # Errors
    /// Returns [`Error::InvalidFormat`] for short input, a wrong magic or an
    /// unsupported version.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::InvalidFormat(format!(
                "header needs {HEADER_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        if bytes[0..8] != MAGIC {
            return Err(Error::InvalidFormat("not a tbsim hit table".to_string()));
        }
        let version = u16::from_le_bytes([bytes[8], bytes[9]]);
        if version != FORMAT_VERSION {
            return Err(Error::InvalidFormat(format!(
                "unsupported format version {version}"
            )));
        }
        Ok(Self {
            plane_index: u16::from_le_bytes([bytes[10], bytes[11]]),
            n_columns: read_u32(&bytes[12..16]),
            n_rows: read_u32(&bytes[16..20]),
        })
    }
}

/// Serialize one record.
#[inline]
pub fn encode_record(hit: &DigitizedHit, out: &mut [u8; RECORD_LEN]) {
    out[0..8].copy_from_slice(&hit.event_number.to_le_bytes());
    out[8] = hit.frame;
    out[9..11].copy_from_slice(&hit.column.to_le_bytes());
    out[11..13].copy_from_slice(&hit.row.to_le_bytes());
    out[13..15].copy_from_slice(&hit.charge.to_le_bytes());
}

/// Parse one record from the first [`RECORD_LEN`] bytes of `bytes`.
///
/// Callers guarantee the slice is long enough (the reader only hands out
/// exact record chunks).
#[inline]
#[must_use]
pub fn decode_record(bytes: &[u8]) -> DigitizedHit {
    let mut event = [0u8; 8];
    event.copy_from_slice(&bytes[0..8]);
    DigitizedHit {
        event_number: i64::from_le_bytes(event),
        frame: bytes[8],
        column: u16::from_le_bytes([bytes[9], bytes[10]]),
        row: u16::from_le_bytes([bytes[11], bytes[12]]),
        charge: u16::from_le_bytes([bytes[13], bytes[14]]),
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}
