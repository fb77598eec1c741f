//! Structure of Arrays (`SoA`) types for efficient processing.
//!
//! This module defines the `HitBatch` structure which stores the digitized
//! hits of one plane in parallel vectors rather than an array of structs.
//! Charges stay in electrons until the batch is written.

use crate::hit::DigitizedHit;

/// A batch of digitized hits of one plane in `SoA` format.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HitBatch {
    /// Owning event of each hit.
    pub event_number: Vec<i64>,
    /// 1-based pixel columns.
    pub column: Vec<u16>,
    /// 1-based pixel rows.
    pub row: Vec<u16>,
    /// Collected charge in electrons (after noise).
    pub charge: Vec<f64>,
}

impl HitBatch {
    /// Creates a new empty batch with specified capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            event_number: Vec::with_capacity(capacity),
            column: Vec::with_capacity(capacity),
            row: Vec::with_capacity(capacity),
            charge: Vec::with_capacity(capacity),
        }
    }

    /// Returns the number of hits in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.event_number.len()
    }

    /// Returns true if the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.event_number.is_empty()
    }

    /// Pushes a single hit into the batch.
    pub fn push(&mut self, event_number: i64, column: u16, row: u16, charge: f64) {
        self.event_number.push(event_number);
        self.column.push(column);
        self.row.push(row);
        self.charge.push(charge);
    }

    /// Keeps the hits whose entry in `keep` is true.
    ///
    /// Returns the number of removed hits. Missing mask entries count as
    /// false.
    pub fn retain_mask(&mut self, keep: &[bool]) -> usize {
        let before = self.len();
        retain_by_index(&mut self.event_number, keep);
        retain_by_index(&mut self.column, keep);
        retain_by_index(&mut self.row, keep);
        retain_by_index(&mut self.charge, keep);
        before - self.len()
    }

    /// Iterates over the hits as quantized table records.
    pub fn records(&self) -> impl Iterator<Item = DigitizedHit> + '_ {
        (0..self.len()).map(move |i| {
            DigitizedHit::new(self.event_number[i], self.column[i], self.row[i], self.charge[i])
        })
    }
}

fn retain_by_index<T>(values: &mut Vec<T>, keep: &[bool]) {
    let mut index = 0;
    values.retain(|_| {
        let kept = keep.get(index).copied().unwrap_or(false);
        index += 1;
        kept
    });
}
