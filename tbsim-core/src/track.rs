//! Particle tracks in `SoA` layout.

/// Straight tracks of one chunk, defined at the reference depth z = 0.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackBatch {
    /// Event that produced each track.
    pub event_number: Vec<i64>,
    /// Position x at z = 0 (um).
    pub x: Vec<f64>,
    /// Position y at z = 0 (um).
    pub y: Vec<f64>,
    /// Azimuth angle in [0, 2pi).
    pub phi: Vec<f64>,
    /// Polar angle in [0, pi].
    pub theta: Vec<f64>,
}

impl TrackBatch {
    /// Creates a new empty batch with specified capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            event_number: Vec::with_capacity(capacity),
            x: Vec::with_capacity(capacity),
            y: Vec::with_capacity(capacity),
            phi: Vec::with_capacity(capacity),
            theta: Vec::with_capacity(capacity),
        }
    }

    /// Returns the number of tracks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.event_number.len()
    }

    /// Returns true if the batch holds no tracks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.event_number.is_empty()
    }
}
