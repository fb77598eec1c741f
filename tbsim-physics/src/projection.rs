//! Straight-line intersection of tracks with detector planes.

use tbsim_core::TrackBatch;

/// Smallest |cos(theta)| for which a track is considered to reach a plane.
///
/// Tracks closer to theta = pi/2 run parallel to the planes; their
/// intersection is reported as NaN and dropped during digitization.
pub const MIN_COS_THETA: f64 = 1e-9;

/// Continuous hit positions of all tracks on one plane (`SoA`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Intersections {
    /// x positions (um).
    pub x: Vec<f64>,
    /// y positions (um).
    pub y: Vec<f64>,
}

impl Intersections {
    /// Number of intersections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.x.len()
    }

    /// Returns true if there are no intersections.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

/// Intersection of a single track with the plane at depth `z`.
///
/// Returns `None` when the track is (numerically) parallel to the plane.
#[inline]
#[must_use]
pub fn intersect(x: f64, y: f64, phi: f64, theta: f64, z: f64) -> Option<(f64, f64)> {
    let cos_theta = theta.cos();
    if cos_theta.abs() < MIN_COS_THETA {
        return None;
    }
    // r in spherical coordinates at depth z
    let r = z / cos_theta;
    let sin_theta = theta.sin();
    Some((
        x + r * phi.cos() * sin_theta,
        y + r * phi.sin() * sin_theta,
    ))
}

/// Intersect every track with the plane at depth `z`.
#[must_use]
pub fn project(tracks: &TrackBatch, z: f64) -> Intersections {
    let mut result = Intersections {
        x: Vec::with_capacity(tracks.len()),
        y: Vec::with_capacity(tracks.len()),
    };
    for i in 0..tracks.len() {
        let (x, y) = intersect(tracks.x[i], tracks.y[i], tracks.phi[i], tracks.theta[i], z)
            .unwrap_or((f64::NAN, f64::NAN));
        result.x.push(x);
        result.y.push(y);
    }
    result
}

/// Intersect every track with each of the given plane depths.
#[must_use]
pub fn project_all(tracks: &TrackBatch, z_positions: &[f64]) -> Vec<Intersections> {
    z_positions.iter().map(|&z| project(tracks, z)).collect()
}
