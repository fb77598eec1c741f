//! Deposited charge per hit.
//!
//! The energy loss in thin silicon follows a Landau distribution. The shape
//! is tabulated once on a fixed grid and sampled by inverse transform; the
//! most probable value scales with sensor thickness.

use rand::Rng;

/// Most probable charge per micrometer of silicon (electrons).
pub const MPV_ELECTRONS_PER_UM: f64 = 77.0;

/// Width of the Landau shape relative to the most probable value.
pub const LANDAU_WIDTH: f64 = 0.2;

/// Location of the Landau maximum relative to its location parameter.
pub const LANDAU_MODE_SHIFT: f64 = -0.222_782_98;

/// Thinnest sensor accepted by the model; keeps the MPV positive.
pub const MIN_THICKNESS_UM: f64 = 1.0;

const GRID_STEP: f64 = 0.1;
const GRID_POINTS: usize = 100;

/// Tabulated Landau energy-loss distribution for one sensor thickness.
#[derive(Debug, Clone)]
pub struct ChargeDepositModel {
    mpv: f64,
    charges: Vec<f64>,
    cdf: Vec<f64>,
}

impl ChargeDepositModel {
    /// Build the distribution for a sensor of the given thickness.
    ///
    /// Thicknesses below [`MIN_THICKNESS_UM`] (including zero or negative
    /// values) are raised to that floor.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn new(thickness_um: f64) -> Self {
        let mpv = MPV_ELECTRONS_PER_UM * thickness_um.max(MIN_THICKNESS_UM);

        // Shape grid x = 0.0, 0.1, ..., 9.9 in units of the MPV; maximum at 1
        let location = 1.0 - LANDAU_MODE_SHIFT * LANDAU_WIDTH;
        let shape: Vec<f64> = (0..GRID_POINTS).map(|i| i as f64 * GRID_STEP).collect();
        let density: Vec<f64> = shape
            .iter()
            .map(|&x| landau_pdf((x - location) / LANDAU_WIDTH))
            .collect();
        let total: f64 = density.iter().sum();

        let mut cumulative = 0.0;
        let cdf = density
            .iter()
            .map(|&d| {
                cumulative += d / total;
                cumulative
            })
            .collect();

        Self {
            mpv,
            charges: shape.iter().map(|&x| x * mpv).collect(),
            cdf,
        }
    }

    /// Most probable deposited charge (electrons).
    #[must_use]
    pub fn mpv(&self) -> f64 {
        self.mpv
    }

    /// Charge values of the grid (electrons).
    #[must_use]
    pub fn charges(&self) -> &[f64] {
        &self.charges
    }

    /// Probability of each grid value.
    #[must_use]
    pub fn probabilities(&self) -> Vec<f64> {
        let mut previous = 0.0;
        self.cdf
            .iter()
            .map(|&c| {
                let p = c - previous;
                previous = c;
                p
            })
            .collect()
    }

    /// Draw one deposited charge.
    #[inline]
    pub fn sample_one<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let u: f64 = rng.gen();
        let index = self
            .cdf
            .partition_point(|&c| c <= u)
            .min(self.charges.len() - 1);
        self.charges[index]
    }

    /// Draw `n` independent deposited charges.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R, n: usize) -> Vec<f64> {
        (0..n).map(|_| self.sample_one(rng)).collect()
    }
}

/// Standard Landau density (location 0, scale 1).
///
/// Rational approximation of CERNLIB `DENLAN` (G110).
#[must_use]
#[allow(clippy::unreadable_literal, clippy::excessive_precision)]
pub fn landau_pdf(v: f64) -> f64 {
    const P1: [f64; 5] = [0.4259894875, -0.1249762550, 0.03984243700, -0.006298287635, 0.001511162253];
    const Q1: [f64; 5] = [1.0, -0.3388260629, 0.09594393323, -0.01608042283, 0.003778942063];
    const P2: [f64; 5] = [0.1788541609, 0.1173957403, 0.01488850518, -0.001394989411, 0.0001283617211];
    const Q2: [f64; 5] = [1.0, 0.7428795082, 0.3153932961, 0.06694219548, 0.008790609714];
    const P3: [f64; 5] = [0.1788544503, 0.09359161662, 0.006325387654, 0.00006611667319, -0.000002031049101];
    const Q3: [f64; 5] = [1.0, 0.6097809921, 0.2560616665, 0.04746722384, 0.006957301675];
    const P4: [f64; 5] = [0.9874054407, 118.6723273, 849.2794360, -743.7792444, 427.0262186];
    const Q4: [f64; 5] = [1.0, 106.8615961, 337.6496214, 2016.712389, 1597.063511];
    const P5: [f64; 5] = [1.003675074, 167.5702434, 4789.711289, 21217.86767, -22324.94910];
    const Q5: [f64; 5] = [1.0, 156.9424537, 3745.310488, 9834.698876, 66924.28357];
    const P6: [f64; 5] = [1.000827619, 664.9143136, 62972.92665, 475554.6998, -5743609.109];
    const Q6: [f64; 5] = [1.0, 651.4101098, 56974.73333, 165917.4725, -2815759.939];
    const A1: [f64; 3] = [0.04166666667, -0.01996527778, 0.02709538966];
    const A2: [f64; 2] = [-1.845568670, -4.284640743];

    if v.is_nan() {
        return 0.0;
    }

    if v < -5.5 {
        let u = (v + 1.0).exp();
        if u < 1e-10 {
            return 0.0;
        }
        let ue = (-1.0 / u).exp();
        let us = u.sqrt();
        0.3989422803 * (ue / us) * (1.0 + (A1[0] + (A1[1] + A1[2] * u) * u) * u)
    } else if v < -1.0 {
        let u = (-v - 1.0).exp();
        (-u).exp() * u.sqrt() * rational(&P1, &Q1, v)
    } else if v < 1.0 {
        rational(&P2, &Q2, v)
    } else if v < 5.0 {
        rational(&P3, &Q3, v)
    } else if v < 12.0 {
        let u = 1.0 / v;
        u * u * rational(&P4, &Q4, u)
    } else if v < 50.0 {
        let u = 1.0 / v;
        u * u * rational(&P5, &Q5, u)
    } else if v < 300.0 {
        let u = 1.0 / v;
        u * u * rational(&P6, &Q6, u)
    } else {
        let u = 1.0 / (v - v * v.ln() / (v + 1.0));
        u * u * (1.0 + (A2[0] + A2[1] * u) * u)
    }
}

#[inline]
fn rational(p: &[f64; 5], q: &[f64; 5], x: f64) -> f64 {
    let num = p[0] + (p[1] + (p[2] + (p[3] + p[4] * x) * x) * x) * x;
    let den = q[0] + (q[1] + (q[2] + (q[3] + q[4] * x) * x) * x) * x;
    num / den
}
