//! Fractional cover by constrained linear spectral unmixing
//!
//! Each pixel spectrum (blue, green, red, nir, swir1, swir2; reflectance in
//! [0, 1]) is modelled as a non-negative mix of three endmembers: bare soil,
//! photosynthetic vegetation and non-photosynthetic vegetation. A weighted
//! extra row pulls the fractions towards summing to one. The non-negative
//! least squares problem is solved exactly by checking every endmember
//! subset, which is cheap for three endmembers.

use serde::{Deserialize, Serialize};

/// Input band order expected by the unmixing
pub const UNMIXING_BANDS: [&str; 6] = ["blue", "green", "red", "nir", "swir1", "swir2"];

/// Output bands: bare soil, photosynthetic veg, non-photosynthetic veg, unmixing error
pub const COVER_BANDS: [&str; 4] = ["bs", "pv", "npv", "ue"];

/// Endmember spectra over [`UNMIXING_BANDS`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Endmembers {
    pub bare_soil: [f64; 6],
    pub green_vegetation: [f64; 6],
    pub dry_vegetation: [f64; 6],
}

impl Default for Endmembers {
    fn default() -> Self {
        Self {
            bare_soil: [0.12, 0.17, 0.22, 0.28, 0.36, 0.31],
            green_vegetation: [0.03, 0.07, 0.04, 0.45, 0.20, 0.09],
            dry_vegetation: [0.08, 0.11, 0.15, 0.25, 0.38, 0.28],
        }
    }
}

impl Endmembers {
    fn column(&self, j: usize) -> &[f64; 6] {
        match j {
            0 => &self.bare_soil,
            1 => &self.green_vegetation,
            _ => &self.dry_vegetation,
        }
    }
}

/// Unmixed fractions of one pixel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoverFractions {
    pub bare_soil: f64,
    pub green_vegetation: f64,
    pub dry_vegetation: f64,
    /// Euclidean norm of the spectral residual
    pub unmixing_error: f64,
}

impl CoverFractions {
    /// Rounded percentages in [`COVER_BANDS`] order
    pub fn to_percent(&self) -> [f64; 4] {
        [
            (self.bare_soil * 100.0).round(),
            (self.green_vegetation * 100.0).round(),
            (self.dry_vegetation * 100.0).round(),
            (self.unmixing_error * 100.0).round(),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FractionalCoverModel {
    pub endmembers: Endmembers,
    /// Weight of the sum-to-one row
    pub sum_to_one_weight: f64,
}

impl Default for FractionalCoverModel {
    fn default() -> Self {
        Self {
            endmembers: Endmembers::default(),
            sum_to_one_weight: 1.0,
        }
    }
}

impl FractionalCoverModel {
    /// Unmix one spectrum. `None` when any band is not finite.
    pub fn unmix(&self, reflectance: &[f64; 6]) -> Option<CoverFractions> {
        if reflectance.iter().any(|v| !v.is_finite()) {
            return None;
        }
        let w = self.sum_to_one_weight;

        let mut best: Option<([f64; 3], f64)> = None;
        for subset in 1u8..8 {
            let cols: Vec<usize> = (0..3).filter(|j| subset & (1 << j) != 0).collect();
            let Some(coef) = self.solve_subset(&cols, reflectance) else {
                continue;
            };
            if coef.iter().any(|&c| c < -1e-12) {
                continue;
            }
            let mut x = [0.0; 3];
            for (k, &j) in cols.iter().enumerate() {
                x[j] = coef[k].max(0.0);
            }
            let spectral = self.spectral_residual(&x, reflectance);
            let constraint = w * (x.iter().sum::<f64>() - 1.0);
            let objective = spectral * spectral + constraint * constraint;
            if best.map_or(true, |(_, o)| objective < o) {
                best = Some((x, objective));
            }
        }

        best.map(|(x, _)| CoverFractions {
            bare_soil: x[0],
            green_vegetation: x[1],
            dry_vegetation: x[2],
            unmixing_error: self.spectral_residual(&x, reflectance),
        })
    }

    fn spectral_residual(&self, x: &[f64; 3], reflectance: &[f64; 6]) -> f64 {
        (0..6)
            .map(|i| {
                let model: f64 = (0..3).map(|j| self.endmembers.column(j)[i] * x[j]).sum();
                (model - reflectance[i]).powi(2)
            })
            .sum::<f64>()
            .sqrt()
    }

    /// Unconstrained least squares over the chosen endmembers, via the
    /// normal equations of the augmented system
    fn solve_subset(&self, cols: &[usize], reflectance: &[f64; 6]) -> Option<Vec<f64>> {
        let n = cols.len();
        let w = self.sum_to_one_weight;
        let mut m = vec![vec![0.0; n]; n];
        let mut v = vec![0.0; n];
        for (a, &ja) in cols.iter().enumerate() {
            let ea = self.endmembers.column(ja);
            for (b, &jb) in cols.iter().enumerate() {
                let eb = self.endmembers.column(jb);
                m[a][b] = (0..6).map(|i| ea[i] * eb[i]).sum::<f64>() + w * w;
            }
            v[a] = (0..6).map(|i| ea[i] * reflectance[i]).sum::<f64>() + w * w;
        }
        solve_linear(m, v)
    }
}

/// Gaussian elimination with partial pivoting
fn solve_linear(mut m: Vec<Vec<f64>>, mut v: Vec<f64>) -> Option<Vec<f64>> {
    let n = v.len();
    for k in 0..n {
        let pivot = (k..n).max_by(|&a, &b| m[a][k].abs().total_cmp(&m[b][k].abs()))?;
        if m[pivot][k].abs() < 1e-14 {
            return None;
        }
        m.swap(k, pivot);
        v.swap(k, pivot);
        for r in k + 1..n {
            let f = m[r][k] / m[k][k];
            for c in k..n {
                m[r][c] -= f * m[k][c];
            }
            v[r] -= f * v[k];
        }
    }
    let mut x = vec![0.0; n];
    for k in (0..n).rev() {
        let tail: f64 = (k + 1..n).map(|c| m[k][c] * x[c]).sum();
        x[k] = (v[k] - tail) / m[k][k];
    }
    Some(x)
}
