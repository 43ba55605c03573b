//! Geometric median of band vectors
//!
//! Weiszfeld iteration in normalized reflectance space, started from the
//! sample mean. Runs sequentially; callers parallelize over pixels or chunks.

use chronocube_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Floor on sample distances, keeps weights finite when the estimate sits on a sample
const MIN_DISTANCE: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeomedianParams {
    /// Normalization `v * scale + offset`
    pub scale: f64,
    pub offset: f64,
    /// Stop once an update moves the estimate less than this (normalized units)
    pub eps: f64,
    /// Iteration cap; reaching it returns the current estimate
    pub max_iter: usize,
}

impl Default for GeomedianParams {
    fn default() -> Self {
        let scale = 1e-4;
        Self {
            scale,
            offset: 0.0,
            eps: 0.2 * scale,
            max_iter: 1000,
        }
    }
}

impl GeomedianParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(Error::InvalidParameter {
                name: "scale",
                value: self.scale.to_string(),
                reason: "must be a positive number".into(),
            });
        }
        if !(self.eps.is_finite() && self.eps > 0.0) {
            return Err(Error::InvalidParameter {
                name: "eps",
                value: self.eps.to_string(),
                reason: "must be a positive number".into(),
            });
        }
        if self.max_iter == 0 {
            return Err(Error::InvalidParameter {
                name: "max_iter",
                value: "0".into(),
                reason: "at least one iteration is required".into(),
            });
        }
        Ok(())
    }
}

/// Outcome of one solve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convergence {
    Converged { iterations: usize },
    /// The cap was reached; the estimate is the last iterate
    IterationLimit,
}

/// Geometric median of `samples`, row-major `n_samples x n_bands`, written
/// to `out` in the input units.
pub fn geomedian(
    samples: &[f64],
    n_bands: usize,
    params: &GeomedianParams,
    out: &mut [f64],
) -> Convergence {
    let n = if n_bands == 0 { 0 } else { samples.len() / n_bands };
    if n <= 1 {
        if n == 1 {
            out[..n_bands].copy_from_slice(&samples[..n_bands]);
        } else {
            out[..n_bands].fill(f64::NAN);
        }
        return Convergence::Converged { iterations: 0 };
    }

    let x: Vec<f64> = samples.iter().map(|v| v * params.scale + params.offset).collect();

    let mut y = vec![0.0; n_bands];
    for sample in x.chunks_exact(n_bands) {
        for (yb, v) in y.iter_mut().zip(sample) {
            *yb += v;
        }
    }
    y.iter_mut().for_each(|v| *v /= n as f64);

    let mut num = vec![0.0; n_bands];
    let mut status = Convergence::IterationLimit;
    for iter in 1..=params.max_iter {
        num.fill(0.0);
        let mut den = 0.0;
        for sample in x.chunks_exact(n_bands) {
            let d = sample
                .iter()
                .zip(&y)
                .map(|(a, b)| (a - b) * (a - b))
                .sum::<f64>()
                .sqrt()
                .max(MIN_DISTANCE);
            let w = 1.0 / d;
            for (nb, v) in num.iter_mut().zip(sample) {
                *nb += w * v;
            }
            den += w;
        }

        let mut step = 0.0;
        for (yb, nb) in y.iter_mut().zip(&num) {
            let next = nb / den;
            step += (next - *yb) * (next - *yb);
            *yb = next;
        }

        if step.sqrt() < params.eps {
            status = Convergence::Converged { iterations: iter };
            break;
        }
    }

    for (o, v) in out.iter_mut().zip(&y) {
        *o = (v - params.offset) / params.scale;
    }
    status
}
