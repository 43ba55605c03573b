//! Change detection between a baseline and an analysis period
//!
//! - Anomaly: `analysis - baseline`, band by band, gated by water occurrence
//! - Threshold classes over a single-band anomaly
//! - Water change: binarised and continuous occurrence differences

use crate::masking::{binarize, WaterExclusion, WaterThresholds};
use chronocube_core::raster::{MultiBandRaster, Raster};
use chronocube_core::{Error, Result};
use chronocube_parallel::{ParallelStrategy, ProcessingMode};
use ndarray::{Array2, Axis};
use tracing::debug;

/// Class of one anomaly pixel, with its output code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ChangeClass {
    NoData = 0,
    NoChange = 100,
    Increase = 200,
    Decrease = 300,
}

impl ChangeClass {
    pub fn code(self) -> u16 {
        self as u16
    }
}

/// Buckets anomalies by two thresholds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdClassifier {
    min_c: f64,
    max_c: f64,
}

impl ThresholdClassifier {
    /// Requires finite `min_c < max_c`
    pub fn new(min_c: f64, max_c: f64) -> Result<Self> {
        if !(min_c.is_finite() && max_c.is_finite() && min_c < max_c) {
            return Err(Error::InvalidParameter {
                name: "thresholds",
                value: format!("min={}, max={}", min_c, max_c),
                reason: "minimum must be strictly below maximum".into(),
            });
        }
        Ok(Self { min_c, max_c })
    }

    pub fn min_c(&self) -> f64 {
        self.min_c
    }

    pub fn max_c(&self) -> f64 {
        self.max_c
    }

    pub fn classify_value(&self, value: f64) -> ChangeClass {
        if value.is_nan() {
            ChangeClass::NoData
        } else if value >= self.max_c {
            ChangeClass::Increase
        } else if value <= self.min_c {
            ChangeClass::Decrease
        } else {
            ChangeClass::NoChange
        }
    }

    /// Class codes with nodata 0, on the anomaly's grid and footprint
    pub fn classify(&self, anomaly: &Raster<f64>) -> Raster<u16> {
        let data = anomaly.data().mapv(|v| {
            let v = if anomaly.is_nodata(v) { f64::NAN } else { v };
            self.classify_value(v).code()
        });
        anomaly.with_same_meta(data, Some(ChangeClass::NoData.code()))
    }
}

/// Differences two derived index rasters
#[derive(Debug, Clone, Copy)]
pub struct ChangeDetector {
    exclusion: WaterExclusion,
    mode: ProcessingMode,
}

impl ChangeDetector {
    pub fn new(exclusion: WaterExclusion) -> Self {
        Self {
            exclusion,
            mode: ProcessingMode::default(),
        }
    }

    pub fn with_mode(mut self, mode: ProcessingMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn exclusion(&self) -> WaterExclusion {
        self.exclusion
    }

    /// Band-wise `analysis - baseline`.
    ///
    /// A pixel is nodata unless both values are valid and each period's
    /// occurrence passes the exclusion rule. A period without an occurrence
    /// raster applies no exclusion.
    pub fn anomaly(
        &self,
        baseline: &MultiBandRaster,
        analysis: &MultiBandRaster,
        baseline_water: Option<&Raster<f64>>,
        analysis_water: Option<&Raster<f64>>,
    ) -> Result<MultiBandRaster> {
        let (rows, cols) = baseline.shape();
        if analysis.shape() != (rows, cols) {
            return Err(Error::SizeMismatch {
                er: rows,
                ec: cols,
                ar: analysis.shape().0,
                ac: analysis.shape().1,
            });
        }
        if baseline.band_names() != analysis.band_names() {
            return Err(Error::ShapeMismatch(format!(
                "baseline bands {:?} differ from analysis bands {:?}",
                baseline.band_names(),
                analysis.band_names()
            )));
        }
        for water in [baseline_water, analysis_water].into_iter().flatten() {
            if water.shape() != (rows, cols) {
                return Err(Error::SizeMismatch {
                    er: rows,
                    ec: cols,
                    ar: water.rows(),
                    ac: water.cols(),
                });
            }
        }

        let n_bands = baseline.n_bands();
        let before = baseline.data();
        let after = analysis.data();
        let passes = |w: Option<&Raster<f64>>, row: usize, col: usize| {
            w.map_or(true, |w| self.exclusion.allows(w.data()[[row, col]]))
        };

        let row_values: Vec<Vec<f64>> = self.mode.par_map(0..rows, |row| {
            let mut out = vec![f64::NAN; n_bands * cols];
            for col in 0..cols {
                if !passes(baseline_water, row, col) || !passes(analysis_water, row, col) {
                    continue;
                }
                for b in 0..n_bands {
                    let (x, y) = (before[[b, row, col]], after[[b, row, col]]);
                    if !x.is_nan() && !y.is_nan() {
                        out[b * cols + col] = y - x;
                    }
                }
            }
            out
        });

        let mut planes = vec![Array2::from_elem((rows, cols), f64::NAN); n_bands];
        for (row, values) in row_values.into_iter().enumerate() {
            for (b, plane) in planes.iter_mut().enumerate() {
                for col in 0..cols {
                    plane[[row, col]] = values[b * cols + col];
                }
            }
        }
        let out = baseline.with_same_meta(baseline.band_names().to_vec(), planes)?;
        debug!(bands = n_bands, rows, cols, exclusion = ?self.exclusion, "computed anomaly");
        Ok(out)
    }
}

/// Plain `after - before` of two single-band rasters; NaN where either is nodata
pub fn difference(before: &Raster<f64>, after: &Raster<f64>) -> Result<Raster<f64>> {
    if after.shape() != before.shape() {
        return Err(Error::SizeMismatch {
            er: before.rows(),
            ec: before.cols(),
            ar: after.rows(),
            ac: after.cols(),
        });
    }
    let mut out = before.clone();
    ndarray::Zip::from(out.data_mut())
        .and(before.data())
        .and(after.data())
        .for_each(|o, &b, &a| {
            *o = if before.is_nodata(b) || after.is_nodata(a) {
                f64::NAN
            } else {
                a - b
            };
        });
    out.set_nodata(Some(f64::NAN));
    Ok(out)
}

/// Band names of [`WaterChange::into_bands`]
pub const WATER_CHANGE_BANDS: [&str; 2] = ["difference", "difference_range"];

/// Water change between two occurrence rasters
#[derive(Debug, Clone)]
pub struct WaterChange {
    /// Binarised analysis minus binarised baseline, in {-1, 0, 1}
    pub difference: Raster<f64>,
    /// Continuous occurrence difference
    pub difference_range: Raster<f64>,
}

impl WaterChange {
    /// Both layers stacked in [`WATER_CHANGE_BANDS`] order on the baseline grid
    pub fn into_bands(self) -> Result<MultiBandRaster> {
        let data = ndarray::stack(
            Axis(0),
            &[self.difference.data().view(), self.difference_range.data().view()],
        )
        .map_err(|e| Error::ShapeMismatch(e.to_string()))?;
        let names = WATER_CHANGE_BANDS.iter().map(|b| b.to_string()).collect();
        let mut out = MultiBandRaster::new(data, names)?;
        out.set_transform(*self.difference.transform());
        out.set_crs(self.difference.crs().cloned());
        Ok(out)
    }
}

pub fn water_change(
    baseline: &Raster<f64>,
    analysis: &Raster<f64>,
    thresholds: &WaterThresholds,
) -> Result<WaterChange> {
    let presence = thresholds.water_presence;
    Ok(WaterChange {
        difference: difference(&binarize(baseline, presence), &binarize(analysis, presence))?,
        difference_range: difference(baseline, analysis)?,
    })
}
