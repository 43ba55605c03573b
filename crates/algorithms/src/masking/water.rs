//! Water occurrence and water-based exclusion

use chronocube_core::raster::{MultiBandRaster, QualityMaskArray, Raster, RasterCube};
use chronocube_core::{Error, Result};
use chronocube_parallel::{ParallelStrategy, ProcessingMode};
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};

/// Measurement name of the water classification products
pub const WATER_BAND: &str = "water_classification";

/// Named occurrence thresholds. The two products use them independently.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaterThresholds {
    /// Vegetation and land analyses keep pixels with occurrence at or below this
    pub vegetation_exclusion: f64,
    /// Water change counts a pixel as water at or above this occurrence
    pub water_presence: f64,
}

impl Default for WaterThresholds {
    fn default() -> Self {
        Self {
            vegetation_exclusion: 0.4,
            water_presence: 0.3,
        }
    }
}

impl WaterThresholds {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("vegetation_exclusion", self.vegetation_exclusion),
            ("water_presence", self.water_presence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::InvalidParameter {
                    name,
                    value: value.to_string(),
                    reason: "occurrence thresholds must lie in [0, 1]".into(),
                });
            }
        }
        Ok(())
    }
}

/// Rule deciding which pixels take part in a change analysis
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WaterExclusion {
    /// Keep pixels whose occurrence is at most the threshold
    MaxOccurrence(f64),
    /// Keep only pixels never observed as water
    NeverWet,
}

impl WaterExclusion {
    /// Whether a pixel with this occurrence is kept. Nodata occurrence is not.
    pub fn allows(&self, occurrence: f64) -> bool {
        match *self {
            WaterExclusion::MaxOccurrence(t) => occurrence <= t,
            WaterExclusion::NeverWet => occurrence == 0.0,
        }
    }

    /// Copy of `raster` with excluded pixels set to nodata in every band
    pub fn apply(
        &self,
        raster: &MultiBandRaster,
        occurrence: &Raster<f64>,
    ) -> Result<MultiBandRaster> {
        let (rows, cols) = raster.shape();
        if occurrence.shape() != (rows, cols) {
            return Err(Error::SizeMismatch {
                er: rows,
                ec: cols,
                ar: occurrence.rows(),
                ac: occurrence.cols(),
            });
        }
        let mut out = raster.clone();
        let occ = occurrence.data();
        out.retain_pixels(|row, col| self.allows(occ[[row, col]]));
        Ok(out)
    }
}

/// Computes water occurrence from a water classification cube
#[derive(Debug, Clone, Copy, Default)]
pub struct WaterMask {
    mode: ProcessingMode,
}

impl WaterMask {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mut self, mode: ProcessingMode) -> Self {
        self.mode = mode;
        self
    }

    fn band(cube: &RasterCube) -> Result<usize> {
        match cube.band_index(WATER_BAND) {
            Ok(b) => Ok(b),
            Err(_) if cube.n_bands() == 1 => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn is_valid(cube: &RasterCube, v: f64) -> bool {
        !cube.is_nodata(v) && v >= 0.0
    }

    /// Temporal mean of valid classifications, NaN where none is valid
    pub fn occurrence(&self, cube: &RasterCube) -> Result<Raster<f64>> {
        let band = Self::band(cube)?;
        let (times, _, rows, cols) = cube.dim();
        let data = cube.data();

        let values: Vec<f64> = self
            .mode
            .par_map(0..rows, |row| {
                let mut out = vec![f64::NAN; cols];
                for (col, cell) in out.iter_mut().enumerate() {
                    let (sum, n) = (0..times)
                        .map(|t| data[[t, band, row, col]])
                        .filter(|&v| Self::is_valid(cube, v))
                        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
                    if n > 0 {
                        *cell = sum / n as f64;
                    }
                }
                out
            })
            .into_iter()
            .flatten()
            .collect();

        let data = Array2::from_shape_vec((rows, cols), values)
            .map_err(|e| Error::Other(e.to_string()))?;
        let mut raster = Raster::from_array(data);
        raster.set_transform(*cube.transform());
        raster.set_crs(cube.crs().cloned());
        raster.set_nodata(Some(f64::NAN));
        Ok(raster)
    }

    /// Per-observation water mask aligned to `times`: true where the scene
    /// with the same time label classifies the pixel as water. Steps without
    /// a matching scene are all false.
    pub fn per_step(&self, cube: &RasterCube, times: &[String]) -> Result<QualityMaskArray> {
        let band = Self::band(cube)?;
        let (_, _, rows, cols) = cube.dim();
        let data = cube.data();
        let mut mask = Array3::from_elem((times.len(), rows, cols), false);
        for (t, label) in times.iter().enumerate() {
            let Some(src) = cube.times().iter().position(|l| l == label) else {
                continue;
            };
            for row in 0..rows {
                for col in 0..cols {
                    let v = data[[src, band, row, col]];
                    mask[[t, row, col]] = Self::is_valid(cube, v) && v > 0.0;
                }
            }
        }
        Ok(QualityMaskArray::from_array(mask))
    }
}

/// Re-quantize occurrence to water (1) / not water (0); nodata stays nodata
pub fn binarize(occurrence: &Raster<f64>, threshold: f64) -> Raster<f64> {
    let data = occurrence.data().mapv(|v| {
        if v.is_nan() {
            f64::NAN
        } else if v >= threshold {
            1.0
        } else {
            0.0
        }
    });
    occurrence.with_same_meta(data, Some(f64::NAN))
}
