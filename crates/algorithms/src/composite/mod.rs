//! Temporal compositing
//!
//! Reduces a masked (time, band, y, x) cube along time into one multi-band
//! raster. Every reducer works per pixel on the pixel's usable steps: steps
//! the mask marks valid and where no band is nodata. A pixel with no usable
//! step is nodata in every band.

mod geomedian;
mod select;
mod stats;

pub use geomedian::{geomedian, Convergence, GeomedianParams};
pub use select::{select_extreme, Extremum};
pub use stats::{mean, median, SeriesSummary};

use crate::indices::{IndexCalculator, IndexKind, IndexParams};
use chronocube_core::raster::{MultiBandRaster, QualityMaskArray, RasterCube};
use chronocube_core::{Error, Result};
use chronocube_parallel::{ParallelStrategy, ProcessingMode};
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

/// Temporal reducer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReducerKind {
    /// Per-band median
    Median,
    /// Per-band mean
    Mean,
    /// Full band vector of the step with the highest selection index
    MaxIndex,
    /// Full band vector of the step with the lowest selection index
    MinIndex,
    /// Multivariate geometric median of the band vectors
    Geomedian,
}

impl ReducerKind {
    pub const ALL: [ReducerKind; 5] = [
        ReducerKind::Median,
        ReducerKind::Mean,
        ReducerKind::MaxIndex,
        ReducerKind::MinIndex,
        ReducerKind::Geomedian,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ReducerKind::Median => "median",
            ReducerKind::Mean => "mean",
            ReducerKind::MaxIndex => "max_index",
            ReducerKind::MinIndex => "min_index",
            ReducerKind::Geomedian => "geomedian",
        }
    }

    fn extremum(&self) -> Option<Extremum> {
        match self {
            ReducerKind::MaxIndex => Some(Extremum::Max),
            ReducerKind::MinIndex => Some(Extremum::Min),
            _ => None,
        }
    }
}

impl fmt::Display for ReducerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ReducerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "median" => Ok(ReducerKind::Median),
            "mean" => Ok(ReducerKind::Mean),
            "max" | "max_index" | "max_ndvi" => Ok(ReducerKind::MaxIndex),
            "min" | "min_index" | "min_ndvi" => Ok(ReducerKind::MinIndex),
            "geomedian" | "robust_median" => Ok(ReducerKind::Geomedian),
            _ => {
                let expected: Vec<&str> = ReducerKind::ALL.iter().map(|r| r.name()).collect();
                Err(Error::unknown("reducer", s, &expected))
            }
        }
    }
}

/// Reducer parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompositeParams {
    /// Index scored by the max/min-index reducers
    pub selection_index: IndexKind,
    /// Scaling used when scoring the selection index
    pub index: IndexParams,
    pub geomedian: GeomedianParams,
}

impl Default for CompositeParams {
    fn default() -> Self {
        Self {
            selection_index: IndexKind::Ndvi,
            index: IndexParams::default(),
            geomedian: GeomedianParams::default(),
        }
    }
}

/// Counters from one compositing run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeStats {
    /// Pixels with at least one usable step
    pub composited: usize,
    /// Geomedian pixels that stopped at the iteration cap
    pub iteration_limited: usize,
}

/// Reduces a cube along time with one reducer
#[derive(Debug, Clone)]
pub struct Compositor {
    reducer: ReducerKind,
    params: CompositeParams,
    mode: ProcessingMode,
}

impl Compositor {
    pub fn new(reducer: ReducerKind, params: CompositeParams) -> Result<Self> {
        params.geomedian.validate()?;
        if reducer.extremum().is_some() && !params.selection_index.is_scalar() {
            return Err(Error::InvalidParameter {
                name: "selection_index",
                value: params.selection_index.to_string(),
                reason: "index-selection reducers need a scalar index".into(),
            });
        }
        Ok(Self {
            reducer,
            params,
            mode: ProcessingMode::default(),
        })
    }

    /// Row parallelism inside one call. Chunked pipelines pass
    /// `Sequential` so chunks are the only source of concurrency.
    pub fn with_mode(mut self, mode: ProcessingMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn reducer(&self) -> ReducerKind {
        self.reducer
    }

    pub fn composite(&self, cube: &RasterCube, mask: &QualityMaskArray) -> Result<MultiBandRaster> {
        self.composite_with_stats(cube, mask).map(|(c, _)| c)
    }

    pub fn composite_with_stats(
        &self,
        cube: &RasterCube,
        mask: &QualityMaskArray,
    ) -> Result<(MultiBandRaster, CompositeStats)> {
        cube.ensure_not_empty("composite input")?;
        cube.check_mask(mask)?;
        let (times, n_bands, rows, cols) = cube.dim();

        let selector = match self.reducer.extremum() {
            Some(_) => Some(
                IndexCalculator::new(self.params.selection_index, self.params.index)?
                    .bind(cube.band_names())?,
            ),
            None => None,
        };
        debug!(reducer = %self.reducer, times, bands = n_bands, rows, cols, "compositing");

        let data = cube.data();
        let row_results: Vec<(Vec<f64>, CompositeStats)> = self.mode.par_map(0..rows, |row| {
            let mut out = vec![f64::NAN; n_bands * cols];
            let mut stats = CompositeStats::default();
            let mut samples = Vec::with_capacity(times * n_bands);
            let mut column = Vec::with_capacity(times);
            let mut px = vec![f64::NAN; n_bands];

            for col in 0..cols {
                samples.clear();
                for t in 0..times {
                    if !mask.is_valid(t, row, col)
                        || (0..n_bands).any(|b| cube.is_nodata(data[[t, b, row, col]]))
                    {
                        continue;
                    }
                    samples.extend((0..n_bands).map(|b| data[[t, b, row, col]]));
                }
                if samples.is_empty() {
                    continue;
                }
                let n = samples.len() / n_bands;
                stats.composited += 1;

                match self.reducer {
                    ReducerKind::Median | ReducerKind::Mean => {
                        for (b, v) in px.iter_mut().enumerate() {
                            column.clear();
                            column.extend((0..n).map(|k| samples[k * n_bands + b]));
                            *v = if self.reducer == ReducerKind::Median {
                                median(&mut column)
                            } else {
                                mean(&column)
                            };
                        }
                    }
                    ReducerKind::MaxIndex | ReducerKind::MinIndex => {
                        let scores: Vec<f64> = match &selector {
                            Some(sel) => (0..n)
                                .map(|k| sel.scalar(|b| samples[k * n_bands + b]))
                                .collect(),
                            None => Vec::new(),
                        };
                        let extremum = self.reducer.extremum().unwrap_or(Extremum::Max);
                        // Undefined scores everywhere: keep the earliest usable step
                        let k = select_extreme(&scores, extremum).unwrap_or(0);
                        px.copy_from_slice(&samples[k * n_bands..(k + 1) * n_bands]);
                    }
                    ReducerKind::Geomedian => {
                        let status = geomedian(&samples, n_bands, &self.params.geomedian, &mut px);
                        if status == Convergence::IterationLimit {
                            stats.iteration_limited += 1;
                        }
                    }
                }

                for (b, v) in px.iter().enumerate() {
                    out[b * cols + col] = *v;
                }
            }
            (out, stats)
        });

        let mut stats = CompositeStats::default();
        let mut result = Array3::from_elem((n_bands, rows, cols), f64::NAN);
        for (row, (values, row_stats)) in row_results.into_iter().enumerate() {
            stats.composited += row_stats.composited;
            stats.iteration_limited += row_stats.iteration_limited;
            for b in 0..n_bands {
                for col in 0..cols {
                    result[[b, row, col]] = values[b * cols + col];
                }
            }
        }

        if stats.iteration_limited > 0 {
            warn!(
                pixels = stats.iteration_limited,
                max_iter = self.params.geomedian.max_iter,
                "geomedian reached the iteration cap, returning best estimates"
            );
        }

        let mut composite = MultiBandRaster::new(result, cube.band_names().to_vec())?;
        composite.set_transform(*cube.transform());
        composite.set_crs(cube.crs().cloned());
        Ok((composite, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array4;

    /// 1x2 grid, bands (red, nir), one entry per time step for each pixel
    fn cube(series: &[[(f64, f64); 2]]) -> RasterCube {
        let mut data = Array4::zeros((series.len(), 2, 1, 2));
        for (t, pixels) in series.iter().enumerate() {
            for (col, (red, nir)) in pixels.iter().enumerate() {
                data[[t, 0, 0, col]] = *red;
                data[[t, 1, 0, col]] = *nir;
            }
        }
        RasterCube::new(data, vec!["red".into(), "nir".into()]).unwrap()
    }

    fn compositor(reducer: ReducerKind) -> Compositor {
        Compositor::new(reducer, CompositeParams::default())
            .unwrap()
            .with_mode(ProcessingMode::Sequential)
    }

    #[test]
    fn test_fully_masked_pixel_is_nodata_for_every_reducer() {
        let c = cube(&[[(100.0, 400.0), (100.0, 400.0)], [(200.0, 300.0), (200.0, 300.0)]]);
        let mut mask = QualityMaskArray::all_valid(2, 1, 2);
        mask.set(0, 0, 1, false);
        mask.set(1, 0, 1, false);
        for reducer in ReducerKind::ALL {
            let out = compositor(reducer).composite(&c, &mask).unwrap();
            assert!(out.is_pixel_nodata(0, 1), "{} kept a masked pixel", reducer);
            assert!(!out.is_pixel_nodata(0, 0), "{} lost a valid pixel", reducer);
        }
    }

    #[test]
    fn test_median_even_count() {
        let c = cube(&[
            [(100.0, 0.0), (0.0, 0.0)],
            [(300.0, 0.0), (0.0, 0.0)],
            [(200.0, 0.0), (0.0, 0.0)],
            [(900.0, 0.0), (0.0, 0.0)],
        ]);
        let out = compositor(ReducerKind::Median)
            .composite(&c, &QualityMaskArray::all_valid(4, 1, 2))
            .unwrap();
        assert_relative_eq!(out.band("red").unwrap()[[0, 0]], 250.0);
    }

    #[test]
    fn test_max_index_tie_earliest() {
        // Steps 1 and 2 share the top NDVI (0.6); step 1 must win
        let c = cube(&[
            [(100.0, 200.0), (0.0, 0.0)],
            [(100.0, 400.0), (0.0, 0.0)],
            [(200.0, 800.0), (0.0, 0.0)],
        ]);
        let out = compositor(ReducerKind::MaxIndex)
            .composite(&c, &QualityMaskArray::all_valid(3, 1, 2))
            .unwrap();
        assert_eq!(out.pixel(0, 0), vec![100.0, 400.0]);
    }

    #[test]
    fn test_min_index_respects_mask() {
        let c = cube(&[
            [(300.0, 310.0), (0.0, 0.0)],
            [(100.0, 900.0), (0.0, 0.0)],
            [(250.0, 400.0), (0.0, 0.0)],
        ]);
        let mut mask = QualityMaskArray::all_valid(3, 1, 2);
        mask.set(0, 0, 0, false);
        let out = compositor(ReducerKind::MinIndex).composite(&c, &mask).unwrap();
        assert_eq!(out.pixel(0, 0), vec![250.0, 400.0]);
    }

    #[test]
    fn test_geomedian_stats() {
        let c = cube(&[[(1.0, 2.0), (1.0, 1.0)], [(3.0, 4.0), (5.0, 5.0)]]);
        let (out, stats) = compositor(ReducerKind::Geomedian)
            .composite_with_stats(&c, &QualityMaskArray::all_valid(2, 1, 2))
            .unwrap();
        assert_eq!(stats.composited, 2);
        assert!(!out.is_pixel_nodata(0, 1));
    }

    #[test]
    fn test_selection_index_must_be_scalar() {
        let params = CompositeParams {
            selection_index: IndexKind::FractionalCover,
            ..Default::default()
        };
        assert!(Compositor::new(ReducerKind::MaxIndex, params).is_err());
        assert!(Compositor::new(ReducerKind::Median, params).is_ok());
    }

    #[test]
    fn test_unknown_reducer() {
        assert!("mode".parse::<ReducerKind>().unwrap_err().is_configuration());
        assert_eq!("max".parse::<ReducerKind>().unwrap(), ReducerKind::MaxIndex);
        assert_eq!("robust-median".parse::<ReducerKind>().unwrap(), ReducerKind::Geomedian);
    }

    #[test]
    fn test_mask_shape_checked() {
        let c = cube(&[[(1.0, 2.0), (1.0, 1.0)]]);
        let mask = QualityMaskArray::all_valid(2, 1, 2);
        assert!(compositor(ReducerKind::Mean).composite(&c, &mask).is_err());
    }
}
