//! Multi-temporal, multi-band raster cube (time, band, y, x)

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::raster::{GeoTransform, QualityMaskArray};
use ndarray::{s, Array4, ArrayView3, Axis};

/// A stack of observations over one spatial grid.
///
/// Values are `f64`; missing observations are either NaN or equal to the
/// cube's nodata sentinel. All bands share one (time, y, x) grid, which the
/// single backing array enforces.
#[derive(Debug, Clone)]
pub struct RasterCube {
    data: Array4<f64>,
    bands: Vec<String>,
    times: Vec<String>,
    nodata: Option<f64>,
    transform: GeoTransform,
    crs: Option<CRS>,
}

impl RasterCube {
    /// Wrap a (time, band, y, x) array with one name per band
    pub fn new(data: Array4<f64>, bands: Vec<String>) -> Result<Self> {
        let (n_times, n_bands, _, _) = data.dim();
        if n_bands != bands.len() {
            return Err(Error::ShapeMismatch(format!(
                "{} band names for {} bands",
                bands.len(),
                n_bands
            )));
        }
        Ok(Self {
            data,
            bands,
            times: (0..n_times).map(|t| format!("t{}", t)).collect(),
            nodata: None,
            transform: GeoTransform::default(),
            crs: None,
        })
    }

    /// Attach acquisition labels, one per time step
    pub fn with_times(mut self, times: Vec<String>) -> Result<Self> {
        if times.len() != self.n_times() {
            return Err(Error::ShapeMismatch(format!(
                "{} time labels for {} time steps",
                times.len(),
                self.n_times()
            )));
        }
        self.times = times;
        Ok(self)
    }

    /// Set the nodata sentinel (NaN is always treated as nodata)
    pub fn with_nodata(mut self, nodata: Option<f64>) -> Self {
        self.nodata = nodata;
        self
    }

    /// Set georeferencing
    pub fn with_georef(mut self, transform: GeoTransform, crs: Option<CRS>) -> Self {
        self.transform = transform;
        self.crs = crs;
        self
    }

    /// Fail with `EmptyResult` when any axis is zero-length
    pub fn ensure_not_empty(&self, what: &str) -> Result<()> {
        let (t, b, r, c) = self.data.dim();
        if t == 0 || b == 0 || r == 0 || c == 0 {
            return Err(Error::EmptyResult(format!(
                "{}: cube has shape (time={}, band={}, y={}, x={})",
                what, t, b, r, c
            )));
        }
        Ok(())
    }

    // Dimensions

    /// (time, band, rows, cols)
    pub fn dim(&self) -> (usize, usize, usize, usize) {
        self.data.dim()
    }

    /// Number of time steps
    pub fn n_times(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    /// Number of bands
    pub fn n_bands(&self) -> usize {
        self.bands.len()
    }

    /// Spatial dimensions as (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        let (_, _, rows, cols) = self.data.dim();
        (rows, cols)
    }

    // Bands

    /// Band names in storage order
    pub fn band_names(&self) -> &[String] {
        &self.bands
    }

    /// Acquisition labels
    pub fn times(&self) -> &[String] {
        &self.times
    }

    /// Position of a named band
    pub fn band_index(&self, name: &str) -> Result<usize> {
        self.bands
            .iter()
            .position(|b| b == name)
            .ok_or_else(|| Error::MissingBand(name.to_string()))
    }

    /// (time, y, x) view of one band
    pub fn band(&self, name: &str) -> Result<ArrayView3<'_, f64>> {
        let idx = self.band_index(name)?;
        Ok(self.data.index_axis(Axis(1), idx))
    }

    /// Sub-cube holding only the named bands, in the order given
    pub fn select_bands(&self, names: &[&str]) -> Result<Self> {
        let indices = names
            .iter()
            .map(|n| self.band_index(n))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            data: self.data.select(Axis(1), &indices),
            bands: names.iter().map(|n| n.to_string()).collect(),
            times: self.times.clone(),
            nodata: self.nodata,
            transform: self.transform,
            crs: self.crs.clone(),
        })
    }

    /// Cube holding only the listed time steps, in the order given
    pub fn select_times(&self, steps: &[usize]) -> Result<Self> {
        if let Some(&bad) = steps.iter().find(|&&t| t >= self.n_times()) {
            return Err(Error::InvalidParameter {
                name: "time",
                value: bad.to_string(),
                reason: format!("cube has {} time steps", self.n_times()),
            });
        }
        Ok(Self {
            data: self.data.select(Axis(0), steps),
            bands: self.bands.clone(),
            times: steps.iter().map(|&t| self.times[t].clone()).collect(),
            nodata: self.nodata,
            transform: self.transform,
            crs: self.crs.clone(),
        })
    }

    // Values

    /// Single value, no bounds checking beyond ndarray's panic-free `get`
    pub fn value(&self, time: usize, band: usize, row: usize, col: usize) -> Option<f64> {
        self.data.get((time, band, row, col)).copied()
    }

    /// Whether `value` is missing under this cube's sentinel
    pub fn is_nodata(&self, value: f64) -> bool {
        value.is_nan() || self.nodata == Some(value)
    }

    /// Nodata sentinel
    pub fn nodata(&self) -> Option<f64> {
        self.nodata
    }

    /// Underlying (time, band, y, x) array
    pub fn data(&self) -> &Array4<f64> {
        &self.data
    }

    /// Fail unless `mask` has this cube's (time, y, x) shape
    pub fn check_mask(&self, mask: &QualityMaskArray) -> Result<()> {
        let (t, _, r, c) = self.data.dim();
        if mask.dim() != (t, r, c) {
            return Err(Error::ShapeMismatch(format!(
                "mask {:?} does not match cube (time={}, y={}, x={})",
                mask.dim(),
                t,
                r,
                c
            )));
        }
        Ok(())
    }

    /// Copy out a spatial window covering every time step and band
    pub fn window(
        &self,
        row_offset: usize,
        col_offset: usize,
        rows: usize,
        cols: usize,
    ) -> Result<Self> {
        let (total_rows, total_cols) = self.shape();
        if row_offset + rows > total_rows || col_offset + cols > total_cols {
            return Err(Error::IndexOutOfBounds {
                row: row_offset + rows,
                col: col_offset + cols,
                rows: total_rows,
                cols: total_cols,
            });
        }
        Ok(Self {
            data: self
                .data
                .slice(s![.., .., row_offset..row_offset + rows, col_offset..col_offset + cols])
                .to_owned(),
            bands: self.bands.clone(),
            times: self.times.clone(),
            nodata: self.nodata,
            transform: self.transform.window(row_offset, col_offset),
            crs: self.crs.clone(),
        })
    }

    // Metadata

    /// Get the geotransform
    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    /// Get the CRS
    pub fn crs(&self) -> Option<&CRS> {
        self.crs.as_ref()
    }
}
