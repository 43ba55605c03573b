//! Multi-band raster (band, y, x), the shape of every composite

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::raster::{GeoTransform, Raster};
use ndarray::{s, Array2, Array3, ArrayView2, Axis};

/// A georeferenced stack of named `f64` bands sharing one grid.
///
/// Nodata is always NaN. A composite pixel that had no usable observation
/// is NaN in every band.
#[derive(Debug, Clone)]
pub struct MultiBandRaster {
    data: Array3<f64>,
    bands: Vec<String>,
    transform: GeoTransform,
    crs: Option<CRS>,
}

impl MultiBandRaster {
    /// Wrap a (band, y, x) array; `bands` names each slice along axis 0
    pub fn new(data: Array3<f64>, bands: Vec<String>) -> Result<Self> {
        if data.len_of(Axis(0)) != bands.len() {
            return Err(Error::ShapeMismatch(format!(
                "{} band names for {} bands",
                bands.len(),
                data.len_of(Axis(0))
            )));
        }
        Ok(Self {
            data,
            bands,
            transform: GeoTransform::default(),
            crs: None,
        })
    }

    /// All-NaN raster with the given band names
    pub fn empty(bands: Vec<String>, rows: usize, cols: usize) -> Self {
        Self {
            data: Array3::from_elem((bands.len(), rows, cols), f64::NAN),
            bands,
            transform: GeoTransform::default(),
            crs: None,
        }
    }

    /// Number of bands
    pub fn n_bands(&self) -> usize {
        self.bands.len()
    }

    /// Grid dimensions as (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        let (_, rows, cols) = self.data.dim();
        (rows, cols)
    }

    /// Band names in storage order
    pub fn band_names(&self) -> &[String] {
        &self.bands
    }

    /// Position of a named band
    pub fn band_index(&self, name: &str) -> Result<usize> {
        self.bands
            .iter()
            .position(|b| b == name)
            .ok_or_else(|| Error::MissingBand(name.to_string()))
    }

    /// View of a named band
    pub fn band(&self, name: &str) -> Result<ArrayView2<'_, f64>> {
        let idx = self.band_index(name)?;
        Ok(self.data.index_axis(Axis(0), idx))
    }

    /// Copy a named band out as a georeferenced single-band raster
    pub fn band_raster(&self, name: &str) -> Result<Raster<f64>> {
        let view = self.band(name)?;
        let mut raster = Raster::from_array(view.to_owned());
        raster.set_transform(self.transform);
        raster.set_crs(self.crs.clone());
        raster.set_nodata(Some(f64::NAN));
        Ok(raster)
    }

    /// Band vector at a pixel
    pub fn pixel(&self, row: usize, col: usize) -> Vec<f64> {
        self.data.slice(s![.., row, col]).to_vec()
    }

    /// True when every band is NaN at the pixel
    pub fn is_pixel_nodata(&self, row: usize, col: usize) -> bool {
        self.data.slice(s![.., row, col]).iter().all(|v| v.is_nan())
    }

    /// Underlying (band, y, x) array
    pub fn data(&self) -> &Array3<f64> {
        &self.data
    }

    /// Mutable access to the underlying array
    pub fn data_mut(&mut self) -> &mut Array3<f64> {
        &mut self.data
    }

    /// Write `part` into this raster at (`row_offset`, `col_offset`); band lists must match
    pub fn paste(
        &mut self,
        row_offset: usize,
        col_offset: usize,
        part: &MultiBandRaster,
    ) -> Result<()> {
        if part.bands != self.bands {
            return Err(Error::ShapeMismatch(format!(
                "cannot paste bands {:?} into {:?}",
                part.bands, self.bands
            )));
        }
        let (rows, cols) = part.shape();
        self.check_window(row_offset, col_offset, rows, cols)?;
        self.data
            .slice_mut(s![.., row_offset..row_offset + rows, col_offset..col_offset + cols])
            .assign(&part.data);
        Ok(())
    }

    fn check_window(
        &self,
        row_offset: usize,
        col_offset: usize,
        rows: usize,
        cols: usize,
    ) -> Result<()> {
        let (total_rows, total_cols) = self.shape();
        if row_offset + rows > total_rows || col_offset + cols > total_cols {
            return Err(Error::IndexOutOfBounds {
                row: row_offset + rows,
                col: col_offset + cols,
                rows: total_rows,
                cols: total_cols,
            });
        }
        Ok(())
    }

    /// Get the geotransform
    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    /// Set the geotransform
    pub fn set_transform(&mut self, transform: GeoTransform) {
        self.transform = transform;
    }

    /// Get the CRS
    pub fn crs(&self) -> Option<&CRS> {
        self.crs.as_ref()
    }

    /// Set the CRS
    pub fn set_crs(&mut self, crs: Option<CRS>) {
        self.crs = crs;
    }

    /// Apply `keep` per pixel: pixels where it returns false become NaN in every band
    pub fn retain_pixels<F>(&mut self, keep: F)
    where
        F: Fn(usize, usize) -> bool,
    {
        let (rows, cols) = self.shape();
        for row in 0..rows {
            for col in 0..cols {
                if !keep(row, col) {
                    self.data.slice_mut(s![.., row, col]).fill(f64::NAN);
                }
            }
        }
    }

    /// Build from per-band 2D arrays sharing this raster's georeferencing
    pub fn with_same_meta(&self, bands: Vec<String>, planes: Vec<Array2<f64>>) -> Result<Self> {
        let (rows, cols) = self.shape();
        let mut data = Array3::from_elem((planes.len(), rows, cols), f64::NAN);
        for (i, plane) in planes.into_iter().enumerate() {
            if plane.dim() != (rows, cols) {
                return Err(Error::SizeMismatch {
                    er: rows,
                    ec: cols,
                    ar: plane.nrows(),
                    ac: plane.ncols(),
                });
            }
            data.index_axis_mut(Axis(0), i).assign(&plane);
        }
        let mut out = Self::new(data, bands)?;
        out.transform = self.transform;
        out.crs = self.crs.clone();
        Ok(out)
    }
}
