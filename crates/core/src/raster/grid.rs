//! Single-band raster type

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::raster::{GeoTransform, RasterElement};
use ndarray::{s, Array2};

/// A georeferenced 2D raster grid (y, x).
///
/// Used for every single-band product of the engine: water occurrence,
/// derived indices, anomalies and class rasters.
///
/// ```ignore
/// use chronocube_core::Raster;
///
/// let mut raster: Raster<f64> = Raster::filled(4, 4, f64::NAN);
/// raster.set(1, 2, 0.42)?;
/// assert_eq!(raster.valid_count(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct Raster<T: RasterElement> {
    /// Cell values in row-major order (row, col)
    data: Array2<T>,
    transform: GeoTransform,
    crs: Option<CRS>,
    nodata: Option<T>,
}

impl<T: RasterElement> Raster<T> {
    /// Create a new raster filled with zeros
    pub fn new(rows: usize, cols: usize) -> Self {
        Self::from_array(Array2::zeros((rows, cols)))
    }

    /// Create a new raster filled with a specific value
    pub fn filled(rows: usize, cols: usize, value: T) -> Self {
        Self::from_array(Array2::from_elem((rows, cols), value))
    }

    /// Create a raster from row-major data
    pub fn from_vec(data: Vec<T>, rows: usize, cols: usize) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(Error::InvalidDimensions {
                width: cols,
                height: rows,
            });
        }
        let array = Array2::from_shape_vec((rows, cols), data)
            .map_err(|e| Error::Other(e.to_string()))?;
        Ok(Self::from_array(array))
    }

    /// Create a raster from an ndarray
    pub fn from_array(data: Array2<T>) -> Self {
        Self {
            data,
            transform: GeoTransform::default(),
            crs: None,
            nodata: None,
        }
    }

    /// Create a raster with the same georeferencing but a different cell type
    pub fn with_same_meta<U: RasterElement>(
        &self,
        data: Array2<U>,
        nodata: Option<U>,
    ) -> Raster<U> {
        Raster {
            data,
            transform: self.transform,
            crs: self.crs.clone(),
            nodata,
        }
    }

    // Dimensions

    /// Number of rows
    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    /// Number of columns
    pub fn cols(&self) -> usize {
        self.data.ncols()
    }

    /// Dimensions as (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// Total number of cells
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the raster has no cells
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    // Data access

    /// Get value at (row, col)
    pub fn get(&self, row: usize, col: usize) -> Result<T> {
        self.data
            .get((row, col))
            .copied()
            .ok_or(Error::IndexOutOfBounds {
                row,
                col,
                rows: self.rows(),
                cols: self.cols(),
            })
    }

    /// Set value at (row, col)
    pub fn set(&mut self, row: usize, col: usize, value: T) -> Result<()> {
        let (rows, cols) = self.shape();
        match self.data.get_mut((row, col)) {
            Some(cell) => {
                *cell = value;
                Ok(())
            }
            None => Err(Error::IndexOutOfBounds { row, col, rows, cols }),
        }
    }

    /// Get a reference to the underlying array
    pub fn data(&self) -> &Array2<T> {
        &self.data
    }

    /// Get a mutable reference to the underlying array
    pub fn data_mut(&mut self) -> &mut Array2<T> {
        &mut self.data
    }

    // Windows

    /// Write `part` into this raster with its upper-left cell at (`row_offset`, `col_offset`)
    pub fn paste(&mut self, row_offset: usize, col_offset: usize, part: &Raster<T>) -> Result<()> {
        let (rows, cols) = part.shape();
        self.check_window(row_offset, col_offset, rows, cols)?;
        self.data
            .slice_mut(s![row_offset..row_offset + rows, col_offset..col_offset + cols])
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
        if row_offset + rows > self.rows() || col_offset + cols > self.cols() {
            return Err(Error::IndexOutOfBounds {
                row: row_offset + rows,
                col: col_offset + cols,
                rows: self.rows(),
                cols: self.cols(),
            });
        }
        Ok(())
    }

    // Metadata

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

    /// Get the no-data value
    pub fn nodata(&self) -> Option<T> {
        self.nodata
    }

    /// Set the no-data value
    pub fn set_nodata(&mut self, nodata: Option<T>) {
        self.nodata = nodata;
    }

    /// Check if a value is no-data
    pub fn is_nodata(&self, value: T) -> bool {
        value.is_nodata(self.nodata)
    }

    /// Count of cells that are not nodata
    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|v| !self.is_nodata(**v)).count()
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raster_creation() {
        let raster: Raster<f64> = Raster::new(100, 200);
        assert_eq!(raster.shape(), (100, 200));
    }

    #[test]
    fn test_paste() {
        let mut part = Raster::filled(3, 3, 0.0);
        part.set(1, 2, 7.0).unwrap();

        let mut dst = Raster::filled(6, 6, f64::NAN);
        dst.paste(2, 2, &part).unwrap();
        assert_eq!(dst.get(3, 4).unwrap(), 7.0);
        assert_eq!(dst.get(2, 2).unwrap(), 0.0);
        assert!(dst.get(0, 0).unwrap().is_nan());
    }

    #[test]
    fn test_paste_out_of_bounds() {
        let mut raster: Raster<f64> = Raster::new(4, 4);
        assert!(raster.paste(2, 2, &Raster::new(3, 1)).is_err());
    }

    #[test]
    fn test_valid_count_skips_nodata() {
        let mut raster = Raster::from_vec(vec![1.0, f64::NAN, 3.0, -9999.0], 2, 2).unwrap();
        assert_eq!(raster.valid_count(), 3);
        raster.set_nodata(Some(-9999.0));
        assert_eq!(raster.valid_count(), 2);
    }
}
