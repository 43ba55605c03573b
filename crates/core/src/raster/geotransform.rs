//! Affine georeferencing for rasters and cubes

use serde::{Deserialize, Serialize};

/// Affine transformation between pixel (col, row) and map (x, y) coordinates.
///
/// ```text
/// x = origin_x + col * pixel_width + row * row_rotation
/// y = origin_y + col * col_rotation + row * pixel_height
/// ```
///
/// Cubes delivered by the data store are north-up, so the rotation terms are
/// normally zero and `pixel_height` is negative.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    /// X coordinate of the upper-left corner
    pub origin_x: f64,
    /// Y coordinate of the upper-left corner
    pub origin_y: f64,
    /// Pixel width (cell size in X direction)
    pub pixel_width: f64,
    /// Pixel height (cell size in Y direction, usually negative)
    pub pixel_height: f64,
    #[serde(default)]
    pub row_rotation: f64,
    #[serde(default)]
    pub col_rotation: f64,
}

impl GeoTransform {
    /// Create a north-up transform
    pub fn new(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            origin_x,
            origin_y,
            pixel_width,
            pixel_height,
            row_rotation: 0.0,
            col_rotation: 0.0,
        }
    }

    fn corner(&self, col: f64, row: f64) -> (f64, f64) {
        let x = self.origin_x + col * self.pixel_width + row * self.row_rotation;
        let y = self.origin_y + col * self.col_rotation + row * self.pixel_height;
        (x, y)
    }

    /// Fractional (col, row) of a map coordinate; NaN for a degenerate transform
    pub fn geo_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        let det = self.pixel_width * self.pixel_height - self.row_rotation * self.col_rotation;
        if det.abs() < 1e-12 {
            return (f64::NAN, f64::NAN);
        }
        let dx = x - self.origin_x;
        let dy = y - self.origin_y;
        let col = (self.pixel_height * dx - self.row_rotation * dy) / det;
        let row = (-self.col_rotation * dx + self.pixel_width * dy) / det;
        (col, row)
    }

    /// Transform of the sub-grid whose upper-left pixel is (`row_offset`, `col_offset`)
    pub fn window(&self, row_offset: usize, col_offset: usize) -> Self {
        let (origin_x, origin_y) = self.corner(col_offset as f64, row_offset as f64);
        Self {
            origin_x,
            origin_y,
            ..*self
        }
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self::new(0.0, 0.0, 1.0, -1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_window_origin() {
        let gt = GeoTransform::new(100.0, 200.0, 30.0, -30.0);
        let w = gt.window(2, 3);
        assert_relative_eq!(w.origin_x, 190.0);
        assert_relative_eq!(w.origin_y, 140.0);
        assert_relative_eq!(w.pixel_width, 30.0);
    }

    #[test]
    fn test_geo_to_pixel() {
        let gt = GeoTransform::new(100.0, 200.0, 10.0, -10.0);
        let (col, row) = gt.geo_to_pixel(155.0, 95.0);
        assert_relative_eq!(col, 5.5, epsilon = 1e-10);
        assert_relative_eq!(row, 10.5, epsilon = 1e-10);
        let flat = GeoTransform::new(0.0, 0.0, 0.0, -1.0);
        assert!(flat.geo_to_pixel(1.0, 1.0).0.is_nan());
    }
}
