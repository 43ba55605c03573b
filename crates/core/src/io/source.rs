//! Data-store collaborator interface
//!
//! The engine never talks to a catalog directly. A [`CubeSource`] turns a
//! [`CubeQuery`] into a [`RasterCube`]; validation of the result happens on
//! the engine side before any compositing starts.

use crate::crs::CRS;
use crate::error::Result;
use crate::raster::RasterCube;
use ndarray::Array4;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Inclusive acquisition window; ISO-8601 labels compare lexicographically
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: String,
    pub end: String,
}

impl TimeRange {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// Whether an acquisition label falls inside the window
    pub fn contains(&self, label: &str) -> bool {
        let day = label.get(..self.start.len().min(label.len())).unwrap_or(label);
        day >= self.start.as_str() && day <= self.end.as_str()
    }
}

/// Area of interest in map coordinates `(min_x, min_y, max_x, max_y)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

/// Chunk sizes the store should use when it materializes lazily
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkHint {
    pub time: usize,
    pub x: usize,
    pub y: usize,
}

impl Default for ChunkHint {
    fn default() -> Self {
        Self {
            time: 1,
            x: 1000,
            y: 1000,
        }
    }
}

/// Everything the data store needs to deliver one cube
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CubeQuery {
    pub product: String,
    pub measurements: Vec<String>,
    pub time: TimeRange,
    pub bbox: Option<BoundingBox>,
    pub bbox_crs: Option<CRS>,
    pub output_crs: Option<CRS>,
    pub resolution: Option<f64>,
    #[serde(default)]
    pub chunks: ChunkHint,
}

impl CubeQuery {
    pub fn new(product: impl Into<String>, measurements: Vec<String>, time: TimeRange) -> Self {
        Self {
            product: product.into(),
            measurements,
            time,
            bbox: None,
            bbox_crs: None,
            output_crs: None,
            resolution: None,
            chunks: ChunkHint::default(),
        }
    }
}

/// Supplies raster cubes for queries.
///
/// Implementations may return an empty cube when nothing matches; callers
/// check with [`RasterCube::ensure_not_empty`].
pub trait CubeSource: Send + Sync {
    fn load(&self, query: &CubeQuery) -> Result<RasterCube>;
}

/// In-memory store keyed by product name
#[derive(Debug, Default, Clone)]
pub struct MemorySource {
    products: HashMap<String, RasterCube>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a cube under a product name
    pub fn insert(&mut self, product: impl Into<String>, cube: RasterCube) {
        self.products.insert(product.into(), cube);
    }

    /// Builder form of [`MemorySource::insert`]
    pub fn with_product(mut self, product: impl Into<String>, cube: RasterCube) -> Self {
        self.insert(product, cube);
        self
    }
}

impl CubeSource for MemorySource {
    fn load(&self, query: &CubeQuery) -> Result<RasterCube> {
        let Some(cube) = self.products.get(&query.product) else {
            tracing::debug!(product = %query.product, "product not in memory store");
            return empty_cube(&query.measurements);
        };

        let steps: Vec<usize> = cube
            .times()
            .iter()
            .enumerate()
            .filter(|(_, t)| query.time.contains(t))
            .map(|(i, _)| i)
            .collect();
        let in_window = cube.select_times(&steps)?;

        let wanted: Vec<&str> = query
            .measurements
            .iter()
            .map(String::as_str)
            .filter(|m| in_window.band_index(m).is_ok())
            .collect();
        in_window.select_bands(&wanted)
    }
}

fn empty_cube(measurements: &[String]) -> Result<RasterCube> {
    RasterCube::new(Array4::zeros((0, measurements.len(), 0, 0)), measurements.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored() -> MemorySource {
        let data = Array4::from_shape_fn((3, 2, 1, 1), |(t, b, _, _)| (t * 10 + b) as f64);
        let cube = RasterCube::new(data, vec!["red".into(), "nir".into()])
            .unwrap()
            .with_times(vec!["2019-01-05".into(), "2019-06-10".into(), "2020-02-01".into()])
            .unwrap();
        MemorySource::new().with_product("ls8_usgs_sr_scene", cube)
    }

    #[test]
    fn test_time_window_filter() {
        let source = stored();
        let query = CubeQuery::new(
            "ls8_usgs_sr_scene",
            vec!["nir".into()],
            TimeRange::new("2019-01-01", "2019-12-31"),
        );
        let cube = source.load(&query).unwrap();
        assert_eq!(cube.dim(), (2, 1, 1, 1));
        assert_eq!(cube.value(1, 0, 0, 0), Some(11.0));
    }

    #[test]
    fn test_unknown_product_is_empty() {
        let query = CubeQuery::new("ls5_usgs_sr_scene", vec!["red".into()], TimeRange::new("2000", "2001"));
        let cube = stored().load(&query).unwrap();
        assert!(cube.ensure_not_empty("baseline").is_err());
    }

    #[test]
    fn test_time_range_contains_timestamps() {
        let range = TimeRange::new("2019-01-01", "2019-12-31");
        assert!(range.contains("2019-12-31T10:15:00"));
        assert!(!range.contains("2020-01-01"));
    }
}
