//! # chronocube core
//!
//! Core types and collaborator interfaces for the chronocube engine.
//!
//! This crate provides:
//! - `RasterCube`: (time, band, y, x) observation stack
//! - `QualityMaskArray`: per-observation validity
//! - `MultiBandRaster` / `Raster<T>`: composites and derived products
//! - `GeoTransform` and `CRS` for georeferencing
//! - `CubeSource` / `RasterWriter` collaborator traits with local implementations

pub mod crs;
pub mod error;
pub mod io;
pub mod raster;

pub use crs::CRS;
pub use error::{Error, Result};
pub use raster::{
    GeoTransform, MultiBandRaster, QualityMaskArray, Raster, RasterCube, RasterElement,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::crs::CRS;
    pub use crate::error::{Error, Result};
    pub use crate::io::{CubeQuery, CubeSource, OutputBundle, RasterWriter, TimeRange};
    pub use crate::raster::{
        GeoTransform, MultiBandRaster, QualityMaskArray, Raster, RasterCube, RasterElement,
    };
}
