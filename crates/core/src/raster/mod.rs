//! Raster data structures

mod cube;
mod element;
mod geotransform;
mod grid;
mod mask;
mod multiband;

pub use cube::RasterCube;
pub use element::RasterElement;
pub use geotransform::GeoTransform;
pub use grid::Raster;
pub use mask::QualityMaskArray;
pub use multiband::MultiBandRaster;
