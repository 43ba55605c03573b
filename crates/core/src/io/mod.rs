//! Collaborator interfaces and the bundled local implementations
//!
//! - [`CubeSource`]: data store delivering raster cubes ([`MemorySource`], [`ManifestSource`])
//! - [`RasterWriter`]: persistence of output bundles ([`GeoTiffWriter`])

mod manifest;
mod native;
mod source;
mod writer;

pub use manifest::{ManifestSource, SceneInfo};
pub use native::{read_geotiff, write_geotiff};
pub use source::{BoundingBox, ChunkHint, CubeQuery, CubeSource, MemorySource, TimeRange};
pub use writer::{GeoTiffWriter, OutputBand, OutputBundle, RasterWriter};
