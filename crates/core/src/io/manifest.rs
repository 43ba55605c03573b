//! Local GeoTIFF stack described by a TOML manifest
//!
//! ```toml
//! crs = "EPSG:3460"
//! nodata = -9999.0
//!
//! [[scenes]]
//! product = "ls8_usgs_sr_scene"
//! time = "2019-03-02"
//! bands = { red = "2019-03-02/red.tif", nir = "2019-03-02/nir.tif", pixel_qa = "2019-03-02/qa.tif" }
//! ```
//!
//! Relative band paths resolve against the manifest's directory.

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::io::native::read_geotiff;
use crate::io::source::{BoundingBox, CubeQuery, CubeSource};
use crate::raster::{GeoTransform, Raster, RasterCube};
use ndarray::{s, Array4};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Deserialize)]
struct Manifest {
    crs: Option<String>,
    nodata: Option<f64>,
    #[serde(default)]
    scenes: Vec<SceneEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct SceneEntry {
    product: String,
    time: String,
    bands: BTreeMap<String, PathBuf>,
}

/// Summary of one manifest entry, for listing
#[derive(Debug, Clone, PartialEq)]
pub struct SceneInfo {
    pub product: String,
    pub time: String,
    pub bands: Vec<String>,
}

/// [`CubeSource`] backed by GeoTIFF files on disk
#[derive(Debug, Clone)]
pub struct ManifestSource {
    root: PathBuf,
    crs: Option<CRS>,
    nodata: Option<f64>,
    scenes: Vec<SceneEntry>,
}

impl ManifestSource {
    /// Parse a manifest file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let root = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::from_toml(&text, root)
    }

    /// Parse manifest text; relative paths resolve against `root`
    pub fn from_toml(text: &str, root: impl Into<PathBuf>) -> Result<Self> {
        let manifest: Manifest = toml::from_str(text)?;
        let crs = manifest.crs.as_deref().map(str::parse).transpose()?;
        Ok(Self {
            root: root.into(),
            crs,
            nodata: manifest.nodata,
            scenes: manifest.scenes,
        })
    }

    /// Entries in manifest order
    pub fn scenes(&self) -> Vec<SceneInfo> {
        self.scenes
            .iter()
            .map(|s| SceneInfo {
                product: s.product.clone(),
                time: s.time.clone(),
                bands: s.bands.keys().cloned().collect(),
            })
            .collect()
    }

    /// CRS declared by the manifest
    pub fn crs(&self) -> Option<&CRS> {
        self.crs.as_ref()
    }

    fn read_band(&self, scene: &SceneEntry, band: &str) -> Result<Raster<f64>> {
        let rel = scene.bands.get(band).ok_or_else(|| {
            Error::MissingBand(format!("{} ({} {})", band, scene.product, scene.time))
        })?;
        let path = if rel.is_absolute() {
            rel.clone()
        } else {
            self.root.join(rel)
        };
        debug!(path = %path.display(), "reading band");
        read_geotiff(&path)
    }

    fn crop_window(
        &self,
        transform: &GeoTransform,
        rows: usize,
        cols: usize,
        query: &CubeQuery,
    ) -> Result<(usize, usize, usize, usize)> {
        let Some(bbox) = query.bbox else {
            return Ok((0, 0, rows, cols));
        };
        if let (Some(want), Some(have)) = (&query.bbox_crs, &self.crs) {
            if !want.is_equivalent(have) {
                return Err(Error::CrsMismatch(want.identifier(), have.identifier()));
            }
        }
        Ok(pixel_window(transform, rows, cols, &bbox))
    }
}

/// Pixel window `(row_offset, col_offset, rows, cols)` covering a bbox, clamped to the grid
fn pixel_window(
    gt: &GeoTransform,
    rows: usize,
    cols: usize,
    bbox: &BoundingBox,
) -> (usize, usize, usize, usize) {
    let (c0, r0) = gt.geo_to_pixel(bbox.min_x, bbox.max_y);
    let (c1, r1) = gt.geo_to_pixel(bbox.max_x, bbox.min_y);
    let clamp = |v: f64, hi: usize| -> usize {
        if v.is_nan() {
            0
        } else {
            v.max(0.0).min(hi as f64) as usize
        }
    };
    let col_start = clamp(c0.min(c1).floor(), cols);
    let col_end = clamp(c0.max(c1).ceil(), cols);
    let row_start = clamp(r0.min(r1).floor(), rows);
    let row_end = clamp(r0.max(r1).ceil(), rows);
    (row_start, col_start, row_end - row_start, col_end - col_start)
}

impl CubeSource for ManifestSource {
    fn load(&self, query: &CubeQuery) -> Result<RasterCube> {
        let mut scenes: Vec<&SceneEntry> = self
            .scenes
            .iter()
            .filter(|s| s.product == query.product && query.time.contains(&s.time))
            .collect();
        scenes.sort_by(|a, b| a.time.cmp(&b.time));

        let bands = query.measurements.clone();
        let (Some(first), Some(first_band)) = (scenes.first(), bands.first()) else {
            return RasterCube::new(Array4::zeros((0, bands.len(), 0, 0)), bands);
        };

        let template = self.read_band(first, first_band)?;
        let (full_rows, full_cols) = template.shape();
        let transform = *template.transform();
        let (row_off, col_off, rows, cols) =
            self.crop_window(&transform, full_rows, full_cols, query)?;

        let mut data = Array4::from_elem((scenes.len(), bands.len(), rows, cols), f64::NAN);
        for (t, scene) in scenes.iter().enumerate() {
            for (b, band) in bands.iter().enumerate() {
                let raster = self.read_band(scene, band)?;
                if raster.shape() != (full_rows, full_cols) {
                    return Err(Error::SizeMismatch {
                        er: full_rows,
                        ec: full_cols,
                        ar: raster.rows(),
                        ac: raster.cols(),
                    });
                }
                let window = raster
                    .data()
                    .slice(s![row_off..row_off + rows, col_off..col_off + cols]);
                data.slice_mut(s![t, b, .., ..]).assign(&window);
            }
        }

        let times = scenes.iter().map(|s| s.time.clone()).collect();
        Ok(RasterCube::new(data, bands)?
            .with_times(times)?
            .with_nodata(self.nodata)
            .with_georef(transform.window(row_off, col_off), self.crs.clone()))
    }
}
