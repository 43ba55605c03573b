//! Raster-writer collaborator interface

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::io::native::write_geotiff;
use crate::raster::Raster;
use std::path::PathBuf;
use tracing::info;

/// One named band of an output
#[derive(Debug, Clone)]
pub struct OutputBand {
    pub name: String,
    pub raster: Raster<f64>,
}

/// A raster product ready to persist: named bands on one grid plus the
/// metadata the writer needs to georeference it.
#[derive(Debug, Clone)]
pub struct OutputBundle {
    /// Destination identifier, e.g. `veg_change`
    pub destination: String,
    pub bands: Vec<OutputBand>,
    pub crs: Option<CRS>,
    /// Name of the horizontal coordinate axis (`x` or `longitude`)
    pub x_coord: String,
    /// Name of the vertical coordinate axis (`y` or `latitude`)
    pub y_coord: String,
}

impl OutputBundle {
    /// Band names in order
    pub fn band_names(&self) -> Vec<&str> {
        self.bands.iter().map(|b| b.name.as_str()).collect()
    }
}

/// Persists output bundles. Format, tiling and compression are entirely the
/// implementation's business.
pub trait RasterWriter: Send + Sync {
    /// Write a bundle, returning the identifiers of everything written
    fn write(&self, bundle: &OutputBundle) -> Result<Vec<String>>;
}

/// Writes Float32 GeoTIFFs into a directory.
///
/// Single-band bundles become `<destination>.tiff`; multi-band bundles
/// become one `<destination>_<band>.tiff` per band.
#[derive(Debug, Clone)]
pub struct GeoTiffWriter {
    dir: PathBuf,
}

impl GeoTiffWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl RasterWriter for GeoTiffWriter {
    fn write(&self, bundle: &OutputBundle) -> Result<Vec<String>> {
        if bundle.bands.is_empty() {
            return Err(Error::InvalidParameter {
                name: "bands",
                value: bundle.destination.clone(),
                reason: "output bundle has no bands".into(),
            });
        }
        std::fs::create_dir_all(&self.dir)?;

        let single = bundle.bands.len() == 1;
        let mut written = Vec::with_capacity(bundle.bands.len());
        for band in &bundle.bands {
            let file_name = if single {
                format!("{}.tiff", bundle.destination)
            } else {
                format!("{}_{}.tiff", bundle.destination, band.name)
            };
            let path = self.dir.join(file_name);

            let mut raster = band.raster.clone();
            if bundle.crs.is_some() {
                raster.set_crs(bundle.crs.clone());
            }
            write_geotiff(&raster, &path)?;
            info!(path = %path.display(), band = %band.name, "wrote raster");
            written.push(path.display().to_string());
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle(bands: &[&str]) -> OutputBundle {
        OutputBundle {
            destination: "land_change".into(),
            bands: bands
                .iter()
                .map(|b| OutputBand {
                    name: b.to_string(),
                    raster: Raster::filled(2, 2, 1.0),
                })
                .collect(),
            crs: Some(CRS::from_epsg(3460)),
            x_coord: "longitude".into(),
            y_coord: "latitude".into(),
        }
    }

    #[test]
    fn test_multi_band_naming() {
        let dir = tempfile::tempdir().unwrap();
        let writer = GeoTiffWriter::new(dir.path());
        let written = writer.write(&bundle(&["bs", "pv"])).unwrap();
        assert_eq!(written.len(), 2);
        assert!(written[0].ends_with("land_change_bs.tiff"));
        assert!(dir.path().join("land_change_pv.tiff").exists());
    }

    #[test]
    fn test_single_band_naming() {
        let dir = tempfile::tempdir().unwrap();
        let written = GeoTiffWriter::new(dir.path()).write(&bundle(&["anomaly"])).unwrap();
        assert!(written[0].ends_with("land_change.tiff"));
    }

    #[test]
    fn test_empty_bundle_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(GeoTiffWriter::new(dir.path()).write(&bundle(&[])).is_err());
    }
}
