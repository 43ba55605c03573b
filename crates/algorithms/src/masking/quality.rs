//! Sensor QA decoding

use chronocube_core::raster::{QualityMaskArray, RasterCube};
use chronocube_core::{Error, Result};
use chronocube_parallel::{ParallelStrategy, ProcessingMode};
use ndarray::Array3;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Surface reflectance bands common to all supported platforms
pub const REFLECTANCE_BANDS: [&str; 6] = ["blue", "green", "red", "nir", "swir1", "swir2"];

/// Raw surface-reflectance values above this are saturated
const SR_SATURATION: f64 = 10000.0;

/// Landsat 4/5/7 `pixel_qa`: clear land and clear water, with and without
/// low cloud confidence
const LANDSAT_457_CLEAR: &[u16] = &[66, 68, 130, 132];

/// Landsat 8 `pixel_qa` equivalents, including the terrain-occlusion and
/// low cirrus confidence variants
const LANDSAT_8_CLEAR: &[u16] = &[322, 324, 386, 388, 834, 836, 898, 900, 1346, 1348];

/// Sentinel-2 scene classes: vegetation, not vegetated, water, unclassified
const SENTINEL_2_CLEAR: &[u16] = &[4, 5, 6, 7];

/// Satellite platform, selecting products and the QA decoding rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Landsat4,
    Landsat5,
    Landsat7,
    Landsat8,
    Sentinel2,
}

impl Platform {
    pub const ALL: [Platform; 5] = [
        Platform::Landsat4,
        Platform::Landsat5,
        Platform::Landsat7,
        Platform::Landsat8,
        Platform::Sentinel2,
    ];

    /// Canonical identifier, e.g. `LANDSAT_8`
    pub fn name(&self) -> &'static str {
        match self {
            Platform::Landsat4 => "LANDSAT_4",
            Platform::Landsat5 => "LANDSAT_5",
            Platform::Landsat7 => "LANDSAT_7",
            Platform::Landsat8 => "LANDSAT_8",
            Platform::Sentinel2 => "SENTINEL_2",
        }
    }

    fn landsat_number(&self) -> Option<u8> {
        match self {
            Platform::Landsat4 => Some(4),
            Platform::Landsat5 => Some(5),
            Platform::Landsat7 => Some(7),
            Platform::Landsat8 => Some(8),
            Platform::Sentinel2 => None,
        }
    }

    /// Surface reflectance product name
    pub fn sr_product(&self) -> String {
        match self.landsat_number() {
            Some(n) => format!("ls{}_usgs_sr_scene", n),
            None => "s2_esa_sr_granule".to_string(),
        }
    }

    /// Water classification product, if the platform has one
    pub fn water_product(&self) -> Option<String> {
        self.landsat_number()
            .map(|n| format!("ls{}_water_classification", n))
    }

    /// Name of the band carrying QA codes
    pub fn qa_band(&self) -> &'static str {
        match self {
            Platform::Sentinel2 => "scene_classification",
            _ => "pixel_qa",
        }
    }

    /// Codes marking a usable observation
    pub fn clear_codes(&self) -> &'static [u16] {
        match self {
            Platform::Landsat4 | Platform::Landsat5 | Platform::Landsat7 => LANDSAT_457_CLEAR,
            Platform::Landsat8 => LANDSAT_8_CLEAR,
            Platform::Sentinel2 => SENTINEL_2_CLEAR,
        }
    }

    /// Upper bound of valid raw reflectance
    pub fn saturation_ceiling(&self) -> f64 {
        SR_SATURATION
    }

    /// Measurements to request: the given reflectance bands plus QA
    pub fn measurements(&self, bands: &[&str]) -> Vec<String> {
        bands
            .iter()
            .map(|b| b.to_string())
            .chain(std::iter::once(self.qa_band().to_string()))
            .collect()
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Platform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_uppercase().replace('-', "_");
        Platform::ALL
            .iter()
            .copied()
            .find(|p| p.name() == wanted)
            .ok_or_else(|| {
                let expected: Vec<&str> = Platform::ALL.iter().map(|p| p.name()).collect();
                Error::unknown("platform", s, &expected)
            })
    }
}

/// Decodes per-scene QA into a validity mask.
///
/// An observation is valid when its QA code is in the platform's clear list
/// and none of its reflectance bands is fill or saturated.
#[derive(Debug, Clone, Copy)]
pub struct QualityMask {
    platform: Platform,
    mode: ProcessingMode,
}

impl QualityMask {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            mode: ProcessingMode::default(),
        }
    }

    pub fn with_mode(mut self, mode: ProcessingMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Whether a raw QA value is a clear code
    pub fn is_clear(&self, qa: f64) -> bool {
        if !qa.is_finite() || qa < 0.0 || qa.fract() != 0.0 || qa > u16::MAX as f64 {
            return false;
        }
        self.platform.clear_codes().contains(&(qa as u16))
    }

    /// Decode the cube's QA band into a (time, y, x) mask
    pub fn decode(&self, cube: &RasterCube) -> Result<QualityMaskArray> {
        let qa = cube.band_index(self.platform.qa_band())?;
        let reflectance: Vec<usize> = (0..cube.n_bands()).filter(|&b| b != qa).collect();
        let (times, _, rows, cols) = cube.dim();
        let ceiling = self.platform.saturation_ceiling();
        let data = cube.data();

        let row_masks: Vec<Vec<bool>> = self.mode.par_map(0..rows, |row| {
            let mut out = vec![false; times * cols];
            for t in 0..times {
                for col in 0..cols {
                    let code = data[[t, qa, row, col]];
                    if cube.is_nodata(code) || !self.is_clear(code) {
                        continue;
                    }
                    out[t * cols + col] = reflectance.iter().all(|&b| {
                        let v = data[[t, b, row, col]];
                        !cube.is_nodata(v) && v <= ceiling
                    });
                }
            }
            out
        });

        let mut mask = Array3::from_elem((times, rows, cols), false);
        for (row, values) in row_masks.into_iter().enumerate() {
            for t in 0..times {
                for col in 0..cols {
                    mask[[t, row, col]] = values[t * cols + col];
                }
            }
        }
        let mask = QualityMaskArray::from_array(mask);
        debug!(
            platform = %self.platform,
            valid = mask.valid_count(),
            total = times * rows * cols,
            "decoded quality mask"
        );
        Ok(mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    fn cube(qa: &[f64], red: &[f64]) -> RasterCube {
        let t = qa.len();
        let mut data = Array4::zeros((t, 2, 1, 1));
        for i in 0..t {
            data[[i, 0, 0, 0]] = red[i];
            data[[i, 1, 0, 0]] = qa[i];
        }
        RasterCube::new(data, vec!["red".into(), "pixel_qa".into()])
            .unwrap()
            .with_nodata(Some(-9999.0))
    }

    #[test]
    fn test_platform_products() {
        let p: Platform = "landsat_8".parse().unwrap();
        assert_eq!(p, Platform::Landsat8);
        assert_eq!(p.sr_product(), "ls8_usgs_sr_scene");
        assert_eq!(p.water_product().as_deref(), Some("ls8_water_classification"));
        assert_eq!(Platform::Sentinel2.sr_product(), "s2_esa_sr_granule");
        assert_eq!(Platform::Sentinel2.qa_band(), "scene_classification");
        assert_eq!(
            p.measurements(&["red", "nir"]),
            vec!["red".to_string(), "nir".into(), "pixel_qa".into()]
        );
    }

    #[test]
    fn test_unknown_platform_is_configuration_error() {
        let err = "MODIS".parse::<Platform>().unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_landsat8_codes() {
        let qm = QualityMask::new(Platform::Landsat8).with_mode(ProcessingMode::Sequential);
        // clear, cloud (480), clear water, fill (1)
        let c = cube(&[322.0, 480.0, 324.0, 1.0], &[500.0; 4]);
        let mask = qm.decode(&c).unwrap();
        assert!(mask.is_valid(0, 0, 0));
        assert!(!mask.is_valid(1, 0, 0));
        assert!(mask.is_valid(2, 0, 0));
        assert!(!mask.is_valid(3, 0, 0));
    }

    #[test]
    fn test_landsat7_rejects_landsat8_codes() {
        let qm = QualityMask::new(Platform::Landsat7);
        assert!(qm.is_clear(66.0));
        assert!(!qm.is_clear(322.0));
        assert!(!qm.is_clear(66.5));
        assert!(!qm.is_clear(f64::NAN));
    }

    #[test]
    fn test_saturated_and_fill_reflectance_invalid() {
        let qm = QualityMask::new(Platform::Landsat8);
        let c = cube(&[322.0, 322.0, 322.0], &[20000.0, -9999.0, 10000.0]);
        let mask = qm.decode(&c).unwrap();
        assert!(!mask.is_valid(0, 0, 0));
        assert!(!mask.is_valid(1, 0, 0));
        assert!(mask.is_valid(2, 0, 0));
    }

    #[test]
    fn test_missing_qa_band() {
        let qm = QualityMask::new(Platform::Sentinel2);
        let c = cube(&[4.0], &[100.0]);
        assert!(matches!(qm.decode(&c), Err(Error::MissingBand(_))));
    }
}
