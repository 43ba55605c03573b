//! Spectral indices
//!
//! Per-pixel formulas over composite bands. Zero or nodata denominators give
//! NaN (nodata) at that pixel; they are never an error.

mod fractional_cover;

pub use fractional_cover::{
    CoverFractions, Endmembers, FractionalCoverModel, COVER_BANDS, UNMIXING_BANDS,
};

use chronocube_core::raster::MultiBandRaster;
use chronocube_core::{Error, Result};
use chronocube_parallel::{ParallelStrategy, ProcessingMode};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Enumeration of supported derived indices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    /// Normalized Difference Vegetation Index
    Ndvi,
    /// Enhanced Vegetation Index
    Evi,
    /// Normalized Difference Water Index (McFeeters)
    Ndwi,
    /// Bare soil / green veg / dry veg / unmixing error percentages
    FractionalCover,
}

impl IndexKind {
    pub const ALL: [IndexKind; 4] = [
        IndexKind::Ndvi,
        IndexKind::Evi,
        IndexKind::Ndwi,
        IndexKind::FractionalCover,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            IndexKind::Ndvi => "ndvi",
            IndexKind::Evi => "evi",
            IndexKind::Ndwi => "ndwi",
            IndexKind::FractionalCover => "fractional_cover",
        }
    }

    /// Composite bands the formula reads, in argument order
    pub fn required_bands(&self) -> &'static [&'static str] {
        match self {
            IndexKind::Ndvi => &["nir", "red"],
            IndexKind::Evi => &["nir", "red", "blue"],
            IndexKind::Ndwi => &["green", "nir"],
            IndexKind::FractionalCover => &UNMIXING_BANDS,
        }
    }

    /// Names of the derived bands
    pub fn output_bands(&self) -> Vec<String> {
        match self {
            IndexKind::FractionalCover => COVER_BANDS.iter().map(|b| b.to_string()).collect(),
            scalar => vec![scalar.name().to_string()],
        }
    }

    /// Whether the index yields a single value per pixel
    pub fn is_scalar(&self) -> bool {
        !matches!(self, IndexKind::FractionalCover)
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for IndexKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ndvi" => Ok(IndexKind::Ndvi),
            "evi" => Ok(IndexKind::Evi),
            "ndwi" => Ok(IndexKind::Ndwi),
            "fractional_cover" | "fractional-cover" | "fc" => Ok(IndexKind::FractionalCover),
            _ => {
                let expected: Vec<&str> = IndexKind::ALL.iter().map(|k| k.name()).collect();
                Err(Error::unknown("index", s, &expected))
            }
        }
    }
}

/// Input scaling for the formulas
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexParams {
    /// Multiplier taking raw surface reflectance to [0, 1]; used by EVI and
    /// fractional cover, whose results depend on absolute reflectance
    pub reflectance_scale: f64,
    pub fractional_cover: FractionalCoverModel,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self {
            reflectance_scale: 1e-4,
            fractional_cover: FractionalCoverModel::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Per-pixel formulas
// ---------------------------------------------------------------------------

/// `(a - b) / (a + b)`, NaN for nodata inputs or a zero sum
pub fn normalized_difference_value(a: f64, b: f64) -> f64 {
    let sum = a + b;
    if !sum.is_finite() || sum.abs() < 1e-10 {
        return f64::NAN;
    }
    (a - b) / sum
}

/// `NDVI = (NIR - Red) / (NIR + Red)`
pub fn ndvi_value(nir: f64, red: f64) -> f64 {
    normalized_difference_value(nir, red)
}

/// `NDWI = (Green - NIR) / (Green + NIR)`
pub fn ndwi_value(green: f64, nir: f64) -> f64 {
    normalized_difference_value(green, nir)
}

/// `EVI = 2.5 * (NIR - Red) / (NIR + 6 * Red - 7.5 * Blue + 1)`
///
/// Inputs are reflectance in [0, 1].
pub fn evi_value(nir: f64, red: f64, blue: f64) -> f64 {
    let denom = nir + 6.0 * red - 7.5 * blue + 1.0;
    if !denom.is_finite() || denom.abs() < 1e-10 {
        return f64::NAN;
    }
    2.5 * (nir - red) / denom
}

/// Total suspended matter (mg/L) from raw green and red surface reflectance
///
/// `TSM = 3983 * ((green + red) * 1e-4 / 2) ^ 1.6246`
pub fn tsm_value(green: f64, red: f64) -> f64 {
    let base = (green + red) * 1e-4 / 2.0;
    if !base.is_finite() || base < 0.0 {
        return f64::NAN;
    }
    3983.0 * base.powf(1.6246)
}

// ---------------------------------------------------------------------------
// Calculator
// ---------------------------------------------------------------------------

/// Maps a composite to a derived index raster
#[derive(Debug, Clone)]
pub struct IndexCalculator {
    kind: IndexKind,
    params: IndexParams,
    mode: ProcessingMode,
}

impl IndexCalculator {
    pub fn new(kind: IndexKind, params: IndexParams) -> Result<Self> {
        if !(params.reflectance_scale.is_finite() && params.reflectance_scale > 0.0) {
            return Err(Error::InvalidParameter {
                name: "reflectance_scale",
                value: params.reflectance_scale.to_string(),
                reason: "must be a positive number".into(),
            });
        }
        Ok(Self {
            kind,
            params,
            mode: ProcessingMode::default(),
        })
    }

    pub fn with_mode(mut self, mode: ProcessingMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    /// Resolve the formula's inputs against a band list
    pub fn bind(&self, bands: &[String]) -> Result<BoundIndex> {
        let positions = self
            .kind
            .required_bands()
            .iter()
            .map(|name| {
                bands
                    .iter()
                    .position(|b| b == name)
                    .ok_or_else(|| Error::MissingBand(name.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(BoundIndex {
            kind: self.kind,
            params: self.params,
            positions,
        })
    }

    /// Compute the index over every pixel of a composite
    pub fn compute(&self, composite: &MultiBandRaster) -> Result<MultiBandRaster> {
        let bound = self.bind(composite.band_names())?;
        let (rows, cols) = composite.shape();
        let outputs = self.kind.output_bands();
        let n_out = outputs.len();
        let data = composite.data();

        let row_values: Vec<Vec<f64>> = self.mode.par_map(0..rows, |row| {
            let mut out = vec![f64::NAN; n_out * cols];
            let mut px = vec![f64::NAN; n_out];
            for col in 0..cols {
                bound.evaluate(|b| data[[b, row, col]], &mut px);
                for (k, v) in px.iter().enumerate() {
                    out[k * cols + col] = *v;
                }
            }
            out
        });

        let mut planes = vec![Array2::from_elem((rows, cols), f64::NAN); n_out];
        for (row, values) in row_values.into_iter().enumerate() {
            for (k, plane) in planes.iter_mut().enumerate() {
                for col in 0..cols {
                    plane[[row, col]] = values[k * cols + col];
                }
            }
        }
        composite.with_same_meta(outputs, planes)
    }
}

/// An index resolved against a concrete band order
#[derive(Debug, Clone)]
pub struct BoundIndex {
    kind: IndexKind,
    params: IndexParams,
    positions: Vec<usize>,
}

impl BoundIndex {
    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    /// Evaluate at one pixel. `band(i)` yields input band `i`; `out` receives
    /// one value per output band.
    pub fn evaluate<G: Fn(usize) -> f64>(&self, band: G, out: &mut [f64]) {
        let p = &self.positions;
        let scale = self.params.reflectance_scale;
        match self.kind {
            IndexKind::Ndvi => out[0] = ndvi_value(band(p[0]), band(p[1])),
            IndexKind::Ndwi => out[0] = ndwi_value(band(p[0]), band(p[1])),
            IndexKind::Evi => {
                out[0] = evi_value(band(p[0]) * scale, band(p[1]) * scale, band(p[2]) * scale)
            }
            IndexKind::FractionalCover => {
                let mut spectrum = [0.0; 6];
                for (s, &i) in spectrum.iter_mut().zip(p) {
                    *s = band(i) * scale;
                }
                match self.params.fractional_cover.unmix(&spectrum) {
                    Some(f) => out[..4].copy_from_slice(&f.to_percent()),
                    None => out[..4].fill(f64::NAN),
                }
            }
        }
    }

    /// First output band at one pixel
    pub fn scalar<G: Fn(usize) -> f64>(&self, band: G) -> f64 {
        let mut out = [f64::NAN; 4];
        self.evaluate(band, &mut out);
        out[0]
    }
}
