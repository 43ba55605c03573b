//! Analysis products
//!
//! A product chains masking, compositing, index derivation and change
//! detection over one or two periods, then names its outputs. Periods are
//! loaded from a [`CubeSource`]; computation runs on the chunked task graph
//! in [`pipeline`].

pub mod pipeline;
mod water_quality;

pub use pipeline::{ChunkedPipeline, CubeWindow, NamedOutput, Stage};
pub use water_quality::{tsm_summary, TSM_BANDS};

use crate::change::ThresholdClassifier;
use crate::composite::{CompositeParams, Compositor, ReducerKind};
use crate::indices::{IndexCalculator, IndexKind, IndexParams, COVER_BANDS};
use crate::masking::{
    Platform, WaterExclusion, WaterThresholds, REFLECTANCE_BANDS, WATER_BAND,
};
use crate::output::{AxisNames, OutputAssembler};
use chronocube_core::io::{BoundingBox, ChunkHint, CubeQuery, CubeSource, OutputBundle, TimeRange};
use chronocube_core::raster::RasterCube;
use chronocube_core::{Error, Result, CRS};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

/// The analyses the engine can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProductKind {
    /// Index anomaly between two periods, with optional threshold classes
    VegetationChange,
    /// NDVI anomaly restricted to never-wet pixels
    NdviAnomaly,
    /// Band-wise fractional cover anomaly
    LandChange,
    /// Fractional cover of one period
    FractionalCover,
    /// One index over a single-period composite
    AggregateIndices,
    /// Difference of water occurrence between two periods
    WaterChange,
    /// Water occurrence of one period
    WaterPermanency,
    /// Total suspended matter statistics over water
    WaterQuality,
}

impl ProductKind {
    pub const ALL: [ProductKind; 8] = [
        ProductKind::VegetationChange,
        ProductKind::NdviAnomaly,
        ProductKind::LandChange,
        ProductKind::FractionalCover,
        ProductKind::AggregateIndices,
        ProductKind::WaterChange,
        ProductKind::WaterPermanency,
        ProductKind::WaterQuality,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ProductKind::VegetationChange => "vegetation_change",
            ProductKind::NdviAnomaly => "ndvi_anomaly",
            ProductKind::LandChange => "land_change",
            ProductKind::FractionalCover => "fractional_cover",
            ProductKind::AggregateIndices => "aggregate_indices",
            ProductKind::WaterChange => "water_change",
            ProductKind::WaterPermanency => "water_permanency",
            ProductKind::WaterQuality => "water_quality",
        }
    }

    /// Whether the product compares a baseline and an analysis period
    pub fn is_change(&self) -> bool {
        matches!(
            self,
            ProductKind::VegetationChange
                | ProductKind::NdviAnomaly
                | ProductKind::LandChange
                | ProductKind::WaterChange
        )
    }

    /// Whether surface reflectance is loaded
    pub fn needs_reflectance(&self) -> bool {
        !matches!(self, ProductKind::WaterChange | ProductKind::WaterPermanency)
    }

    /// Whether water classification is loaded
    pub fn uses_water(&self) -> bool {
        !matches!(self, ProductKind::AggregateIndices)
    }

    /// Whether the product cannot run without water classification
    pub fn requires_water(&self) -> bool {
        matches!(
            self,
            ProductKind::WaterChange | ProductKind::WaterPermanency | ProductKind::WaterQuality
        )
    }

    pub fn default_reducer(&self) -> ReducerKind {
        match self {
            ProductKind::LandChange | ProductKind::FractionalCover => ReducerKind::Geomedian,
            _ => ReducerKind::Median,
        }
    }

    pub fn default_index(&self) -> IndexKind {
        match self {
            ProductKind::LandChange | ProductKind::FractionalCover => IndexKind::FractionalCover,
            _ => IndexKind::Ndvi,
        }
    }

    /// Coordinate naming of the written rasters
    pub fn axes(&self) -> AxisNames {
        match self {
            ProductKind::VegetationChange | ProductKind::LandChange | ProductKind::FractionalCover => {
                AxisNames::Geographic
            }
            _ => AxisNames::Projected,
        }
    }
}

impl fmt::Display for ProductKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProductKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        ProductKind::ALL
            .iter()
            .copied()
            .find(|p| p.name() == wanted)
            .ok_or_else(|| {
                let expected: Vec<&str> = ProductKind::ALL.iter().map(|p| p.name()).collect();
                Error::unknown("product", s, &expected)
            })
    }
}

/// A validated product definition; holds no data
#[derive(Debug, Clone)]
pub struct ProductSpec {
    pub kind: ProductKind,
    pub reducer: ReducerKind,
    pub index: IndexKind,
    pub composite: CompositeParams,
    pub index_params: IndexParams,
    pub thresholds: Option<ThresholdClassifier>,
    pub water: WaterThresholds,
}

impl ProductSpec {
    /// Product with its default reducer, index and parameters
    pub fn new(kind: ProductKind) -> Self {
        Self {
            kind,
            reducer: kind.default_reducer(),
            index: kind.default_index(),
            composite: CompositeParams::default(),
            index_params: IndexParams::default(),
            thresholds: None,
            water: WaterThresholds::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.water.validate()?;
        if self.kind.needs_reflectance() {
            Compositor::new(self.reducer, self.composite)?;
            IndexCalculator::new(self.index, self.index_params)?;
        }
        let index_ok = match self.kind {
            ProductKind::NdviAnomaly => self.index == IndexKind::Ndvi,
            ProductKind::LandChange | ProductKind::FractionalCover => {
                self.index == IndexKind::FractionalCover
            }
            ProductKind::AggregateIndices => self.index.is_scalar(),
            _ => true,
        };
        if !index_ok {
            return Err(Error::InvalidParameter {
                name: "index",
                value: self.index.to_string(),
                reason: format!("not available for {}", self.kind),
            });
        }
        if self.thresholds.is_some() && self.kind != ProductKind::VegetationChange {
            return Err(Error::InvalidParameter {
                name: "thresholds",
                value: self.kind.to_string(),
                reason: "threshold classes only apply to vegetation_change".into(),
            });
        }
        Ok(())
    }

    /// Rule gating anomaly pixels by water occurrence
    pub fn exclusion(&self) -> WaterExclusion {
        match self.kind {
            ProductKind::NdviAnomaly => WaterExclusion::NeverWet,
            _ => WaterExclusion::MaxOccurrence(self.water.vegetation_exclusion),
        }
    }

    /// Reflectance bands loaded for compositing
    pub fn bands(&self) -> Vec<&'static str> {
        if self.kind.needs_reflectance() {
            REFLECTANCE_BANDS.to_vec()
        } else {
            Vec::new()
        }
    }

    /// Check that a platform can serve this product
    pub fn check_platform(&self, platform: Platform) -> Result<()> {
        if self.kind.requires_water() && platform.water_product().is_none() {
            return Err(Error::InvalidParameter {
                name: "platform",
                value: platform.to_string(),
                reason: format!("{} needs a water classification product", self.kind),
            });
        }
        Ok(())
    }
}

/// One acquisition window on one platform
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodRequest {
    /// `baseline`, `analysis` or `period`
    pub label: String,
    pub time: TimeRange,
    pub platform: Platform,
}

/// Spatial part of every query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryArea {
    pub bbox: Option<BoundingBox>,
    pub bbox_crs: Option<CRS>,
    pub output_crs: Option<CRS>,
    pub resolution: Option<f64>,
    pub chunks: ChunkHint,
}

impl QueryArea {
    fn query(&self, product: String, measurements: Vec<String>, time: &TimeRange) -> CubeQuery {
        let mut q = CubeQuery::new(product, measurements, time.clone());
        q.bbox = self.bbox;
        q.bbox_crs = self.bbox_crs.clone();
        q.output_crs = self.output_crs.clone();
        q.resolution = self.resolution;
        q.chunks = self.chunks;
        q
    }
}

/// Loaded cubes of one period, shared with every chunk that reads them
#[derive(Debug, Clone)]
pub struct PeriodInput {
    pub label: String,
    pub platform: Platform,
    /// Reflectance plus QA
    pub cube: Option<Arc<RasterCube>>,
    /// Water classification
    pub water: Option<Arc<RasterCube>>,
}

/// Load everything a product needs for one period.
///
/// An empty reflectance cube, or an empty water cube for a water product,
/// fails with [`Error::EmptyResult`] before any computation.
pub fn load_period(
    source: &dyn CubeSource,
    spec: &ProductSpec,
    period: &PeriodRequest,
    area: &QueryArea,
) -> Result<PeriodInput> {
    let platform = period.platform;
    spec.check_platform(platform)?;

    let cube = if spec.kind.needs_reflectance() {
        let product = platform.sr_product();
        let query = area.query(product.clone(), platform.measurements(&spec.bands()), &period.time);
        let cube = source.load(&query)?;
        cube.ensure_not_empty(&format!("{} {}", period.label, product))?;
        info!(period = %period.label, %product, times = cube.n_times(), "loaded reflectance");
        Some(Arc::new(cube))
    } else {
        None
    };

    let water = match platform.water_product().filter(|_| spec.kind.uses_water()) {
        Some(product) => {
            let query = area.query(product.clone(), vec![WATER_BAND.to_string()], &period.time);
            let water = source.load(&query)?;
            match water.ensure_not_empty(&format!("{} {}", period.label, product)) {
                Ok(()) => Some(Arc::new(water)),
                Err(e) if spec.kind.requires_water() => return Err(e),
                Err(_) => {
                    warn!(period = %period.label, %product, "no water classification, skipping water exclusion");
                    None
                }
            }
        }
        None => None,
    };

    Ok(PeriodInput {
        label: period.label.clone(),
        platform,
        cube,
        water,
    })
}

/// Turn stitched outputs into writer bundles
pub fn assemble(
    spec: &ProductSpec,
    outputs: &[NamedOutput],
    output_crs: Option<CRS>,
) -> Result<Vec<OutputBundle>> {
    let assembler = OutputAssembler::new(output_crs).with_axes(spec.kind.axes());
    let mut bundles = Vec::new();
    for out in outputs {
        match &out.value {
            Stage::Bands(raster) if out.name == "tsm" => {
                for band in TSM_BANDS {
                    bundles.push(assembler.single(band, band, raster.band_raster(band)?));
                }
            }
            Stage::Bands(raster) => {
                bundles.push(assembler.multi(&out.name, raster)?);
                if spec.kind == ProductKind::LandChange {
                    for band in &COVER_BANDS[..3] {
                        let name = format!("{}_change", band);
                        bundles.push(assembler.single(&name, band, raster.band_raster(band)?));
                    }
                }
            }
            Stage::Layer(raster) => bundles.push(assembler.single(&out.name, &out.name, raster.clone())),
            Stage::Classes(classes) => bundles.push(assembler.classes(&out.name, "class", classes)),
            other => {
                return Err(Error::Algorithm(format!(
                    "output '{}' is a {}, not a raster",
                    out.name,
                    other.kind_name()
                )))
            }
        }
    }
    Ok(bundles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chronocube_core::io::MemorySource;

    #[test]
    fn test_parse_product() {
        assert_eq!("Land-Change".parse::<ProductKind>().unwrap(), ProductKind::LandChange);
        assert!("mangroves".parse::<ProductKind>().unwrap_err().is_configuration());
    }

    #[test]
    fn test_defaults() {
        let land = ProductSpec::new(ProductKind::LandChange);
        assert_eq!(land.reducer, ReducerKind::Geomedian);
        assert_eq!(land.index, IndexKind::FractionalCover);
        assert!(land.validate().is_ok());
        assert_eq!(
            ProductSpec::new(ProductKind::NdviAnomaly).exclusion(),
            WaterExclusion::NeverWet
        );
    }

    #[test]
    fn test_index_restrictions() {
        let mut spec = ProductSpec::new(ProductKind::NdviAnomaly);
        spec.index = IndexKind::Evi;
        assert!(spec.validate().is_err());

        let mut spec = ProductSpec::new(ProductKind::AggregateIndices);
        spec.index = IndexKind::FractionalCover;
        assert!(spec.validate().is_err());

        let mut spec = ProductSpec::new(ProductKind::WaterChange);
        spec.thresholds = Some(ThresholdClassifier::new(-0.1, 0.1).unwrap());
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_sentinel_cannot_serve_water_products() {
        let spec = ProductSpec::new(ProductKind::WaterPermanency);
        assert!(spec.check_platform(Platform::Sentinel2).is_err());
        assert!(spec.check_platform(Platform::Landsat7).is_ok());
    }

    #[test]
    fn test_empty_reflectance_fails_fast() {
        let spec = ProductSpec::new(ProductKind::AggregateIndices);
        let period = PeriodRequest {
            label: "period".into(),
            time: TimeRange::new("2020-01-01", "2020-12-31"),
            platform: Platform::Landsat8,
        };
        let err = load_period(&MemorySource::new(), &spec, &period, &QueryArea::default()).unwrap_err();
        assert!(matches!(err, Error::EmptyResult(_)));
    }
}
