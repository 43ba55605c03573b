//! Task configuration
//!
//! A task file names one product and its periods. Everything is parsed and
//! validated into a [`TaskPlan`] before any data is loaded.
//!
//! ```toml
//! product = "vegetation_change"
//! reducer = "median"
//! index = "ndvi"
//!
//! [baseline]
//! start = "2019-01-01"
//! end = "2019-12-31"
//! platform = "LANDSAT_8"
//!
//! [analysis]
//! start = "2020-01-01"
//! end = "2020-12-31"
//! platform = "LANDSAT_8"
//!
//! [thresholds]
//! min = -0.2
//! max = 0.2
//! ```

use crate::change::ThresholdClassifier;
use crate::composite::GeomedianParams;
use crate::indices::IndexParams;
use crate::masking::WaterThresholds;
use crate::products::{ChunkedPipeline, PeriodRequest, ProductKind, ProductSpec, QueryArea};
use chronocube_core::io::{BoundingBox, ChunkHint, TimeRange};
use chronocube_core::{Error, Result, CRS};
use chronocube_parallel::ProcessingMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One acquisition window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodConfig {
    pub start: String,
    pub end: String,
    pub platform: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AreaConfig {
    /// `[min_x, min_y, max_x, max_y]`
    pub bbox: Option<[f64; 4]>,
    /// CRS of `bbox`
    pub crs: Option<String>,
    pub resolution: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub chunk_rows: usize,
    pub chunk_cols: usize,
    /// Concurrent chunks; 0 uses every core
    pub workers: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            chunk_rows: 1000,
            chunk_cols: 1000,
            workers: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub directory: PathBuf,
    /// Output projection, e.g. `EPSG:3460`
    pub crs: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("output"),
            crs: None,
        }
    }
}

/// Raw task file contents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskConfig {
    pub product: String,
    #[serde(default)]
    pub reducer: Option<String>,
    #[serde(default)]
    pub index: Option<String>,
    /// Scene manifest, relative to the task file
    #[serde(default)]
    pub manifest: Option<PathBuf>,
    /// Baseline period, or the only period of single-period products
    #[serde(alias = "period")]
    pub baseline: PeriodConfig,
    #[serde(default)]
    pub analysis: Option<PeriodConfig>,
    #[serde(default)]
    pub thresholds: Option<ThresholdConfig>,
    #[serde(default)]
    pub water: WaterThresholds,
    #[serde(default)]
    pub geomedian: GeomedianParams,
    #[serde(default)]
    pub index_params: IndexParams,
    #[serde(default)]
    pub area: AreaConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// A validated task, ready to run
#[derive(Debug, Clone)]
pub struct TaskPlan {
    pub spec: ProductSpec,
    pub baseline: PeriodRequest,
    pub analysis: Option<PeriodRequest>,
    pub area: QueryArea,
    pub pipeline: ChunkedPipeline,
    pub manifest: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub output_crs: Option<CRS>,
}

impl TaskConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Read a task file; a relative manifest path is resolved against it
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = Self::from_toml(&std::fs::read_to_string(path)?)?;
        if let (Some(manifest), Some(dir)) = (&config.manifest, path.parent()) {
            if manifest.is_relative() {
                config.manifest = Some(dir.join(manifest));
            }
        }
        Ok(config)
    }

    /// Parse every tag and check every parameter
    pub fn plan(&self) -> Result<TaskPlan> {
        let kind: ProductKind = self.product.parse()?;
        let mut spec = ProductSpec::new(kind);
        if let Some(reducer) = &self.reducer {
            spec.reducer = reducer.parse()?;
        }
        if let Some(index) = &self.index {
            spec.index = index.parse()?;
        }
        spec.composite.geomedian = self.geomedian;
        spec.composite.index = self.index_params;
        spec.index_params = self.index_params;
        spec.water = self.water;
        spec.thresholds = self
            .thresholds
            .map(|t| ThresholdClassifier::new(t.min, t.max))
            .transpose()?;
        spec.validate()?;

        let baseline = period(if kind.is_change() { "baseline" } else { "period" }, &self.baseline)?;
        let analysis = match (&self.analysis, kind.is_change()) {
            (Some(a), true) => Some(period("analysis", a)?),
            (None, false) => None,
            (Some(_), false) => {
                return Err(Error::InvalidParameter {
                    name: "analysis",
                    value: kind.to_string(),
                    reason: "single-period products take no analysis period".into(),
                })
            }
            (None, true) => {
                return Err(Error::InvalidParameter {
                    name: "analysis",
                    value: kind.to_string(),
                    reason: "change products need an analysis period".into(),
                })
            }
        };
        for p in std::iter::once(&baseline).chain(analysis.as_ref()) {
            spec.check_platform(p.platform)?;
        }

        let exec = self.execution;
        if exec.chunk_rows == 0 || exec.chunk_cols == 0 {
            return Err(Error::InvalidParameter {
                name: "execution",
                value: format!("{}x{}", exec.chunk_rows, exec.chunk_cols),
                reason: "chunk sizes must be positive".into(),
            });
        }

        let bbox = self.area.bbox.map(bounding_box).transpose()?;
        let area = QueryArea {
            bbox,
            bbox_crs: self.area.crs.as_deref().map(str::parse).transpose()?,
            output_crs: self.output.crs.as_deref().map(str::parse).transpose()?,
            resolution: self.area.resolution,
            chunks: ChunkHint {
                time: 1,
                x: exec.chunk_cols,
                y: exec.chunk_rows,
            },
        };

        Ok(TaskPlan {
            spec,
            baseline,
            analysis,
            pipeline: ChunkedPipeline::new(exec.chunk_rows, exec.chunk_cols)
                .with_mode(ProcessingMode::from_workers(exec.workers)),
            manifest: self.manifest.clone(),
            output_dir: self.output.directory.clone(),
            output_crs: area.output_crs.clone(),
            area,
        })
    }
}

fn period(label: &str, config: &PeriodConfig) -> Result<PeriodRequest> {
    if config.start > config.end {
        return Err(Error::InvalidParameter {
            name: "period",
            value: format!("{}..{}", config.start, config.end),
            reason: format!("{} starts after it ends", label),
        });
    }
    Ok(PeriodRequest {
        label: label.to_string(),
        time: TimeRange::new(config.start.clone(), config.end.clone()),
        platform: config.platform.parse()?,
    })
}

fn bounding_box([min_x, min_y, max_x, max_y]: [f64; 4]) -> Result<BoundingBox> {
    if !(min_x < max_x && min_y < max_y) {
        return Err(Error::InvalidParameter {
            name: "bbox",
            value: format!("[{}, {}, {}, {}]", min_x, min_y, max_x, max_y),
            reason: "expected [min_x, min_y, max_x, max_y]".into(),
        });
    }
    Ok(BoundingBox {
        min_x,
        min_y,
        max_x,
        max_y,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composite::ReducerKind;
    use crate::indices::IndexKind;
    use crate::masking::Platform;

    const VEG: &str = r#"
        product = "vegetation_change"
        reducer = "max"
        index = "evi"

        [baseline]
        start = "2019-01-01"
        end = "2019-12-31"
        platform = "LANDSAT_7"

        [analysis]
        start = "2020-01-01"
        end = "2020-12-31"
        platform = "LANDSAT_8"

        [thresholds]
        min = -0.2
        max = 0.2

        [area]
        bbox = [0.0, 0.0, 10.0, 10.0]
        crs = "EPSG:4326"

        [execution]
        chunk_rows = 256
        chunk_cols = 512
        workers = 1

        [output]
        crs = "EPSG:3460"
    "#;

    #[test]
    fn test_plan_vegetation_change() {
        let plan = TaskConfig::from_toml(VEG).unwrap().plan().unwrap();
        assert_eq!(plan.spec.kind, ProductKind::VegetationChange);
        assert_eq!(plan.spec.reducer, ReducerKind::MaxIndex);
        assert_eq!(plan.spec.index, IndexKind::Evi);
        assert_eq!(plan.spec.thresholds.map(|t| t.max_c()), Some(0.2));
        assert_eq!(plan.baseline.platform, Platform::Landsat7);
        assert_eq!(plan.analysis.as_ref().map(|a| a.platform), Some(Platform::Landsat8));
        assert_eq!(plan.area.chunks.x, 512);
        assert_eq!(plan.output_crs.and_then(|c| c.epsg()), Some(3460));
        assert_eq!(plan.spec.water.vegetation_exclusion, 0.4);
    }

    #[test]
    fn test_single_period_alias_and_defaults() {
        let text = r#"
            product = "fractional_cover"
            [period]
            start = "2020-01-01"
            end = "2020-06-30"
            platform = "landsat_8"
        "#;
        let plan = TaskConfig::from_toml(text).unwrap().plan().unwrap();
        assert_eq!(plan.spec.reducer, ReducerKind::Geomedian);
        assert!(plan.analysis.is_none());
        assert_eq!(plan.baseline.label, "period");
        assert_eq!(plan.output_dir, PathBuf::from("output"));
    }

    #[test]
    fn test_unknown_reducer_fails_before_loading() {
        let text = VEG.replace("reducer = \"max\"", "reducer = \"mode\"");
        let err = TaskConfig::from_toml(&text).unwrap().plan().unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_unknown_platform() {
        let text = VEG.replace("LANDSAT_7", "SPOT_6");
        assert!(TaskConfig::from_toml(&text).unwrap().plan().unwrap_err().is_configuration());
    }

    #[test]
    fn test_inverted_thresholds() {
        let text = VEG.replace("min = -0.2", "min = 0.5");
        assert!(TaskConfig::from_toml(&text).unwrap().plan().is_err());
    }

    #[test]
    fn test_missing_analysis() {
        let text = r#"
            product = "water_change"
            [baseline]
            start = "2019-01-01"
            end = "2019-12-31"
            platform = "LANDSAT_8"
        "#;
        assert!(TaskConfig::from_toml(text).unwrap().plan().is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let typo = VEG.replacen("reducer", "reduce", 1);
        assert!(TaskConfig::from_toml(&typo).is_err());
    }
}
