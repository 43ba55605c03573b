//! Chunked execution of products on the task graph
//!
//! The grid is cut into chunks and every product step is recorded as a
//! per-chunk node. Nothing runs until the single `materialize` call; chunks
//! are independent, so the scheduler runs them concurrently while each
//! step inside a chunk stays sequential. Chunk results are then pasted
//! back into full-grid rasters.

use super::{tsm_summary, PeriodInput, ProductKind, ProductSpec};
use crate::change::{water_change, ChangeDetector};
use crate::composite::Compositor;
use crate::indices::{IndexCalculator, IndexKind};
use crate::masking::{QualityMask, WaterMask};
use chronocube_core::raster::{GeoTransform, MultiBandRaster, QualityMaskArray, Raster, RasterCube};
use chronocube_core::{Error, Result, CRS};
use chronocube_parallel::{Chunk, ChunkIterator, NodeId, ProcessingMode, TaskGraph};
use std::sync::Arc;
use tracing::{debug, info};

/// One chunk of a loaded cube. The pixels are copied out only while an
/// operation reads them.
#[derive(Debug, Clone)]
pub struct CubeWindow {
    cube: Arc<RasterCube>,
    chunk: Chunk,
}

impl CubeWindow {
    fn read(&self) -> Result<RasterCube> {
        let c = &self.chunk;
        self.cube.window(c.row_offset, c.col_offset, c.rows, c.cols)
    }
}

/// Value flowing between graph nodes
#[derive(Debug, Clone)]
pub enum Stage {
    Cube(CubeWindow),
    Mask(QualityMaskArray),
    Bands(MultiBandRaster),
    Layer(Raster<f64>),
    Classes(Raster<u16>),
}

impl Stage {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Stage::Cube(_) => "cube",
            Stage::Mask(_) => "mask",
            Stage::Bands(_) => "multi-band raster",
            Stage::Layer(_) => "raster",
            Stage::Classes(_) => "class raster",
        }
    }

    fn unexpected(&self, wanted: &str) -> Error {
        Error::Algorithm(format!("expected {}, got {}", wanted, self.kind_name()))
    }

    fn cube(&self) -> Result<RasterCube> {
        match self {
            Stage::Cube(w) => w.read(),
            other => Err(other.unexpected("cube")),
        }
    }

    fn mask(&self) -> Result<&QualityMaskArray> {
        match self {
            Stage::Mask(m) => Ok(m),
            other => Err(other.unexpected("mask")),
        }
    }

    pub fn bands(&self) -> Result<&MultiBandRaster> {
        match self {
            Stage::Bands(b) => Ok(b),
            other => Err(other.unexpected("multi-band raster")),
        }
    }

    pub fn layer(&self) -> Result<&Raster<f64>> {
        match self {
            Stage::Layer(r) => Ok(r),
            other => Err(other.unexpected("raster")),
        }
    }

    /// Full-grid nodata raster of the same kind as a chunk result
    fn blank_like(part: &Stage, grid: &Grid) -> Result<Stage> {
        match part {
            Stage::Bands(b) => {
                let mut full =
                    MultiBandRaster::empty(b.band_names().to_vec(), grid.rows, grid.cols);
                full.set_transform(grid.transform);
                full.set_crs(grid.crs.clone());
                Ok(Stage::Bands(full))
            }
            Stage::Layer(_) => {
                let mut full = Raster::filled(grid.rows, grid.cols, f64::NAN);
                full.set_transform(grid.transform);
                full.set_crs(grid.crs.clone());
                full.set_nodata(Some(f64::NAN));
                Ok(Stage::Layer(full))
            }
            Stage::Classes(_) => {
                let mut full = Raster::filled(grid.rows, grid.cols, 0u16);
                full.set_transform(grid.transform);
                full.set_crs(grid.crs.clone());
                full.set_nodata(Some(0));
                Ok(Stage::Classes(full))
            }
            other => Err(other.unexpected("raster output")),
        }
    }

    fn paste(&mut self, chunk: &Chunk, part: &Stage) -> Result<()> {
        let (r, c) = (chunk.row_offset, chunk.col_offset);
        match (self, part) {
            (Stage::Bands(full), Stage::Bands(p)) => full.paste(r, c, p),
            (Stage::Layer(full), Stage::Layer(p)) => full.paste(r, c, p),
            (Stage::Classes(full), Stage::Classes(p)) => full.paste(r, c, p),
            (full, part) => Err(Error::Algorithm(format!(
                "cannot paste a {} chunk into a {}",
                part.kind_name(),
                full.kind_name()
            ))),
        }
    }
}

/// A stitched product output
#[derive(Debug, Clone)]
pub struct NamedOutput {
    pub name: String,
    pub value: Stage,
}

#[derive(Debug, Clone)]
struct Grid {
    rows: usize,
    cols: usize,
    transform: GeoTransform,
    crs: Option<CRS>,
}

impl Grid {
    fn of(periods: &[&PeriodInput]) -> Result<Self> {
        let cubes: Vec<&RasterCube> = periods
            .iter()
            .flat_map(|p| p.cube.iter().chain(p.water.iter()))
            .map(Arc::as_ref)
            .collect();
        let first = cubes
            .first()
            .ok_or_else(|| Error::EmptyResult("no input cubes".into()))?;
        let (rows, cols) = first.shape();
        for cube in &cubes[1..] {
            if cube.shape() != (rows, cols) {
                return Err(Error::SizeMismatch {
                    er: rows,
                    ec: cols,
                    ar: cube.shape().0,
                    ac: cube.shape().1,
                });
            }
        }
        Ok(Self {
            rows,
            cols,
            transform: *first.transform(),
            crs: first.crs().cloned(),
        })
    }
}

/// Runs products chunk by chunk on a [`TaskGraph`]
#[derive(Debug, Clone, Copy)]
pub struct ChunkedPipeline {
    chunk_rows: usize,
    chunk_cols: usize,
    mode: ProcessingMode,
}

impl Default for ChunkedPipeline {
    fn default() -> Self {
        Self::new(1000, 1000)
    }
}

impl ChunkedPipeline {
    pub fn new(chunk_rows: usize, chunk_cols: usize) -> Self {
        Self {
            chunk_rows,
            chunk_cols,
            mode: ProcessingMode::default(),
        }
    }

    pub fn chunk_rows(&self) -> usize {
        self.chunk_rows
    }

    pub fn chunk_cols(&self) -> usize {
        self.chunk_cols
    }

    pub fn mode(&self) -> ProcessingMode {
        self.mode
    }

    /// Concurrency across chunks
    pub fn with_mode(mut self, mode: ProcessingMode) -> Self {
        self.mode = mode;
        self
    }

    /// Build and materialize the graph for one product
    pub fn run(
        &self,
        spec: &ProductSpec,
        baseline: &PeriodInput,
        analysis: Option<&PeriodInput>,
    ) -> Result<Vec<NamedOutput>> {
        spec.validate()?;
        if spec.kind.is_change() != analysis.is_some() {
            return Err(Error::InvalidParameter {
                name: "analysis",
                value: spec.kind.to_string(),
                reason: if spec.kind.is_change() {
                    "change products need an analysis period".into()
                } else {
                    "single-period products take no analysis period".into()
                },
            });
        }

        let periods: Vec<&PeriodInput> = std::iter::once(baseline).chain(analysis).collect();
        let grid = Grid::of(&periods)?;

        let mut graph: TaskGraph<Stage> = TaskGraph::new();
        let mut requests: Vec<(Chunk, &'static str, NodeId)> = Vec::new();
        let chunks: Vec<Chunk> =
            ChunkIterator::new(grid.rows, grid.cols, self.chunk_rows, self.chunk_cols)?.collect();
        for chunk in &chunks {
            let builder = ChunkBuilder {
                graph: &mut graph,
                chunk: *chunk,
                spec,
            };
            for (name, id) in builder.build(baseline, analysis)? {
                requests.push((*chunk, name, id));
            }
        }
        info!(
            product = %spec.kind,
            chunks = chunks.len(),
            nodes = graph.len(),
            threads = self.mode.threads(),
            "assembled task graph"
        );

        let ids: Vec<NodeId> = requests.iter().map(|(_, _, id)| *id).collect();
        let values = graph.materialize(&ids, self.mode)?;

        let mut outputs: Vec<(&'static str, Stage)> = Vec::new();
        for ((chunk, name, _), value) in requests.into_iter().zip(values) {
            let pos = match outputs.iter().position(|(n, _)| *n == name) {
                Some(pos) => pos,
                None => {
                    outputs.push((name, Stage::blank_like(&value, &grid)?));
                    outputs.len() - 1
                }
            };
            outputs[pos].1.paste(&chunk, &value)?;
        }

        Ok(outputs
            .into_iter()
            .map(|(name, value)| NamedOutput {
                name: name.to_string(),
                value,
            })
            .collect())
    }
}

/// Records the nodes of one chunk
struct ChunkBuilder<'a> {
    graph: &'a mut TaskGraph<Stage>,
    chunk: Chunk,
    spec: &'a ProductSpec,
}

impl ChunkBuilder<'_> {
    fn label(&self, period: &str, step: &str) -> String {
        format!("{}/{}[{}]", period, step, self.chunk.index)
    }

    fn source(&mut self, period: &str, step: &str, cube: &Arc<RasterCube>) -> NodeId {
        let window = CubeWindow {
            cube: Arc::clone(cube),
            chunk: self.chunk,
        };
        let label = self.label(period, step);
        self.graph.add_source(label, Stage::Cube(window))
    }

    /// Reflectance window and its quality mask
    fn reflectance(&mut self, period: &PeriodInput) -> Result<(NodeId, NodeId)> {
        let cube = period
            .cube
            .as_ref()
            .ok_or_else(|| Error::EmptyResult(format!("{}: no reflectance cube", period.label)))?;
        let src = self.source(&period.label, "cube", cube);
        let qm = QualityMask::new(period.platform).with_mode(ProcessingMode::Sequential);
        let mask = self.graph.add_op(self.label(&period.label, "mask"), &[src], move |v| {
            Ok(Stage::Mask(qm.decode(&v[0].cube()?)?))
        })?;
        Ok((src, mask))
    }

    fn composite(&mut self, period: &PeriodInput) -> Result<NodeId> {
        let (src, mask) = self.reflectance(period)?;
        let compositor = Compositor::new(self.spec.reducer, self.spec.composite)?
            .with_mode(ProcessingMode::Sequential);
        let bands = self.spec.bands();
        self.graph.add_op(self.label(&period.label, "composite"), &[src, mask], move |v| {
            let cube = v[0].cube()?.select_bands(&bands)?;
            Ok(Stage::Bands(compositor.composite(&cube, v[1].mask()?)?))
        })
    }

    fn index(&mut self, period: &PeriodInput, composite: NodeId) -> Result<NodeId> {
        let calc = IndexCalculator::new(self.spec.index, self.spec.index_params)?
            .with_mode(ProcessingMode::Sequential);
        // Vegetation change over fractional cover tracks green vegetation
        let green_only = self.spec.kind == ProductKind::VegetationChange
            && self.spec.index == IndexKind::FractionalCover;
        self.graph.add_op(self.label(&period.label, "index"), &[composite], move |v| {
            let derived = calc.compute(v[0].bands()?)?;
            if green_only {
                let pv = derived.band("pv")?.to_owned();
                return Ok(Stage::Bands(derived.with_same_meta(vec!["pv".into()], vec![pv])?));
            }
            Ok(Stage::Bands(derived))
        })
    }

    fn occurrence(&mut self, period: &PeriodInput) -> Result<Option<NodeId>> {
        let Some(water) = &period.water else {
            return Ok(None);
        };
        let src = self.source(&period.label, "water", water);
        let wm = WaterMask::new().with_mode(ProcessingMode::Sequential);
        let id = self.graph.add_op(self.label(&period.label, "occurrence"), &[src], move |v| {
            Ok(Stage::Layer(wm.occurrence(&v[0].cube()?)?))
        })?;
        Ok(Some(id))
    }

    /// One band of a multi-band node as a single-band layer
    fn layer_of(&mut self, node: NodeId, band: &'static str) -> Result<NodeId> {
        self.graph.add_op(self.label("change", band), &[node], move |v| {
            Ok(Stage::Layer(v[0].bands()?.band_raster(band)?))
        })
    }

    fn required_occurrence(&mut self, period: &PeriodInput) -> Result<NodeId> {
        self.occurrence(period)?.ok_or_else(|| {
            Error::EmptyResult(format!("{}: no water classification cube", period.label))
        })
    }

    fn anomaly(
        &mut self,
        baseline: NodeId,
        analysis: NodeId,
        baseline_water: Option<NodeId>,
        analysis_water: Option<NodeId>,
    ) -> Result<NodeId> {
        let detector =
            ChangeDetector::new(self.spec.exclusion()).with_mode(ProcessingMode::Sequential);
        let mut deps = vec![baseline, analysis];
        let mut slot = |id: Option<NodeId>| {
            id.map(|id| {
                deps.push(id);
                deps.len() - 1
            })
        };
        let wb = slot(baseline_water);
        let wa = slot(analysis_water);
        self.graph.add_op(self.label("change", "anomaly"), &deps, move |v| {
            let water = |slot: Option<usize>| slot.map(|i| v[i].layer()).transpose();
            Ok(Stage::Bands(detector.anomaly(
                v[0].bands()?,
                v[1].bands()?,
                water(wb)?,
                water(wa)?,
            )?))
        })
    }

    fn build(
        mut self,
        baseline: &PeriodInput,
        analysis: Option<&PeriodInput>,
    ) -> Result<Vec<(&'static str, NodeId)>> {
        debug!(
            chunk = self.chunk.index,
            rows = self.chunk.rows,
            cols = self.chunk.cols,
            "adding chunk"
        );
        let kind = self.spec.kind;
        match kind {
            ProductKind::VegetationChange | ProductKind::NdviAnomaly | ProductKind::LandChange => {
                let analysis = analysis.ok_or_else(|| {
                    Error::EmptyResult(format!("{} needs an analysis period", kind))
                })?;
                let bc = self.composite(baseline)?;
                let bi = self.index(baseline, bc)?;
                let bw = self.occurrence(baseline)?;
                let ac = self.composite(analysis)?;
                let ai = self.index(analysis, ac)?;
                let aw = self.occurrence(analysis)?;
                let anomaly = self.anomaly(bi, ai, bw, aw)?;

                let name = match kind {
                    ProductKind::VegetationChange => "veg_change",
                    ProductKind::NdviAnomaly => "ndvi_anomaly",
                    _ => "land_change",
                };
                let mut outputs = vec![(name, anomaly)];
                if let Some(classifier) = self.spec.thresholds {
                    let label = self.label("change", "classes");
                    let id = self.graph.add_op(label, &[anomaly], move |v| {
                        let anomaly = v[0].bands()?;
                        let band = anomaly
                            .band_names()
                            .first()
                            .ok_or_else(|| Error::Algorithm("anomaly has no bands".into()))?;
                        Ok(Stage::Classes(classifier.classify(&anomaly.band_raster(band)?)))
                    })?;
                    outputs.push(("param_thres", id));
                }
                Ok(outputs)
            }
            ProductKind::FractionalCover => {
                let composite = self.composite(baseline)?;
                let cover = self.index(baseline, composite)?;
                let Some(water) = self.occurrence(baseline)? else {
                    return Ok(vec![("fractional_cover", cover)]);
                };
                let exclusion = self.spec.exclusion();
                let id = self.graph.add_op(
                    self.label(&baseline.label, "exclusion"),
                    &[cover, water],
                    move |v| Ok(Stage::Bands(exclusion.apply(v[0].bands()?, v[1].layer()?)?)),
                )?;
                Ok(vec![("fractional_cover", id)])
            }
            ProductKind::AggregateIndices => {
                let composite = self.composite(baseline)?;
                Ok(vec![("indices_composite", self.index(baseline, composite)?)])
            }
            ProductKind::WaterChange => {
                let analysis = analysis.ok_or_else(|| {
                    Error::EmptyResult(format!("{} needs an analysis period", kind))
                })?;
                let bw = self.required_occurrence(baseline)?;
                let aw = self.required_occurrence(analysis)?;
                let thresholds = self.spec.water;
                let label = self.label("change", "water_change");
                let change = self.graph.add_op(label, &[bw, aw], move |v| {
                    let change = water_change(v[0].layer()?, v[1].layer()?, &thresholds)?;
                    Ok(Stage::Bands(change.into_bands()?))
                })?;
                Ok(vec![
                    ("difference", self.layer_of(change, "difference")?),
                    ("difference_range", self.layer_of(change, "difference_range")?),
                ])
            }
            ProductKind::WaterPermanency => {
                Ok(vec![("water", self.required_occurrence(baseline)?)])
            }
            ProductKind::WaterQuality => {
                let (src, clear) = self.reflectance(baseline)?;
                let water = baseline.water.as_ref().ok_or_else(|| {
                    Error::EmptyResult(format!("{}: no water classification cube", baseline.label))
                })?;
                let water_src = self.source(&baseline.label, "water", water);
                let wm = WaterMask::new().with_mode(ProcessingMode::Sequential);
                let id = self.graph.add_op(
                    self.label(&baseline.label, "tsm"),
                    &[src, clear, water_src],
                    move |v| {
                        let cube = v[0].cube()?;
                        let wet = wm.per_step(&v[2].cube()?, cube.times())?;
                        Ok(Stage::Bands(tsm_summary(&cube, v[1].mask()?, &wet)?))
                    },
                )?;
                Ok(vec![("tsm", id)])
            }
        }
    }
}
