//! End-to-end task execution: load, compute, assemble, write

use crate::config::TaskPlan;
use crate::products::{assemble, load_period, ProductKind};
use chronocube_core::io::{CubeSource, RasterWriter};
use chronocube_core::Result;
use std::time::Instant;
use tracing::{debug, info};

/// What a finished task produced
#[derive(Debug, Clone, PartialEq)]
pub struct TaskReport {
    pub product: ProductKind,
    /// Identifiers returned by the writer, in write order
    pub written: Vec<String>,
}

/// Run a validated plan.
///
/// Periods are loaded up front, so an empty query fails before any
/// compositing starts. Nothing is written unless every output computed.
pub fn run_task(
    plan: &TaskPlan,
    source: &dyn CubeSource,
    writer: &dyn RasterWriter,
) -> Result<TaskReport> {
    let start = Instant::now();
    let spec = &plan.spec;
    info!(product = %spec.kind, reducer = %spec.reducer, index = %spec.index, "starting task");

    let baseline = load_period(source, spec, &plan.baseline, &plan.area)?;
    let analysis = plan
        .analysis
        .as_ref()
        .map(|period| load_period(source, spec, period, &plan.area))
        .transpose()?;

    let outputs = plan.pipeline.run(spec, &baseline, analysis.as_ref())?;
    let bundles = assemble(spec, &outputs, plan.output_crs.clone())?;

    let mut written = Vec::new();
    for bundle in &bundles {
        for band in &bundle.bands {
            debug!(
                destination = %bundle.destination,
                band = %band.name,
                valid = band.raster.valid_count(),
                cells = band.raster.len(),
                "output coverage"
            );
        }
        written.extend(writer.write(bundle)?);
    }
    info!(
        product = %spec.kind,
        files = written.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "task finished"
    );
    Ok(TaskReport {
        product: spec.kind,
        written,
    })
}
