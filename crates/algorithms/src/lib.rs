//! # Chronocube Algorithms
//!
//! Temporal compositing and change detection over Earth-observation cubes.
//!
//! ## Modules
//!
//! - **masking**: Per-platform QA decoding, water occurrence and exclusion
//! - **composite**: Median, mean, max/min-index and geometric-median reducers
//! - **indices**: NDVI, EVI, NDWI and fractional-cover unmixing
//! - **change**: Anomalies, threshold classification, water difference
//! - **products**: Product recipes and the chunked task-graph pipeline
//! - **config** / **task**: TOML task files and end-to-end execution

pub mod change;
pub mod composite;
pub mod config;
pub mod indices;
pub mod masking;
pub mod output;
pub mod products;
pub mod task;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::change::{
        difference, water_change, ChangeClass, ChangeDetector, ThresholdClassifier, WaterChange,
        WATER_CHANGE_BANDS,
    };
    pub use crate::composite::{
        CompositeParams, CompositeStats, Compositor, GeomedianParams, ReducerKind,
    };
    pub use crate::config::{TaskConfig, TaskPlan};
    pub use crate::indices::{
        FractionalCoverModel, IndexCalculator, IndexKind, IndexParams,
    };
    pub use crate::masking::{
        Platform, QualityMask, WaterExclusion, WaterMask, WaterThresholds,
    };
    pub use crate::output::{AxisNames, OutputAssembler};
    pub use crate::products::{
        assemble, load_period, ChunkedPipeline, NamedOutput, PeriodInput, PeriodRequest,
        ProductKind, ProductSpec, QueryArea,
    };
    pub use crate::task::{run_task, TaskReport};
    pub use chronocube_core::prelude::*;
}
