//! Observation validity and water masking
//!
//! - [`QualityMask`]: per-scene QA decoding into a [`QualityMaskArray`]
//! - [`WaterMask`]: temporal water occurrence from a classification cube
//!
//! [`QualityMaskArray`]: chronocube_core::QualityMaskArray

mod quality;
mod water;

pub use quality::{Platform, QualityMask, REFLECTANCE_BANDS};
pub use water::{binarize, WaterExclusion, WaterMask, WaterThresholds, WATER_BAND};
