//! # chronocube parallel
//!
//! Scheduling for chronocube computations.
//!
//! This crate provides:
//! - Row-parallel processing using Rayon ([`ProcessingMode`])
//! - Spatial chunking of a grid ([`ChunkIterator`])
//! - A deferred task graph evaluated in concurrent waves ([`TaskGraph`])

pub mod graph;
pub mod strategy;
pub mod tiled;

pub use graph::{NodeId, TaskGraph};
pub use strategy::{num_cpus, ParallelStrategy, ProcessingMode};
pub use tiled::{Chunk, ChunkIterator};
