//! Batch pipeline engine.
//!
//! A [builder::Builder] describes one unit of work: where the items come from, how a single item is
//! transformed and how the transformed items are written to the targets. [run] drives a builder: the
//! items are transformed concurrently on a bounded worker pool and committed to the targets in chunks,
//! in source order.
//!
//! The [projection::ProjectionBuilder] is the builder that merges the documents of several source
//! stores into one document per key value in a target store.

pub use crate::error::{Error, Result};
pub use crate::pipeline::{RunSummary, run};

mod error;

pub mod config;

/// Builder contract driven by the pipeline.
pub mod builder;

mod chunker;

/// Bounded submission of transforms to the worker pool.
mod mapper;

mod worker;

/// Drives a builder to completion.
pub mod pipeline;

pub mod merge;

pub mod commit;

/// Builder merging several source stores into a target store.
pub mod projection;

pub mod setup_tracing;
