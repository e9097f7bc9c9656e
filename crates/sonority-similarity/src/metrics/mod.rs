//! Metric definitions and the transforms that turn feature documents into
//! fixed-length vectors.

pub mod catalog;
pub mod definition;
pub mod pipeline;

pub use catalog::{MetricCatalog, DEFAULT_WEIGHT};
pub use definition::{ClusterMember, MetricDefinition, MetricSource, HYBRID_SEPARATOR};
pub use pipeline::{extract, normalize, weight, wrap_circular, VectorBuilder};
