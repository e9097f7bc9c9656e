//! Similarity search for sonority.
//!
//! Turns submitted feature documents into per-metric vectors, builds
//! approximate nearest-neighbour indexes over them and answers similarity,
//! distance and path queries through [`SimilarityService`].

#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]

pub mod config;
pub mod error;
pub mod index;
pub mod metrics;
pub mod path;
pub mod service;
pub mod stats;
pub mod vectors;

pub use config::Config;
pub use error::{SimilarityError, SimilarityResult};
pub use index::{ApproximateIndex, DistanceType, IndexConfig, IndexRegistry, IndexSettings};
pub use metrics::{MetricCatalog, MetricDefinition, MetricSource, VectorBuilder};
pub use path::{PathFinder, PathFinderConfig, PathStep};
pub use service::{IndexSummary, MetricStatus, RemovedMetric, SimilarityService, Status};
pub use stats::{NormalizationStats, NormalizationStatsStore, StatsReport};
pub use vectors::{AddMetricsReport, SimilarityVectorStore};
