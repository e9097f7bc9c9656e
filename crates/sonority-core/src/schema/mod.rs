mod db;
mod metrics;
mod migrations;
mod stats;
mod vectors;

pub use db::Database;
pub use metrics::MetricMeta;
pub use migrations::{Migration, MIGRATIONS};
pub use stats::StoredStats;
