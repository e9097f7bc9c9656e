pub mod config;
pub mod index;
pub mod metrics;
pub mod query;
pub mod stats;
pub mod status;

pub use status::show_status;
