//! Error taxonomy for the similarity engine.

use sonority_core::model::InternalId;
use thiserror::Error;

/// Errors raised by metric computation, indexing and path finding.
#[derive(Debug, Error)]
pub enum SimilarityError {
    /// Unknown metric, distance type or tree count, or an invalid metric
    /// definition. Rejected up front, never defaulted.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A recording, document or index artifact does not exist.
    #[error("not found: {entity} {id}")]
    NotFound { entity: &'static str, id: String },

    /// Mutation attempted on an index that has already been built.
    #[error("index {key} is {state} and cannot be modified")]
    ImmutableState { key: String, state: &'static str },

    /// A feature document lacks data a metric transform needs.
    #[error("invalid feature data for {metric} on recording {id}: {reason}")]
    InvalidFeatureData {
        metric: String,
        id: InternalId,
        reason: String,
    },

    /// Not enough documents to compute statistics from.
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// Normalization stats are required but have not been computed.
    #[error("normalization stats have not been computed for metric {metric}")]
    StatsNotComputed { metric: String },

    /// The item was never added to the index.
    #[error("item {id} is not in index {key}")]
    ItemNotIndexed { key: String, id: InternalId },

    /// No built index exists for the requested configuration.
    #[error("index {key} is not available: {reason}")]
    IndexNotAvailable { key: String, reason: String },

    /// The index could not produce a distance between two items.
    #[error("distance between {a} and {b} is unavailable in index {key}")]
    DistanceUnavailable {
        key: String,
        a: InternalId,
        b: InternalId,
    },

    /// An index artifact exists on disk but cannot be used.
    #[error("index artifact {path} is corrupt: {reason}")]
    CorruptIndex { path: String, reason: String },

    /// An error propagated from the core domain layer.
    #[error("core error: {0}")]
    Core(#[from] sonority_core::Error),

    /// An error propagated from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] bincode::Error),
}

impl SimilarityError {
    /// Returns `true` when the failure is caused by the caller's input
    /// rather than by the service.
    pub fn is_client_error(&self) -> bool {
        match self {
            Self::NotFound { .. } | Self::InvalidFeatureData { .. } => true,
            Self::Core(e) => e.is_not_found(),
            _ => false,
        }
    }

    /// Returns `true` when the error indicates the entity was not found.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Core(e) => e.is_not_found(),
            _ => false,
        }
    }
}

/// Convenience alias for similarity results.
pub type SimilarityResult<T> = std::result::Result<T, SimilarityError>;
