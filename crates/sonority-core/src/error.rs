use thiserror::Error;

use crate::model::{InternalId, Recording};

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No submission matches the MBID and offset.
    #[error("recording {0} was never submitted")]
    UnknownRecording(Recording),

    /// A row keyed by an internal id is absent.
    #[error("no {entity} stored for id {id}")]
    MissingRow { entity: &'static str, id: InternalId },

    #[error("invalid MBID {text:?}: {reason}")]
    InvalidMbid { text: String, reason: String },

    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl Error {
    /// Returns `true` when the error reports a missing recording or row.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::UnknownRecording(_) | Self::MissingRow { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
