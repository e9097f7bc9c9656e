use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::Error;

/// MusicBrainz identifier of the recorded work.
///
/// Several submissions may share one MBID; the submission offset
/// disambiguates them (see [`Recording`](super::Recording)).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Mbid(Uuid);

impl Mbid {
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for Mbid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Mbid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| Error::InvalidMbid {
                text: s.to_string(),
                reason: e.to_string(),
            })
    }
}

impl AsRef<Uuid> for Mbid {
    fn as_ref(&self) -> &Uuid {
        &self.0
    }
}

/// Dense integer assigned to a submission when it is stored.
///
/// Internal ids are never reused and form the key space of every
/// similarity index.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct InternalId(i64);

impl InternalId {
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }

    /// Slot of this id in a dense array, or `None` for negative ids.
    #[must_use]
    pub fn as_index(self) -> Option<usize> {
        usize::try_from(self.0).ok()
    }
}

impl fmt::Display for InternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for InternalId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}
