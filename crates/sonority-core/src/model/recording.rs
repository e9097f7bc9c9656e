use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::ids::Mbid;

/// Public address of one submitted analysis: the MBID plus the zero-based
/// offset of the submission among all submissions for that MBID.
///
/// Two recordings are the same only when both halves match; sharing an MBID
/// is not enough.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Recording {
    pub mbid: Mbid,
    pub offset: u32,
}

impl Recording {
    #[must_use]
    pub const fn new(mbid: Mbid, offset: u32) -> Self {
        Self { mbid, offset }
    }
}

impl fmt::Display for Recording {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.mbid, self.offset)
    }
}
