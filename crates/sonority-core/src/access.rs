//! Collaborator traits consumed by the similarity engine.
//!
//! The engine never talks to storage directly when it needs documents or
//! identities; it goes through these traits so the backing store can be
//! swapped (the SQLite [`Database`](crate::schema::Database) is the
//! production implementation).

use crate::error::Result;
use crate::model::{FeatureDocument, InternalId, Recording};

/// Read access to submitted feature documents.
pub trait FeatureAccessor {
    /// Fetch the document stored for `id`.
    ///
    /// Fails with [`Error::MissingRow`](crate::Error::MissingRow) when no
    /// document exists.
    fn get_feature_document(&self, id: InternalId) -> Result<FeatureDocument>;

    /// Fetch the documents of many ids in one read, in input order. Ids
    /// without a document are left out.
    fn get_feature_documents(&self, ids: &[InternalId]) -> Result<Vec<FeatureDocument>> {
        let mut docs = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get_feature_document(*id) {
                Ok(doc) => docs.push(doc),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(docs)
    }

    /// Number of stored documents.
    fn count_feature_documents(&self) -> Result<u64>;

    /// Ids of a uniform random sample of at most `size` documents.
    fn sample_document_ids(&self, size: u64) -> Result<Vec<InternalId>>;
}

/// Bidirectional mapping between public recordings and internal ids.
///
/// The mapping is total and injective over stored submissions.
pub trait IdentifierTranslator {
    fn to_internal(&self, recording: &Recording) -> Result<InternalId>;

    fn to_public(&self, id: InternalId) -> Result<Recording>;

    /// Translate many ids at once, preserving input order. Ids without a
    /// public identity map to `None`.
    fn to_public_bulk(&self, ids: &[InternalId]) -> Result<Vec<Option<Recording>>> {
        ids.iter()
            .map(|id| match self.to_public(*id) {
                Ok(recording) => Ok(Some(recording)),
                Err(e) if e.is_not_found() => Ok(None),
                Err(e) => Err(e),
            })
            .collect()
    }
}
