pub mod document;
pub mod ids;
pub mod recording;

pub use document::{ClassifierOutput, FeatureDocument};
pub use ids::{InternalId, Mbid};
pub use recording::Recording;
