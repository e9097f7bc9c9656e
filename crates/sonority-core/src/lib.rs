//! Core domain model for sonority.
//!
//! This crate defines the recording identity types, the feature documents
//! produced by audio analysis, the SQLite schema that stores them, and the
//! two collaborator traits the similarity engine consumes:
//! [`FeatureAccessor`] and [`IdentifierTranslator`].

#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]

pub mod access;
pub mod error;
pub mod model;
pub mod schema;

pub use access::{FeatureAccessor, IdentifierTranslator};
pub use error::{Error, Result};
