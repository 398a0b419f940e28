//! Drift core: the resource model.
//!
//! A [`Resource`] wraps one cluster object document and knows how to
//! canonicalize it, digest it, and compare it semantically against the
//! copy observed on a cluster.

#![forbid(unsafe_code)]

pub mod canonical;
pub mod digest;
pub mod equality;
pub mod resource;
pub mod secret;
pub mod tables;
pub mod version;

use thiserror::Error;

pub use canonical::canonicalize;
pub use digest::{calculate_sha256sum, serialize};
pub use equality::{api_version_equal, cpu_equal, semantically_equal};
pub use resource::{fully_qualified_kind, Resource};
pub use secret::{base64_encode_secret_field_value, build_secret};
pub use version::IntegrationVersion;

pub type Json = serde_json::Value;

/// Errors raised while building a [`Resource`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResourceError {
    #[error("error constructing resource: {0}")]
    Construction(String),
}

pub mod prelude {
    pub use super::{Json, Resource, ResourceError};
    pub use super::tables::annotations;
}
