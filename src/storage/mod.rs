//! Artifact storage locations
//!
//! Storage keys place an artifact's content under its storage root.
//! `lamin://` virtual paths name an artifact on some instance and resolve
//! to the concrete URL of its content.

mod key;
mod resolver;

pub use key::{artifact_storage_key, auto_storage_key, UID_BASE_LEN, VIRTUAL_PREFIX};
pub use resolver::{
    ArtifactPathResolver, ResolveError, ResolveResult, VirtualPath, VIRTUAL_SCHEME,
};
