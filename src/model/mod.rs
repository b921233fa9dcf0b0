//! Typed provenance records
//!
//! The metadata service exchanges loosely-structured JSON maps. Internally
//! every entity is an explicit struct; conversion happens only at the
//! client boundary (`Record` ↔ struct) and unknown fields travel along in
//! an `extra` bag so nothing is dropped on a round-trip.

mod artifact;
mod record;
mod run;
mod storage;
mod transform;

pub use artifact::{Artifact, ArtifactKind};
pub use record::{from_record, to_record, Record, DRY_RUN_ID, DRY_RUN_UID_PREFIX};
pub use run::{Run, RunStatus};
pub use storage::StorageLocation;
pub use transform::{RevisionKind, SourceDescriptor, Transform, FALLBACK_VERSION};

pub(crate) use record::sentinel_uid;
