//! Artifact: a tracked input or output file

use serde::{Deserialize, Serialize};

use super::record::Record;

/// Artifact kinds with special meaning on the remote side.
pub struct ArtifactKind;

impl ArtifactKind {
    /// Execution reports attached to a run
    pub const RUN_REPORT: &'static str = "__lamindb_run__";
}

/// A file registered against the metadata service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub uid: String,
    pub id: i64,
    #[serde(default)]
    pub run_id: Option<i64>,
    /// Storage key relative to the storage root
    #[serde(default)]
    pub key: Option<String>,
    /// Path or URI the artifact was registered from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_id: Option<i64>,
    #[serde(default)]
    pub suffix: String,
    /// The key is descriptive only; the real location is derived from the uid
    #[serde(default, rename = "_key_is_virtual")]
    pub key_is_virtual: bool,
    #[serde(default, rename = "_overwrite_versions")]
    pub overwrite_versions: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub projects: Vec<String>,
    #[serde(flatten)]
    pub extra: Record,
}

impl Artifact {
    /// True if this record was fabricated by a dry run.
    pub fn is_placeholder(&self) -> bool {
        self.id == super::DRY_RUN_ID
    }
}
