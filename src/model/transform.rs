//! Transform: a versioned pipeline identity

use serde::{Deserialize, Serialize};

use super::record::Record;

/// Version marker used when neither a revision nor a commit is known.
pub const FALLBACK_VERSION: &str = "latest";

/// Descriptive fields attached to a transform when it is created.
///
/// None of these take part in identity; they only describe where the
/// pipeline came from and how to rerun it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Transform type on the remote side ("pipeline", "script", ...)
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// A pipeline definition. Identity is `(key, version)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub uid: String,
    pub id: i64,
    pub key: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(flatten)]
    pub source: SourceDescriptor,
    /// Fields this crate does not model
    #[serde(flatten)]
    pub extra: Record,
}

impl Transform {
    /// The version, or the fallback marker when the record carries none.
    pub fn version_or_fallback(&self) -> &str {
        self.version.as_deref().unwrap_or(FALLBACK_VERSION)
    }

    /// True if this record has the given identity.
    pub fn has_identity(&self, key: &str, version: &str) -> bool {
        self.key == key && self.version_or_fallback() == version
    }
}

/// How a pipeline revision string should be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevisionKind {
    /// A (possibly abbreviated) commit hash
    Commit,
    /// A branch or tag name
    Branch,
}

impl RevisionKind {
    /// Classify a revision: 7 to 40 hex digits reads as a commit.
    pub fn classify(revision: &str) -> Self {
        let len = revision.len();
        if (7..=40).contains(&len) && revision.chars().all(|c| c.is_ascii_hexdigit()) {
            Self::Commit
        } else {
            Self::Branch
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Commit => "commit",
            Self::Branch => "branch",
        }
    }
}
