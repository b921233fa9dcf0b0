//! Artifact classification tree as written in the configuration file

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::classify::{Direction, RuleType};

/// One named classification rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Regular expression matched anywhere in the candidate path
    pub pattern: String,
    #[serde(default, rename = "type")]
    pub rule_type: Option<RuleType>,
    /// Defaults to the enclosing section's direction
    #[serde(default)]
    pub direction: Option<Direction>,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub projects: Vec<String>,
    #[serde(default)]
    pub order: i64,
}

/// Settings shared by the global section and the direction sections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactSection {
    pub enabled: Option<bool>,
    pub include_pattern: Option<String>,
    pub exclude_pattern: Option<String>,
    pub labels: Vec<String>,
    pub projects: Vec<String>,
    pub kind: Option<String>,
    /// Rules keyed by name, in declaration order
    pub rules: IndexMap<String, RuleConfig>,
}

/// The `artifacts` block: global settings plus optional `input` and
/// `output` sections refining them per direction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactsConfig {
    #[serde(flatten)]
    pub global: ArtifactSection,
    #[serde(default)]
    pub input: Option<ArtifactSection>,
    #[serde(default)]
    pub output: Option<ArtifactSection>,
}

fn default_true() -> bool {
    true
}
