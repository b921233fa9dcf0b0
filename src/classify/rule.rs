//! Compiled classification rules

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, RuleConfig};

/// Which side of a run a file sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
    Both,
}

impl Direction {
    /// True if something declared for `self` applies to a `candidate`.
    pub fn accepts(&self, candidate: Direction) -> bool {
        *self == Direction::Both || candidate == Direction::Both || *self == candidate
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
            Self::Both => "both",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a matching rule turns tracking on or off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    Include,
    Exclude,
}

/// A rule with its pattern compiled.
#[derive(Debug, Clone)]
pub struct ArtifactRule {
    pub name: String,
    pub pattern: Regex,
    pub rule_type: Option<RuleType>,
    pub direction: Direction,
    pub kind: Option<String>,
    pub labels: Vec<String>,
    pub projects: Vec<String>,
    pub order: i64,
    pub enabled: bool,
}

impl ArtifactRule {
    /// Compile a configured rule. `default_direction` applies when the
    /// rule does not name one.
    pub fn compile(
        name: &str,
        config: &RuleConfig,
        default_direction: Direction,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            name: name.to_string(),
            pattern: compile_pattern(&format!("rules.{}.pattern", name), &config.pattern)?,
            rule_type: config.rule_type,
            direction: config.direction.unwrap_or(default_direction),
            kind: config.kind.clone(),
            labels: config.labels.clone(),
            projects: config.projects.clone(),
            order: config.order,
            enabled: config.enabled,
        })
    }

    /// Enabled, direction-compatible and matching `path`.
    pub fn applies_to(&self, path: &str, direction: Direction) -> bool {
        self.enabled && self.direction.accepts(direction) && self.pattern.is_match(path)
    }
}

/// Compile a pattern, naming the offending field on failure.
pub(crate) fn compile_pattern(field: &str, pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
        field: field.to_string(),
        source,
    })
}
