//! Evaluation of candidate paths against the classification tree

use regex::Regex;
use serde::Serialize;
use tracing::trace;

use super::rule::{compile_pattern, ArtifactRule, Direction, RuleType};
use crate::config::{ArtifactSection, ArtifactsConfig, ConfigError};

/// Metadata accumulated while evaluating one path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArtifactMetadata {
    pub labels: Vec<String>,
    pub projects: Vec<String>,
    pub kind: Option<String>,
}

impl ArtifactMetadata {
    fn absorb(&mut self, labels: &[String], projects: &[String]) {
        union_into(&mut self.labels, labels);
        union_into(&mut self.projects, projects);
    }
}

/// Outcome of classifying one path.
///
/// `metadata` is filled in even when `should_track` is false, so a skipped
/// file can still be explained.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArtifactEvaluation {
    pub should_track: bool,
    pub metadata: ArtifactMetadata,
}

impl ArtifactEvaluation {
    pub fn skipped() -> Self {
        Self::default()
    }
}

/// The effective rules for one direction.
#[derive(Debug, Clone)]
pub struct ClassificationPolicy {
    direction: Direction,
    enabled: bool,
    include: Option<Regex>,
    exclude: Option<Regex>,
    labels: Vec<String>,
    projects: Vec<String>,
    kind: Option<String>,
    /// Sorted ascending by `order`, ties in declaration order
    rules: Vec<ArtifactRule>,
}

impl ClassificationPolicy {
    /// A policy that tracks nothing.
    pub fn disabled(direction: Direction) -> Self {
        Self {
            direction,
            enabled: false,
            include: None,
            exclude: None,
            labels: Vec::new(),
            projects: Vec::new(),
            kind: None,
            rules: Vec::new(),
        }
    }

    fn build(config: &ArtifactsConfig, direction: Direction) -> Result<Self, ConfigError> {
        let global = &config.global;
        let (section, scope) = match direction {
            Direction::Input => (config.input.as_ref(), "artifacts.input"),
            _ => (config.output.as_ref(), "artifacts.output"),
        };

        if let Some(section) = section {
            check_section(section, scope, direction, global)?;
        }

        let include = effective_pattern(
            section.and_then(|s| s.include_pattern.as_deref()),
            global.include_pattern.as_deref(),
            scope,
            "include_pattern",
        )?;
        let exclude = effective_pattern(
            section.and_then(|s| s.exclude_pattern.as_deref()),
            global.exclude_pattern.as_deref(),
            scope,
            "exclude_pattern",
        )?;

        let mut labels = Vec::new();
        let mut projects = Vec::new();
        union_into(&mut labels, &global.labels);
        union_into(&mut projects, &global.projects);

        let mut rules = compile_rules(global, "artifacts", Direction::Both)?;
        if let Some(section) = section {
            union_into(&mut labels, &section.labels);
            union_into(&mut projects, &section.projects);
            rules.extend(compile_rules(section, scope, direction)?);
        }
        rules.sort_by_key(|rule| rule.order);

        Ok(Self {
            direction,
            enabled: section
                .and_then(|s| s.enabled)
                .or(global.enabled)
                .unwrap_or(true),
            include,
            exclude,
            labels,
            projects,
            kind: section
                .and_then(|s| s.kind.clone())
                .or_else(|| global.kind.clone()),
            rules,
        })
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn rules(&self) -> &[ArtifactRule] {
        &self.rules
    }

    /// Classify `path` as a file moving in `direction`.
    pub fn evaluate(&self, path: &str, direction: Direction) -> ArtifactEvaluation {
        if !self.enabled || !self.direction.accepts(direction) {
            return ArtifactEvaluation::skipped();
        }

        let mut metadata = ArtifactMetadata {
            labels: self.labels.clone(),
            projects: self.projects.clone(),
            kind: self.kind.clone(),
        };
        let mut should_track = true;

        if self.exclude.as_ref().is_some_and(|re| re.is_match(path)) {
            should_track = false;
        }
        if should_track && self.include.as_ref().is_some_and(|re| !re.is_match(path)) {
            should_track = false;
        }

        for rule in self.rules.iter().filter(|r| r.applies_to(path, direction)) {
            trace!(rule = %rule.name, path, "classification rule matched");
            match rule.rule_type {
                Some(RuleType::Include) => should_track = true,
                Some(RuleType::Exclude) => should_track = false,
                None => {}
            }
            metadata.absorb(&rule.labels, &rule.projects);
            if let Some(kind) = &rule.kind {
                metadata.kind = Some(kind.clone());
            }
        }

        ArtifactEvaluation {
            should_track,
            metadata,
        }
    }
}

/// Decides whether published files become artifacts, and with which
/// labels, projects and kind.
///
/// Built once from configuration; all patterns are compiled up front so
/// evaluation itself cannot fail.
#[derive(Debug, Clone)]
pub struct ArtifactClassifier {
    input: ClassificationPolicy,
    output: ClassificationPolicy,
}

impl ArtifactClassifier {
    pub fn from_config(config: &ArtifactsConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            input: ClassificationPolicy::build(config, Direction::Input)?,
            output: ClassificationPolicy::build(config, Direction::Output)?,
        })
    }

    /// A classifier that tracks nothing.
    pub fn disabled() -> Self {
        Self {
            input: ClassificationPolicy::disabled(Direction::Input),
            output: ClassificationPolicy::disabled(Direction::Output),
        }
    }

    /// The policy used for candidates of `direction`. `Both` uses the
    /// output policy.
    pub fn policy(&self, direction: Direction) -> &ClassificationPolicy {
        match direction {
            Direction::Input => &self.input,
            Direction::Output | Direction::Both => &self.output,
        }
    }

    pub fn evaluate(&self, path: &str, direction: Direction) -> ArtifactEvaluation {
        self.policy(direction).evaluate(path, direction)
    }
}

impl Default for ArtifactClassifier {
    fn default() -> Self {
        Self::from_config(&ArtifactsConfig::default()).unwrap_or_else(|_| Self::disabled())
    }
}

// === Helpers ===

fn compile_rules(
    section: &ArtifactSection,
    scope: &str,
    default_direction: Direction,
) -> Result<Vec<ArtifactRule>, ConfigError> {
    section
        .rules
        .iter()
        .map(|(name, config)| {
            ArtifactRule::compile(name, config, default_direction).map_err(|err| match err {
                ConfigError::InvalidPattern { field, source } => ConfigError::InvalidPattern {
                    field: format!("{}.{}", scope, field),
                    source,
                },
                other => other,
            })
        })
        .collect()
}

/// The section's pattern if set, else the global one, compiled.
fn effective_pattern(
    in_section: Option<&str>,
    in_global: Option<&str>,
    scope: &str,
    name: &str,
) -> Result<Option<Regex>, ConfigError> {
    match (in_section, in_global) {
        (Some(pattern), _) => compile_pattern(&format!("{}.{}", scope, name), pattern).map(Some),
        (None, Some(pattern)) => {
            compile_pattern(&format!("artifacts.{}", name), pattern).map(Some)
        }
        (None, None) => Ok(None),
    }
}

fn check_section(
    section: &ArtifactSection,
    scope: &str,
    direction: Direction,
    global: &ArtifactSection,
) -> Result<(), ConfigError> {
    for (name, rule) in &section.rules {
        if let Some(declared) = rule.direction {
            if !declared.accepts(direction) {
                return Err(ConfigError::ConflictingSections(format!(
                    "rule '{}' in {} declares direction '{}'",
                    name, scope, declared
                )));
            }
        }
        if global.rules.contains_key(name) {
            return Err(ConfigError::ConflictingSections(format!(
                "rule '{}' is defined both globally and in {}",
                name, scope
            )));
        }
    }
    Ok(())
}

fn union_into(target: &mut Vec<String>, items: &[String]) {
    for item in items {
        if !target.contains(item) {
            target.push(item.clone());
        }
    }
}
