//! Artifact classification
//!
//! Decides, per published file, whether it becomes an artifact and which
//! labels, projects and kind it carries. Evaluation is a pure function of
//! the compiled configuration and the candidate `(path, direction)`:
//! global exclude and include patterns first, then every applicable rule
//! in ascending `order`. A rule's `type` overrides the running decision
//! and its `kind` overrides the running kind, while labels and projects
//! only ever accumulate.

mod engine;
mod rule;

pub use engine::{ArtifactClassifier, ArtifactEvaluation, ArtifactMetadata, ClassificationPolicy};
pub use rule::{ArtifactRule, Direction, RuleType};
