//! What the host knows about the workflow being run

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::model::{RevisionKind, RunStatus, SourceDescriptor, FALLBACK_VERSION};

/// Descriptive facts about one workflow execution, supplied by the host at
/// init time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowMetadata {
    /// Source repository, e.g. `https://github.com/nf-core/scrnaseq`
    pub repository: Option<String>,
    /// Entry script relative to the repository root
    pub script_path: String,
    /// Revision requested by the user (branch, tag or commit)
    pub revision: Option<String>,
    /// Commit actually checked out
    pub commit_id: Option<String>,
    /// Host session identifier; resumed executions share it
    pub session_id: Option<String>,
    pub run_name: Option<String>,
    pub description: Option<String>,
    pub command_line: Option<String>,
    /// Where the host keeps intermediate files
    pub work_dir: PathBuf,
    /// Execution report written by the host, if any
    pub report_path: Option<PathBuf>,
}

impl WorkflowMetadata {
    pub fn new(script_path: impl Into<String>) -> Self {
        Self {
            script_path: script_path.into(),
            ..Default::default()
        }
    }

    pub fn with_repository(mut self, repository: impl Into<String>) -> Self {
        self.repository = Some(repository.into());
        self
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    pub fn with_commit(mut self, commit_id: impl Into<String>) -> Self {
        self.commit_id = Some(commit_id.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    pub fn with_report(mut self, report_path: impl Into<PathBuf>) -> Self {
        self.report_path = Some(report_path.into());
        self
    }

    /// Stable transform key: repository location (no scheme, no `.git`)
    /// joined with the entry script.
    pub fn transform_key(&self) -> String {
        let script = self.script_path.trim_start_matches("./").trim_start_matches('/');
        match self.repository.as_deref().map(repository_location) {
            Some(repo) if !repo.is_empty() => format!("{}/{}", repo, script),
            _ => script.to_string(),
        }
    }

    /// Transform version: revision, else commit, else the fallback marker.
    pub fn transform_version(&self) -> String {
        [&self.revision, &self.commit_id]
            .into_iter()
            .flatten()
            .map(|v| v.trim())
            .find(|v| !v.is_empty())
            .unwrap_or(FALLBACK_VERSION)
            .to_string()
    }

    /// Descriptive fields for a newly created transform.
    pub fn source_descriptor(&self) -> SourceDescriptor {
        let (reference, reference_type) = match (&self.revision, &self.commit_id) {
            (Some(rev), _) => (Some(rev.clone()), Some(RevisionKind::classify(rev))),
            (None, Some(commit)) => (Some(commit.clone()), Some(RevisionKind::Commit)),
            (None, None) => (None, None),
        };
        SourceDescriptor {
            source_code: Some(self.entrypoint()),
            reference,
            reference_type: reference_type.map(|k| k.as_str().to_string()),
            description: self
                .description
                .clone()
                .or_else(|| self.repository.as_deref().map(repository_location)),
            kind: Some("pipeline".to_string()),
        }
    }

    /// A command that reruns this pipeline version.
    fn entrypoint(&self) -> String {
        let target = self
            .repository
            .as_deref()
            .map(repository_location)
            .unwrap_or_else(|| self.script_path.clone());
        match (&self.revision, &self.commit_id) {
            (Some(rev), _) | (None, Some(rev)) => format!("nextflow run {} -r {}", target, rev),
            (None, None) => format!("nextflow run {}", target),
        }
    }
}

/// `https://github.com/org/repo.git` → `github.com/org/repo`
fn repository_location(repository: &str) -> String {
    let trimmed = repository.trim().trim_end_matches('/');
    let without_scheme = trimmed
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(trimmed);
    without_scheme
        .strip_suffix(".git")
        .unwrap_or(without_scheme)
        .to_string()
}

/// How the host reports that the workflow ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Success,
    Cancelled,
    Failed,
}

impl RunOutcome {
    /// Final run status for this outcome.
    pub fn status(&self) -> RunStatus {
        match self {
            Self::Success => RunStatus::Completed,
            Self::Cancelled => RunStatus::Aborted,
            Self::Failed => RunStatus::Errored,
        }
    }
}
