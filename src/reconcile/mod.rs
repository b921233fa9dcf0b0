//! Entity reconciliation
//!
//! Resolves the Transform and Run of a workflow execution against the
//! metadata service (reusing what exists, creating what does not), moves
//! the run through its status lifecycle, and registers published files as
//! Artifacts. Identity failures are fatal; a single artifact or report
//! failing is logged and skipped.

mod engine;
mod report;
mod workflow;

pub use engine::Reconciler;
pub use workflow::{RunOutcome, WorkflowMetadata};

use thiserror::Error;

use crate::client::ApiError;

/// Errors that stop provenance tracking for a run
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("remote error: {0}")]
    Api(#[from] ApiError),

    #[error("no instance configured and not in dry-run mode")]
    NoInstance,

    #[error("transform must be reconciled before the run")]
    MissingTransform,
}

/// Result type for reconciliation
pub type ReconcileResult<T> = Result<T, ReconcileError>;
