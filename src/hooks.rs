//! Host lifecycle integration
//!
//! The host calls into `ProvenanceObserver` at fixed points of a workflow
//! execution. The observer owns its reconciler by handle; there is no
//! process-wide instance.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::classify::Direction;
use crate::model::{Artifact, Run, Transform};
use crate::reconcile::{ReconcileResult, Reconciler, RunOutcome, WorkflowMetadata};

/// Maps host lifecycle events onto a `Reconciler`.
pub struct ProvenanceObserver {
    reconciler: Arc<Reconciler>,
    ended: AtomicBool,
}

impl ProvenanceObserver {
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        Self {
            reconciler,
            ended: AtomicBool::new(false),
        }
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// Resolve the transform, then the run. Must complete before any file
    /// is published; failure here stops provenance tracking.
    pub fn on_init(&self, workflow: &WorkflowMetadata) -> ReconcileResult<(Transform, Run)> {
        let transform = self.reconciler.reconcile_transform(workflow)?;
        let run = self.reconciler.reconcile_run()?;
        info!(transform = %transform.uid, run = %run.uid, "provenance tracking initialized");
        Ok((transform, run))
    }

    pub fn on_run_start(&self) -> ReconcileResult<Option<Run>> {
        self.reconciler.start_run()
    }

    /// A file was published by a process. May be called from many worker
    /// threads at once.
    pub fn on_file_published(&self, path: impl AsRef<Path>, direction: Direction) -> Option<Artifact> {
        let path = path.as_ref().to_string_lossy();
        self.reconciler.track_published_file(&path, direction)
    }

    /// The workflow ended. Only the first call has an effect.
    pub fn on_run_end(&self, outcome: RunOutcome) -> ReconcileResult<Option<Run>> {
        if self.ended.swap(true, Ordering::SeqCst) {
            debug!(?outcome, "run end already handled");
            return Ok(None);
        }
        self.reconciler.finalize_run(outcome)
    }
}
