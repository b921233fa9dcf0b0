//! lamin-provenance: workflow provenance for LaminDB instances
//!
//! Records what a workflow execution was, what it read and what it wrote.
//! For each execution it reconciles a Transform (the pipeline version), a
//! Run (this execution) and Artifacts (tracked files) against a remote
//! metadata service.
//!
//! # Core Concepts
//!
//! - **Reconciler**: fetch-or-create of Transform and Run, run status
//!   lifecycle, serialized artifact registration
//! - **Classifier**: declarative rules deciding which files are tracked and
//!   with which labels, projects and kind
//! - **MetadataClient**: token renewal and bounded retry around every
//!   remote call
//! - **Dry run**: the full lifecycle with sentinel records and no writes
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use lamin_provenance::{ProvenanceObserver, Reconciler, RunOutcome, WorkflowMetadata};
//!
//! let reconciler = Arc::new(Reconciler::new(None).with_dry_run(true));
//! let observer = ProvenanceObserver::new(reconciler);
//! let (transform, _run) = observer.on_init(&WorkflowMetadata::new("main.nf")).unwrap();
//! assert_eq!(transform.key, "main.nf");
//! observer.on_run_end(RunOutcome::Success).unwrap();
//! ```

pub mod classify;
pub mod client;
pub mod config;
pub mod hooks;
pub mod model;
pub mod reconcile;
pub mod storage;

pub use classify::{ArtifactClassifier, ArtifactEvaluation, ArtifactMetadata, Direction};
pub use client::{ApiError, ApiResult, InstanceClientCache, InstanceId, LaminApi, MetadataClient};
pub use config::{ConfigError, LaminConfig, Settings};
pub use hooks::ProvenanceObserver;
pub use model::{Artifact, Run, RunStatus, Transform};
pub use reconcile::{ReconcileError, ReconcileResult, Reconciler, RunOutcome, WorkflowMetadata};
pub use storage::{artifact_storage_key, auto_storage_key, ArtifactPathResolver, ResolveError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
