//! Reconciler: fetch-or-create of provenance records for one workflow run

use chrono::Utc;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, error, info, warn};
use url::Url;

use super::report;
use super::workflow::{RunOutcome, WorkflowMetadata};
use super::{ReconcileError, ReconcileResult};
use crate::classify::{ArtifactClassifier, Direction};
use crate::client::{MetadataClient, NewArtifact, NewTransform, RecordQuery};
use crate::config::{ManualOverrides, Settings};
use crate::model::{
    sentinel_uid, Artifact, ArtifactKind, Record, Run, RunStatus, Transform, DRY_RUN_ID,
};

/// Reference type recorded on runs created for a host session.
const SESSION_REFERENCE_TYPE: &str = "session";

/// Resolves and maintains the Transform, Run and Artifacts of one workflow
/// execution.
///
/// One instance is shared by every host callback of the execution. The
/// current transform and run are held behind their own locks; artifact
/// registration is serialized through a single mutex so concurrent publish
/// events never race on the remote side.
pub struct Reconciler {
    client: Option<Arc<MetadataClient>>,
    dry_run: bool,
    manual: ManualOverrides,
    classifier: ArtifactClassifier,
    workflow: RwLock<Option<WorkflowMetadata>>,
    transform: RwLock<Option<Transform>>,
    run: RwLock<Option<Run>>,
    registration: Mutex<()>,
    finalized: AtomicBool,
}

impl Reconciler {
    /// `client` is `None` only when no instance is configured.
    pub fn new(client: Option<Arc<MetadataClient>>) -> Self {
        Self {
            client,
            dry_run: false,
            manual: ManualOverrides::default(),
            classifier: ArtifactClassifier::default(),
            workflow: RwLock::new(None),
            transform: RwLock::new(None),
            run: RwLock::new(None),
            registration: Mutex::new(()),
            finalized: AtomicBool::new(false),
        }
    }

    pub fn from_settings(settings: &Settings, client: Option<Arc<MetadataClient>>) -> Self {
        Self::new(client)
            .with_dry_run(settings.dry_run)
            .with_manual_overrides(settings.manual.clone())
            .with_classifier(settings.classifier.clone())
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_manual_overrides(mut self, manual: ManualOverrides) -> Self {
        self.manual = manual;
        self
    }

    pub fn with_classifier(mut self, classifier: ArtifactClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn classifier(&self) -> &ArtifactClassifier {
        &self.classifier
    }

    /// The resolved transform, once `reconcile_transform` has run.
    pub fn transform(&self) -> Option<Transform> {
        read(&self.transform).clone()
    }

    /// The active run, once `reconcile_run` has run.
    pub fn run(&self) -> Option<Run> {
        read(&self.run).clone()
    }

    // === Transform ===

    /// Resolve the transform for `workflow`, creating it if needed.
    ///
    /// A manual transform uid is tried first; if it cannot be fetched the
    /// transform is reconciled from `(key, version)` as usual.
    pub fn reconcile_transform(&self, workflow: &WorkflowMetadata) -> ReconcileResult<Transform> {
        *write(&self.workflow) = Some(workflow.clone());

        if let Some(transform) = self.manual_transform() {
            return Ok(self.set_transform(transform));
        }

        let key = workflow.transform_key();
        let version = workflow.transform_version();

        if let Some(client) = &self.client {
            if let Some(existing) = self.find_transform(client, &key, &version)? {
                info!(uid = %existing.uid, %key, %version, "reusing transform");
                return Ok(self.set_transform(existing));
            }
        }

        if self.dry_run {
            info!(%key, %version, "dry run: not creating transform");
            return Ok(self.set_transform(placeholder_transform(workflow, key, version)));
        }

        let client = self.client.as_ref().ok_or(ReconcileError::NoInstance)?;
        let source = workflow.source_descriptor();
        let new = NewTransform {
            key: key.clone(),
            version: version.clone(),
            kind: source.kind.clone().unwrap_or_else(|| "pipeline".to_string()),
            source_code: source.source_code,
            reference: source.reference,
            reference_type: source.reference_type,
            description: source.description,
        };

        let transform = match client.create_transform(&new) {
            Ok(created) => {
                info!(uid = %created.uid, %key, %version, "created transform");
                created
            }
            Err(err) if err.is_conflict() => {
                debug!(%key, %version, "transform created concurrently, reusing");
                self.find_transform(client, &key, &version)?.ok_or(err)?
            }
            Err(err) => return Err(err.into()),
        };
        Ok(self.set_transform(transform))
    }

    fn manual_transform(&self) -> Option<Transform> {
        let uid = self.manual.transform_uid.as_deref()?;
        let Some(client) = &self.client else {
            warn!(uid, "no instance to fetch manual transform from, reconciling automatically");
            return None;
        };
        match client.get_transform(uid) {
            Ok(Some(transform)) => {
                info!(uid, key = %transform.key, "using manually specified transform");
                Some(transform)
            }
            Ok(None) => {
                warn!(uid, "manual transform not found, reconciling automatically");
                None
            }
            Err(err) => {
                warn!(uid, error = %err, "could not fetch manual transform, reconciling automatically");
                None
            }
        }
    }

    fn find_transform(
        &self,
        client: &MetadataClient,
        key: &str,
        version: &str,
    ) -> ReconcileResult<Option<Transform>> {
        let mut found = client.find_transforms(key, version)?;
        if found.len() > 1 {
            warn!(key, version, count = found.len(), "multiple transforms share one identity, using the first");
        }
        Ok(if found.is_empty() { None } else { Some(found.swap_remove(0)) })
    }

    fn set_transform(&self, transform: Transform) -> Transform {
        *write(&self.transform) = Some(transform.clone());
        transform
    }

    // === Run ===

    /// Resolve the run for the current transform.
    ///
    /// A manual run uid is reused only while it belongs to this transform
    /// and is still scheduled. A run scheduled earlier for the same host
    /// session is reused likewise. Otherwise a new run is created.
    pub fn reconcile_run(&self) -> ReconcileResult<Run> {
        let transform = self.transform().ok_or(ReconcileError::MissingTransform)?;
        let workflow = read(&self.workflow).clone().unwrap_or_default();

        if let Some(run) = self.manual_run(&transform) {
            return Ok(self.set_run(run));
        }

        if let (Some(client), Some(session)) = (&self.client, &workflow.session_id) {
            let query = RecordQuery::new()
                .with_eq("transform_id", transform.id)
                .with_eq("reference", session.as_str())
                .with_eq("_status_code", RunStatus::Scheduled.code())
                .with_order_by("-id")
                .with_limit(1);
            if let Some(run) = client.find_runs(&query)?.into_iter().next() {
                info!(uid = %run.uid, session = %session, "reusing scheduled run");
                return Ok(self.set_run(run));
            }
        }

        if self.dry_run {
            info!(transform = %transform.uid, "dry run: not creating run");
            return Ok(self.set_run(placeholder_run(&transform, &workflow)));
        }

        let client = self.client.as_ref().ok_or(ReconcileError::NoInstance)?;
        let mut data = record([
            ("transform_id", json!(transform.id)),
            ("_status_code", json!(RunStatus::Scheduled.code())),
        ]);
        if let Some(name) = &workflow.run_name {
            data.insert("name".into(), json!(name));
        }
        if let Some(session) = &workflow.session_id {
            data.insert("reference".into(), json!(session));
            data.insert("reference_type".into(), json!(SESSION_REFERENCE_TYPE));
        }
        let run = client.create_run(&data)?;
        info!(uid = %run.uid, transform = %transform.uid, "created run");
        Ok(self.set_run(run))
    }

    fn manual_run(&self, transform: &Transform) -> Option<Run> {
        let uid = self.manual.run_uid.as_deref()?;
        let Some(client) = &self.client else {
            warn!(uid, "no instance to fetch manual run from, creating a new run");
            return None;
        };
        match client.get_run(uid) {
            Ok(Some(run)) if run.transform_id != transform.id => {
                warn!(
                    uid,
                    run_transform = run.transform_id,
                    transform = transform.id,
                    "manual run belongs to another transform, creating a new run"
                );
                None
            }
            Ok(Some(run)) if run.status != RunStatus::Scheduled => {
                warn!(uid, status = %run.status, "manual run is not scheduled, creating a new run");
                None
            }
            Ok(Some(run)) => {
                info!(uid, "using manually specified run");
                Some(run)
            }
            Ok(None) => {
                warn!(uid, "manual run not found, creating a new run");
                None
            }
            Err(err) => {
                warn!(uid, error = %err, "could not fetch manual run, creating a new run");
                None
            }
        }
    }

    fn set_run(&self, run: Run) -> Run {
        *write(&self.run) = Some(run.clone());
        run
    }

    /// Mark the active run as started.
    pub fn start_run(&self) -> ReconcileResult<Option<Run>> {
        let Some(run) = self.run() else {
            debug!("no active run to start");
            return Ok(None);
        };
        if self.dry_run {
            debug!(uid = %run.uid, "dry run: not starting run");
            return Ok(Some(run));
        }
        if !run.status.can_advance_to(RunStatus::Started) {
            warn!(uid = %run.uid, status = %run.status, "run cannot be started");
            return Ok(Some(run));
        }
        let Some(client) = &self.client else {
            return Ok(Some(run));
        };

        let data = record([
            ("_status_code", json!(RunStatus::Started.code())),
            ("started_at", json!(Utc::now())),
        ]);
        let updated = client.update_run(&run.uid, &data)?;
        check_uid(&run.uid, &updated.uid);
        info!(uid = %updated.uid, "run started");
        Ok(Some(self.set_run(updated)))
    }

    /// Close the active run with the status matching `outcome`.
    ///
    /// The execution report is attached on a best-effort basis; failing to
    /// produce or register it never prevents the status update. Only one
    /// call closes the run: concurrent or later calls return `None` once a
    /// call has claimed it. A failed call releases the claim.
    pub fn finalize_run(&self, outcome: RunOutcome) -> ReconcileResult<Option<Run>> {
        if self
            .finalized
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("run already finalized");
            return Ok(None);
        }
        let result = self.close_run(outcome);
        if !matches!(result, Ok(Some(_))) {
            self.finalized.store(false, Ordering::SeqCst);
        }
        result
    }

    /// Caller holds the finalization claim.
    fn close_run(&self, outcome: RunOutcome) -> ReconcileResult<Option<Run>> {
        let Some(mut run) = self.run() else {
            debug!("no active run to finalize");
            return Ok(None);
        };

        let status = outcome.status();
        let finished_at = Utc::now();

        if self.dry_run {
            info!(uid = %run.uid, %status, "dry run: not finalizing run");
            run.status = status;
            run.finished_at = Some(finished_at);
            return Ok(Some(self.set_run(run)));
        }
        if !run.status.can_advance_to(status) {
            warn!(uid = %run.uid, from = %run.status, to = %status, "run already closed");
            return Ok(Some(run));
        }
        let Some(client) = &self.client else {
            return Ok(Some(run));
        };

        let mut data = record([
            ("_status_code", json!(status.code())),
            ("finished_at", json!(finished_at)),
        ]);
        if let Some(report) = self.register_report(&run, status, finished_at) {
            data.insert("report_id".into(), json!(report.id));
        }

        let updated = client.update_run(&run.uid, &data)?;
        check_uid(&run.uid, &updated.uid);
        info!(uid = %updated.uid, %status, "run finalized");
        Ok(Some(self.set_run(updated)))
    }

    fn register_report(
        &self,
        run: &Run,
        status: RunStatus,
        finished_at: chrono::DateTime<Utc>,
    ) -> Option<Artifact> {
        let workflow = read(&self.workflow).clone().unwrap_or_default();
        let transform = self.transform()?;
        let path = match report::locate_or_write(&workflow, &transform, run, status, finished_at) {
            Ok(path) => path,
            Err(err) => {
                warn!(run = %run.uid, error = %err, "could not produce run report");
                return None;
            }
        };
        let _guard = self.lock_registration();
        self.register_locked(
            &path.display().to_string(),
            Some(run.id),
            Some("Run report"),
            Some(ArtifactKind::RUN_REPORT),
            Reuse::SameRun,
        )
    }

    // === Artifacts ===

    /// Register one file as an artifact.
    ///
    /// Local paths (no scheme, or `file://`) are uploaded; anything else is
    /// registered by reference. A path registered before is returned as is.
    /// Failures are logged and yield `None`.
    pub fn register_artifact(
        &self,
        path: &str,
        run_id: Option<i64>,
        description: Option<&str>,
        kind: Option<&str>,
    ) -> Option<Artifact> {
        let _guard = self.lock_registration();
        self.register_locked(path, run_id, description, kind, Reuse::AnyRun)
    }

    /// Classify a file the host published and register it if it is
    /// tracked, attaching the labels and projects it was given.
    pub fn track_published_file(&self, path: &str, direction: Direction) -> Option<Artifact> {
        let evaluation = self.classifier.evaluate(path, direction);
        if !evaluation.should_track {
            debug!(
                path,
                %direction,
                labels = ?evaluation.metadata.labels,
                "file not tracked"
            );
            return None;
        }
        let run = self.run();
        let run_id = match direction {
            Direction::Input => None,
            _ => run.as_ref().map(|r| r.id),
        };
        let metadata = evaluation.metadata;

        let _guard = self.lock_registration();
        let mut artifact =
            self.register_locked(path, run_id, None, metadata.kind.as_deref(), Reuse::AnyRun)?;

        let mut labels = artifact.labels.clone();
        let mut projects = artifact.projects.clone();
        extend_unique(&mut labels, &metadata.labels);
        extend_unique(&mut projects, &metadata.projects);

        if artifact.is_placeholder() {
            artifact.labels = labels;
            artifact.projects = projects;
            return Some(artifact);
        }

        let mut data = Record::new();
        if labels != artifact.labels {
            data.insert("labels".into(), json!(labels));
        }
        if projects != artifact.projects {
            data.insert("projects".into(), json!(projects));
        }
        if let (Direction::Input, Some(run)) = (direction, &run) {
            let mut consumers: Vec<i64> = artifact
                .extra
                .get("input_of_runs")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or_default();
            if !consumers.contains(&run.id) {
                consumers.push(run.id);
                data.insert("input_of_runs".into(), json!(consumers));
            }
        }
        if data.is_empty() {
            return Some(artifact);
        }

        let client = self.client.as_ref()?;
        match client.update_artifact(&artifact.uid, &data) {
            Ok(updated) => Some(updated),
            Err(err) => {
                warn!(uid = %artifact.uid, error = %err, "could not attach artifact metadata");
                Some(artifact)
            }
        }
    }

    fn lock_registration(&self) -> MutexGuard<'_, ()> {
        self.registration.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Caller holds the registration lock.
    fn register_locked(
        &self,
        path: &str,
        run_id: Option<i64>,
        description: Option<&str>,
        kind: Option<&str>,
        reuse: Reuse,
    ) -> Option<Artifact> {
        let location = ArtifactLocation::parse(path);
        let lookup = location.lookup_key();

        if self.dry_run {
            debug!(path, "dry run: not registering artifact");
            return Some(placeholder_artifact(&lookup, run_id, description, kind));
        }
        let Some(client) = &self.client else {
            warn!(path, "no instance configured, artifact not registered");
            return None;
        };

        match client.get_artifact_by_path(&lookup) {
            Ok(Some(existing)) if reuse == Reuse::SameRun && existing.run_id != run_id => {
                debug!(uid = %existing.uid, path, "path registered by another run, registering anew");
            }
            Ok(Some(existing)) => {
                info!(uid = %existing.uid, path, "detected existing artifact");
                return Some(existing);
            }
            Ok(None) => {}
            Err(err) => {
                error!(path, error = %err, "artifact lookup failed");
                return None;
            }
        }

        let new = NewArtifact {
            run_id,
            description: description.map(str::to_string),
            kind: kind.map(str::to_string),
        };
        let result = match &location {
            ArtifactLocation::Local(file) => client.upload_artifact(file, &new),
            ArtifactLocation::Remote(url) => client.create_artifact(url, &new),
        };
        match result {
            Ok(artifact) => {
                info!(uid = %artifact.uid, path, "registered artifact");
                Some(artifact)
            }
            Err(err) => {
                error!(path, error = %err, "artifact registration failed");
                None
            }
        }
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("dry_run", &self.dry_run)
            .field("transform", &self.transform().map(|t| t.uid))
            .field("run", &self.run().map(|r| r.uid))
            .finish_non_exhaustive()
    }
}

/// When a record already registered at the same path may stand in for a
/// new registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reuse {
    AnyRun,
    /// Only a record produced by the same run; run reports are per run
    SameRun,
}

/// Where a published file lives.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ArtifactLocation {
    Local(PathBuf),
    Remote(String),
}

impl ArtifactLocation {
    fn parse(path: &str) -> Self {
        match Url::parse(path) {
            Ok(url) if url.scheme() == "file" => match url.to_file_path() {
                Ok(file) => Self::Local(file),
                Err(()) => Self::Local(PathBuf::from(url.path())),
            },
            // Single letters are drive prefixes, not schemes
            Ok(url) if url.scheme().len() > 1 => Self::Remote(path.to_string()),
            _ => Self::Local(PathBuf::from(path)),
        }
    }

    /// The path string the service knows this artifact by.
    fn lookup_key(&self) -> String {
        match self {
            Self::Local(file) => file.display().to_string(),
            Self::Remote(url) => url.clone(),
        }
    }
}

// === Dry-run placeholders ===

fn placeholder_transform(workflow: &WorkflowMetadata, key: String, version: String) -> Transform {
    Transform {
        uid: sentinel_uid(16),
        id: DRY_RUN_ID,
        key,
        version: Some(version),
        source: workflow.source_descriptor(),
        extra: Record::new(),
    }
}

fn placeholder_run(transform: &Transform, workflow: &WorkflowMetadata) -> Run {
    Run {
        uid: sentinel_uid(20),
        id: DRY_RUN_ID,
        transform_id: transform.id,
        status: RunStatus::Scheduled,
        name: workflow.run_name.clone(),
        started_at: None,
        finished_at: None,
        report_id: None,
        reference: workflow.session_id.clone(),
        reference_type: workflow
            .session_id
            .as_ref()
            .map(|_| SESSION_REFERENCE_TYPE.to_string()),
        extra: Record::new(),
    }
}

fn placeholder_artifact(
    path: &str,
    run_id: Option<i64>,
    description: Option<&str>,
    kind: Option<&str>,
) -> Artifact {
    let file = Path::new(path);
    Artifact {
        uid: sentinel_uid(20),
        id: DRY_RUN_ID,
        run_id,
        key: file.file_name().map(|n| n.to_string_lossy().to_string()),
        path: Some(path.to_string()),
        kind: kind.map(str::to_string),
        description: description.map(str::to_string),
        storage_id: None,
        suffix: file
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default(),
        key_is_virtual: true,
        overwrite_versions: false,
        labels: Vec::new(),
        projects: Vec::new(),
        extra: Record::new(),
    }
}

// === Helpers ===

fn record<const N: usize>(fields: [(&str, Value); N]) -> Record {
    fields
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

fn check_uid(requested: &str, returned: &str) {
    if requested != returned {
        warn!(requested, returned, "service returned a different uid for an updated record");
    }
}

fn extend_unique(target: &mut Vec<String>, items: &[String]) {
    for item in items {
        if !target.contains(item) {
            target.push(item.clone());
        }
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{
        InstanceId, MemoryApi, RecordingSleeper, StaticToken, MODEL_RUN, MODEL_TRANSFORM,
        MODULE_CORE,
    };

    fn live() -> (Arc<MemoryApi>, Reconciler) {
        let api = Arc::new(MemoryApi::new());
        let client = MetadataClient::new(
            InstanceId::new("laminlabs", "lamindata"),
            api.clone(),
            Arc::new(StaticToken::new("t")),
        )
        .with_sleeper(Arc::new(RecordingSleeper::new()));
        (api, Reconciler::new(Some(Arc::new(client))))
    }

    fn workflow() -> WorkflowMetadata {
        WorkflowMetadata::new("main.nf")
            .with_repository("https://github.com/nf-core/scrnaseq")
            .with_revision("4.0.0")
    }

    #[test]
    fn local_and_remote_locations() {
        assert_eq!(
            ArtifactLocation::parse("/data/out.csv"),
            ArtifactLocation::Local(PathBuf::from("/data/out.csv"))
        );
        assert_eq!(
            ArtifactLocation::parse("file:///data/out.csv"),
            ArtifactLocation::Local(PathBuf::from("/data/out.csv"))
        );
        assert_eq!(
            ArtifactLocation::parse("results/out.csv"),
            ArtifactLocation::Local(PathBuf::from("results/out.csv"))
        );
        assert_eq!(
            ArtifactLocation::parse("s3://bucket/out.csv"),
            ArtifactLocation::Remote("s3://bucket/out.csv".to_string())
        );
    }

    #[test]
    fn creates_transform_then_reuses_it() {
        let (api, reconciler) = live();
        let first = reconciler.reconcile_transform(&workflow()).unwrap();
        assert_eq!(first.key, "github.com/nf-core/scrnaseq/main.nf");
        assert_eq!(first.version.as_deref(), Some("4.0.0"));
        assert_eq!(first.source.reference_type.as_deref(), Some("branch"));

        let creates = api.creates();
        let second = reconciler.reconcile_transform(&workflow()).unwrap();
        assert_eq!(first.uid, second.uid);
        assert_eq!(api.creates(), creates);
    }

    #[test]
    fn duplicate_identities_resolve_to_the_oldest() {
        let (api, reconciler) = live();
        let seeded = |uid: &str| {
            api.insert(
                MODULE_CORE,
                MODEL_TRANSFORM,
                record([
                    ("uid", json!(uid)),
                    ("key", json!("github.com/nf-core/scrnaseq/main.nf")),
                    ("version", json!("4.0.0")),
                ]),
            )
        };
        seeded("Tr4nsf0rmOld0000");
        seeded("Tr4nsf0rmNew0000");

        let transform = reconciler.reconcile_transform(&workflow()).unwrap();
        assert_eq!(transform.uid, "Tr4nsf0rmOld0000");
    }

    #[test]
    fn run_requires_a_transform() {
        let (_, reconciler) = live();
        assert!(matches!(reconciler.reconcile_run(), Err(ReconcileError::MissingTransform)));
    }

    #[test]
    fn session_reuses_its_scheduled_run() {
        let (api, reconciler) = live();
        let meta = workflow().with_session("session-1");
        reconciler.reconcile_transform(&meta).unwrap();
        let first = reconciler.reconcile_run().unwrap();
        assert_eq!(first.reference.as_deref(), Some("session-1"));

        let second = reconciler.reconcile_run().unwrap();
        assert_eq!(first.uid, second.uid);
        assert_eq!(api.records(MODULE_CORE, MODEL_RUN).len(), 1);
    }

    #[test]
    fn run_advances_through_its_lifecycle() {
        let (_, reconciler) = live();
        let dir = tempfile::tempdir().unwrap();
        reconciler
            .reconcile_transform(&workflow().with_work_dir(dir.path()))
            .unwrap();
        let run = reconciler.reconcile_run().unwrap();
        assert_eq!(run.status, RunStatus::Scheduled);

        let started = reconciler.start_run().unwrap().unwrap();
        assert_eq!(started.status, RunStatus::Started);
        assert!(started.started_at.is_some());

        let finished = reconciler.finalize_run(RunOutcome::Cancelled).unwrap().unwrap();
        assert_eq!(finished.status, RunStatus::Aborted);
        assert!(finished.finished_at.is_some());
        assert!(finished.report_id.is_some());

        assert!(reconciler.finalize_run(RunOutcome::Success).unwrap().is_none());
        assert_eq!(reconciler.run().unwrap().status, RunStatus::Aborted);
    }

    #[test]
    fn concurrent_finalization_closes_the_run_once() {
        let api = Arc::new(MemoryApi::new().with_latency(std::time::Duration::from_millis(10)));
        let client = MetadataClient::new(
            InstanceId::new("laminlabs", "lamindata"),
            api.clone(),
            Arc::new(StaticToken::new("t")),
        )
        .with_sleeper(Arc::new(RecordingSleeper::new()));
        let reconciler = Arc::new(Reconciler::new(Some(Arc::new(client))));
        reconciler
            .reconcile_transform(&workflow().with_work_dir("/nonexistent/work/dir"))
            .unwrap();
        reconciler.reconcile_run().unwrap();
        let updates = api.updates();

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let reconciler = reconciler.clone();
                std::thread::spawn(move || reconciler.finalize_run(RunOutcome::Success).unwrap())
            })
            .collect();
        let closed = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .count();

        assert_eq!(closed, 1);
        assert_eq!(api.updates(), updates + 1);
    }

    #[test]
    fn failed_finalization_can_be_retried() {
        let (api, reconciler) = live();
        reconciler
            .reconcile_transform(&workflow().with_work_dir("/nonexistent/work/dir"))
            .unwrap();
        reconciler.reconcile_run().unwrap();

        api.fail_next(crate::client::ApiError::NotFound("run".into()));
        assert!(reconciler.finalize_run(RunOutcome::Success).is_err());

        let run = reconciler.finalize_run(RunOutcome::Success).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
    }

    #[test]
    fn remote_paths_are_registered_by_reference() {
        let (api, reconciler) = live();
        let artifact = reconciler
            .register_artifact("s3://bucket/results/counts.csv", Some(3), None, None)
            .unwrap();
        assert_eq!(artifact.key.as_deref(), Some("results/counts.csv"));
        assert_eq!(artifact.run_id, Some(3));
        assert_eq!(api.uploads(), 0);

        let again = reconciler
            .register_artifact("s3://bucket/results/counts.csv", Some(3), None, None)
            .unwrap();
        assert_eq!(again.uid, artifact.uid);
        assert_eq!(api.creates(), 1);
    }

    #[test]
    fn missing_local_file_yields_none() {
        let (_, reconciler) = live();
        assert!(reconciler
            .register_artifact("/nonexistent/output.txt", None, None, None)
            .is_none());
    }

    #[test]
    fn without_instance_nothing_is_registered() {
        let reconciler = Reconciler::new(None);
        assert!(reconciler.register_artifact("s3://bucket/x", None, None, None).is_none());
        assert!(matches!(
            reconciler.reconcile_transform(&workflow()),
            Err(ReconcileError::NoInstance)
        ));
    }
}
