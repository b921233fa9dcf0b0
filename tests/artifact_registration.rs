//! Artifact registration: classification, serialization and failure
//! handling.

mod common;

use common::{classifier, workflow, Harness};
use lamin_provenance::client::{MemoryApi, MODEL_ARTIFACT, MODULE_CORE};
use lamin_provenance::{ApiError, Direction, Reconciler};
use std::sync::Arc;
use std::time::Duration;

fn started(reconciler: Reconciler) -> Reconciler {
    reconciler.reconcile_transform(&workflow()).unwrap();
    reconciler.reconcile_run().unwrap();
    reconciler.start_run().unwrap();
    reconciler
}

#[test]
fn concurrent_registrations_never_overlap() {
    let h = Harness::with_api(MemoryApi::new().with_latency(Duration::from_millis(15)));
    let reconciler = Arc::new(h.reconciler());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let reconciler = reconciler.clone();
            std::thread::spawn(move || {
                reconciler.register_artifact(&format!("s3://bucket/results/part-{}.parquet", i), None, None, None)
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.join().unwrap().is_some());
    }

    assert_eq!(h.api.creates(), 8);
    assert_eq!(h.api.max_concurrent_mutations(), 1);
}

#[test]
fn same_path_published_twice_is_detected() {
    let h = Harness::new();
    let reconciler = started(h.reconciler());

    let first = reconciler
        .track_published_file("s3://bucket/results/counts.csv", Direction::Output)
        .unwrap();
    let second = reconciler
        .track_published_file("s3://bucket/results/counts.csv", Direction::Output)
        .unwrap();

    assert_eq!(first.uid, second.uid);
    assert_eq!(h.api.records(MODULE_CORE, MODEL_ARTIFACT).len(), 1);
}

#[test]
fn local_files_are_uploaded() {
    let h = Harness::new();
    let reconciler = started(h.reconciler());
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("matrix.h5ad");
    std::fs::write(&file, b"\x89HDF").unwrap();

    let artifact = reconciler
        .track_published_file(&file.display().to_string(), Direction::Output)
        .unwrap();

    assert_eq!(h.api.uploads(), 1);
    assert_eq!(artifact.suffix, ".h5ad");
    assert_eq!(artifact.run_id, reconciler.run().map(|r| r.id));
}

#[test]
fn excluded_files_are_not_registered() {
    let h = Harness::new();
    let reconciler = started(
        h.reconciler()
            .with_classifier(classifier("artifacts:\n  exclude_pattern: '\\.log$'\n")),
    );
    let mutations = h.api.mutations();

    assert!(reconciler
        .track_published_file("s3://bucket/pipeline.log", Direction::Output)
        .is_none());
    assert_eq!(h.api.mutations(), mutations);
}

#[test]
fn classification_metadata_is_attached() {
    let h = Harness::new();
    let yaml = r#"
artifacts:
  labels: [scrnaseq]
  output:
    projects: [atlas]
    rules:
      matrices:
        pattern: '\.h5ad$'
        kind: dataset
        labels: [matrix]
"#;
    let reconciler = started(h.reconciler().with_classifier(classifier(yaml)));

    let artifact = reconciler
        .track_published_file("s3://bucket/results/adata.h5ad", Direction::Output)
        .unwrap();

    assert_eq!(artifact.labels, vec!["scrnaseq".to_string(), "matrix".to_string()]);
    assert_eq!(artifact.projects, vec!["atlas".to_string()]);
    assert_eq!(artifact.kind.as_deref(), Some("dataset"));
}

#[test]
fn inputs_are_linked_to_the_consuming_run() {
    let h = Harness::new();
    let reconciler = started(h.reconciler());
    let run_id = reconciler.run().unwrap().id;

    let artifact = reconciler
        .track_published_file("s3://refs/genome.fa", Direction::Input)
        .unwrap();

    assert_eq!(artifact.run_id, None);
    assert_eq!(artifact.extra["input_of_runs"], serde_json::json!([run_id]));
}

#[test]
fn transient_failures_are_retried() {
    let h = Harness::new();
    let reconciler = h.reconciler();
    h.api.fail_next(ApiError::Transient("502".into()));
    h.api.fail_next(ApiError::Transient("503".into()));

    let artifact = reconciler.register_artifact("s3://bucket/a.txt", None, None, None);

    assert!(artifact.is_some());
    assert_eq!(h.sleeper.sleeps().len(), 2);
    assert_eq!(h.api.creates(), 1);
}

#[test]
fn persistent_failure_yields_none_and_run_continues() {
    let h = Harness::new();
    let reconciler = started(h.reconciler());
    for _ in 0..4 {
        h.api.fail_next(ApiError::Transient("503".into()));
    }

    assert!(reconciler
        .track_published_file("s3://bucket/lost.txt", Direction::Output)
        .is_none());
    assert!(reconciler
        .track_published_file("s3://bucket/kept.txt", Direction::Output)
        .is_some());
}
