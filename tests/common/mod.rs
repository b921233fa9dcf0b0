//! Shared fixtures for integration tests
//!
//! A `Harness` wires a `Reconciler` to an in-memory instance with a
//! recording sleeper, so remote effects can be counted and retries cost no
//! wall-clock time.

#![allow(dead_code)]

use lamin_provenance::client::{MemoryApi, RecordingSleeper, RetryPolicy, StaticToken};
use lamin_provenance::config::ManualOverrides;
use lamin_provenance::{
    ArtifactClassifier, InstanceId, LaminConfig, MetadataClient, Reconciler, WorkflowMetadata,
};
use std::sync::Arc;
use std::time::Duration;

pub struct Harness {
    pub api: Arc<MemoryApi>,
    pub sleeper: Arc<RecordingSleeper>,
    pub client: Arc<MetadataClient>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_api(MemoryApi::new())
    }

    pub fn with_api(api: MemoryApi) -> Self {
        let api = Arc::new(api);
        let sleeper = Arc::new(RecordingSleeper::new());
        let client = MetadataClient::new(instance(), api.clone(), Arc::new(StaticToken::new("token")))
            .with_retry_policy(RetryPolicy::new(3, Duration::from_millis(10)))
            .with_sleeper(sleeper.clone());
        Self {
            api,
            sleeper,
            client: Arc::new(client),
        }
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(Some(self.client.clone()))
    }

    pub fn dry_run_reconciler(&self) -> Reconciler {
        self.reconciler().with_dry_run(true)
    }

    pub fn manual_reconciler(&self, transform_uid: Option<&str>, run_uid: Option<&str>) -> Reconciler {
        self.reconciler().with_manual_overrides(ManualOverrides {
            transform_uid: transform_uid.map(str::to_string),
            run_uid: run_uid.map(str::to_string),
        })
    }
}

pub fn instance() -> InstanceId {
    InstanceId::new("laminlabs", "lamindata")
}

pub fn workflow() -> WorkflowMetadata {
    WorkflowMetadata::new("main.nf")
        .with_repository("https://github.com/nf-core/scrnaseq.git")
        .with_revision("4.0.0")
        .with_commit("0f3e1a2b3c4d5e6f708192a3b4c5d6e7f8091a2b")
}

/// Build a classifier from the `artifacts` block of a YAML document.
pub fn classifier(artifacts_yaml: &str) -> ArtifactClassifier {
    let config: LaminConfig = serde_yaml::from_str(artifacts_yaml).unwrap();
    ArtifactClassifier::from_config(&config.artifacts).unwrap()
}
