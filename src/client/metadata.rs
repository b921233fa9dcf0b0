//! MetadataClient: the resilient wrapper every remote state change goes through

use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use super::api::{ApiResult, LaminApi, NewArtifact, NewTransform, RecordQuery};
use super::instance::InstanceId;
use super::retry::{RetryPolicy, Sleeper, ThreadSleeper};
use super::token::TokenProvider;
use crate::model::{from_record, Artifact, Record, Run, StorageLocation, Transform};

pub const MODULE_CORE: &str = "core";
pub const MODEL_TRANSFORM: &str = "transform";
pub const MODEL_RUN: &str = "run";
pub const MODEL_ARTIFACT: &str = "artifact";
pub const MODEL_STORAGE: &str = "storage";

/// Retrying, token-renewing client for one remote instance.
///
/// Each call gets one immediate token renewal on an authentication failure
/// and up to `max_retries` delayed retries on any other retryable failure.
/// The two budgets are independent: a generic retry re-arms the renewal.
pub struct MetadataClient {
    instance: InstanceId,
    api: Arc<dyn LaminApi>,
    tokens: Arc<dyn TokenProvider>,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl MetadataClient {
    pub fn new(
        instance: InstanceId,
        api: Arc<dyn LaminApi>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            instance,
            api,
            tokens,
            policy: RetryPolicy::default(),
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn instance(&self) -> &InstanceId {
        &self.instance
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run one remote operation under the renewal and retry policy.
    pub fn call<T>(
        &self,
        operation: &str,
        f: impl Fn(&dyn LaminApi, &str) -> ApiResult<T>,
    ) -> ApiResult<T> {
        let mut attempt: u32 = 0;
        let mut renewed = false;

        loop {
            let token = self.tokens.current_token()?;
            let err = match f(self.api.as_ref(), &token) {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if err.is_auth() && !renewed {
                warn!(instance = %self.instance, operation, "authentication failed, renewing token");
                renewed = true;
                self.tokens.refresh_token()?;
                continue;
            }

            if err.is_retryable() && attempt < self.policy.max_retries {
                attempt += 1;
                warn!(
                    instance = %self.instance,
                    operation,
                    attempt,
                    max_retries = self.policy.max_retries,
                    error = %err,
                    "remote call failed, retrying"
                );
                self.sleeper.sleep(self.policy.delay);
                renewed = false;
                continue;
            }

            debug!(instance = %self.instance, operation, attempt, error = %err, "giving up");
            return Err(err);
        }
    }

    // === Generic records ===

    pub fn get_record(&self, module: &str, model: &str, id_or_uid: &str) -> ApiResult<Option<Record>> {
        self.call("get_record", |api, token| {
            api.get_record(token, module, model, id_or_uid)
        })
    }

    pub fn get_records(&self, module: &str, model: &str, query: &RecordQuery) -> ApiResult<Vec<Record>> {
        self.call("get_records", |api, token| {
            api.get_records(token, module, model, query)
        })
    }

    pub fn create_record(&self, module: &str, model: &str, data: &Record) -> ApiResult<Record> {
        self.call("create_record", |api, token| {
            api.create_record(token, module, model, data)
        })
    }

    pub fn update_record(&self, module: &str, model: &str, uid: &str, data: &Record) -> ApiResult<Record> {
        self.call("update_record", |api, token| {
            api.update_record(token, module, model, uid, data)
        })
    }

    // === Transforms ===

    pub fn get_transform(&self, id_or_uid: &str) -> ApiResult<Option<Transform>> {
        decode_optional(self.get_record(MODULE_CORE, MODEL_TRANSFORM, id_or_uid)?)
    }

    /// All transforms with the given identity, oldest first.
    pub fn find_transforms(&self, key: &str, version: &str) -> ApiResult<Vec<Transform>> {
        let query = RecordQuery::new()
            .with_eq("key", key)
            .with_eq("version", version)
            .with_order_by("id");
        decode_all(self.get_records(MODULE_CORE, MODEL_TRANSFORM, &query)?)
    }

    pub fn create_transform(&self, transform: &NewTransform) -> ApiResult<Transform> {
        let record = self.call("create_transform", |api, token| {
            api.create_transform(token, transform)
        })?;
        Ok(from_record(record)?)
    }

    // === Runs ===

    pub fn get_run(&self, id_or_uid: &str) -> ApiResult<Option<Run>> {
        decode_optional(self.get_record(MODULE_CORE, MODEL_RUN, id_or_uid)?)
    }

    pub fn find_runs(&self, query: &RecordQuery) -> ApiResult<Vec<Run>> {
        decode_all(self.get_records(MODULE_CORE, MODEL_RUN, query)?)
    }

    pub fn create_run(&self, data: &Record) -> ApiResult<Run> {
        Ok(from_record(self.create_record(MODULE_CORE, MODEL_RUN, data)?)?)
    }

    pub fn update_run(&self, uid: &str, data: &Record) -> ApiResult<Run> {
        Ok(from_record(self.update_record(MODULE_CORE, MODEL_RUN, uid, data)?)?)
    }

    // === Artifacts ===

    pub fn get_artifact(&self, id_or_uid: &str) -> ApiResult<Option<Artifact>> {
        decode_optional(self.get_record(MODULE_CORE, MODEL_ARTIFACT, id_or_uid)?)
    }

    pub fn get_artifact_by_path(&self, path: &str) -> ApiResult<Option<Artifact>> {
        let record = self.call("get_artifact_by_path", |api, token| {
            api.get_artifact_by_path(token, path)
        })?;
        decode_optional(record)
    }

    /// Register a remote object by reference.
    pub fn create_artifact(&self, path: &str, artifact: &NewArtifact) -> ApiResult<Artifact> {
        let record = self.call("create_artifact", |api, token| {
            api.create_artifact(token, path, artifact)
        })?;
        Ok(from_record(record)?)
    }

    /// Upload a local file and register it.
    pub fn upload_artifact(&self, file: &Path, artifact: &NewArtifact) -> ApiResult<Artifact> {
        let record = self.call("upload_artifact", |api, token| {
            api.upload_artifact(token, file, artifact)
        })?;
        Ok(from_record(record)?)
    }

    pub fn update_artifact(&self, uid: &str, data: &Record) -> ApiResult<Artifact> {
        Ok(from_record(self.update_record(MODULE_CORE, MODEL_ARTIFACT, uid, data)?)?)
    }

    // === Storage ===

    pub fn get_storage(&self, id_or_uid: &str) -> ApiResult<Option<StorageLocation>> {
        decode_optional(self.get_record(MODULE_CORE, MODEL_STORAGE, id_or_uid)?)
    }
}

impl std::fmt::Debug for MetadataClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataClient")
            .field("instance", &self.instance)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

fn decode_optional<T: serde::de::DeserializeOwned>(record: Option<Record>) -> ApiResult<Option<T>> {
    match record {
        Some(record) => Ok(Some(from_record(record)?)),
        None => Ok(None),
    }
}

fn decode_all<T: serde::de::DeserializeOwned>(records: Vec<Record>) -> ApiResult<Vec<T>> {
    records
        .into_iter()
        .map(|r| from_record(r).map_err(Into::into))
        .collect()
}
