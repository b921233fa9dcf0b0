//! The remote metadata service as a capability trait
//!
//! Transport is out of scope: anything that can answer these calls with
//! JSON maps (REST client, in-process fake) implements `LaminApi`. Every
//! call takes the bearer token explicitly so the resilient wrapper owns
//! token lifetime.

use std::path::Path;
use thiserror::Error;

use crate::model::Record;

/// Errors reported by a `LaminApi` implementation.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    /// True for failures a token renewal may fix.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    /// True for failures worth another attempt after a delay.
    ///
    /// Not-found and conflict answers are definitive and never retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::NotFound(_)) && !self.is_conflict()
    }

    /// True if the service refused a create because the record exists.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Rejected { status: 409, .. })
    }
}

/// Result type for remote calls
pub type ApiResult<T> = Result<T, ApiError>;

/// Filter, ordering and paging for `get_records`.
#[derive(Debug, Clone, Default)]
pub struct RecordQuery {
    /// Field equality constraints
    pub filter: Record,
    /// Field to order by; a leading `-` sorts descending
    pub order_by: Option<String>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl RecordQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_eq(mut self, field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.filter.insert(field.into(), value.into());
        self
    }

    pub fn with_order_by(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some(field.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
}

/// Fields for `create_transform`.
#[derive(Debug, Clone, Default)]
pub struct NewTransform {
    pub key: String,
    pub version: String,
    pub kind: String,
    pub source_code: Option<String>,
    pub reference: Option<String>,
    pub reference_type: Option<String>,
    pub description: Option<String>,
}

/// Fields for `create_artifact` / `upload_artifact`.
#[derive(Debug, Clone, Default)]
pub struct NewArtifact {
    pub run_id: Option<i64>,
    pub description: Option<String>,
    pub kind: Option<String>,
}

/// Capability surface of one remote metadata instance.
///
/// Implementations must be thread-safe: publish events arrive from a pool
/// of worker threads.
pub trait LaminApi: Send + Sync {
    /// Fetch one record by numeric id or uid. `Ok(None)` when absent.
    fn get_record(
        &self,
        token: &str,
        module: &str,
        model: &str,
        id_or_uid: &str,
    ) -> ApiResult<Option<Record>>;

    /// Fetch an ordered page of records matching `query`.
    fn get_records(
        &self,
        token: &str,
        module: &str,
        model: &str,
        query: &RecordQuery,
    ) -> ApiResult<Vec<Record>>;

    fn create_record(&self, token: &str, module: &str, model: &str, data: &Record)
        -> ApiResult<Record>;

    fn update_record(
        &self,
        token: &str,
        module: &str,
        model: &str,
        uid: &str,
        data: &Record,
    ) -> ApiResult<Record>;

    fn create_transform(&self, token: &str, transform: &NewTransform) -> ApiResult<Record>;

    /// Register an artifact by reference; no content is transferred.
    fn create_artifact(&self, token: &str, path: &str, artifact: &NewArtifact) -> ApiResult<Record>;

    /// Upload a local file's content and register it.
    fn upload_artifact(&self, token: &str, file: &Path, artifact: &NewArtifact) -> ApiResult<Record>;

    fn get_artifact_by_path(&self, token: &str, path: &str) -> ApiResult<Option<Record>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_not_retryable() {
        assert!(!ApiError::NotFound("x".into()).is_retryable());
        assert!(ApiError::Transient("x".into()).is_retryable());
        assert!(ApiError::Auth("x".into()).is_retryable());
    }

    #[test]
    fn conflict_is_a_409_rejection() {
        let err = ApiError::Rejected { status: 409, message: "exists".into() };
        assert!(err.is_conflict());
        assert!(!err.is_retryable());
        let err = ApiError::Rejected { status: 400, message: "bad".into() };
        assert!(!err.is_conflict());
    }

    #[test]
    fn query_builder_collects_constraints() {
        let query = RecordQuery::new()
            .with_eq("key", "pipeline/main.nf")
            .with_eq("version", "1.0")
            .with_order_by("-id")
            .with_limit(10);
        assert_eq!(query.filter.len(), 2);
        assert_eq!(query.order_by.as_deref(), Some("-id"));
        assert_eq!(query.limit, Some(10));
        assert_eq!(query.offset, 0);
    }
}
