//! Resolution of `lamin://` virtual paths to storage URLs

use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use url::Url;

use super::key::artifact_storage_key;
use crate::client::{ApiError, InstanceClientCache, InstanceId};

/// URL scheme of virtual artifact paths.
pub const VIRTUAL_SCHEME: &str = "lamin";

/// Errors raised while resolving a virtual path
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("not a virtual artifact path: {0}")]
    InvalidPath(String),

    #[error("artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("artifact {0} has no storage location")]
    StorageNotFound(String),

    #[error("remote error: {0}")]
    Api(#[from] ApiError),
}

/// Result type for resolution
pub type ResolveResult<T> = Result<T, ResolveError>;

/// A parsed `lamin://owner/name/artifact/uid[/sub/path]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualPath {
    pub instance: InstanceId,
    pub uid: String,
    /// Path inside a folder artifact, without leading slash
    pub subpath: Option<String>,
}

impl VirtualPath {
    pub fn parse(path: &str) -> ResolveResult<Self> {
        let url = Url::parse(path)?;
        if url.scheme() != VIRTUAL_SCHEME {
            return Err(ResolveError::InvalidPath(path.to_string()));
        }
        let owner = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ResolveError::InvalidPath(path.to_string()))?;
        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();

        match segments.as_slice() {
            [name, "artifact", uid, rest @ ..] => Ok(Self {
                instance: InstanceId::new(owner, *name),
                uid: uid.to_string(),
                subpath: (!rest.is_empty()).then(|| rest.join("/")),
            }),
            _ => Err(ResolveError::InvalidPath(path.to_string())),
        }
    }
}

/// Turns virtual artifact paths into concrete storage URLs.
///
/// Each instance is reached through the shared client cache, so repeated
/// lookups against the same instance connect only once.
pub struct ArtifactPathResolver {
    clients: Arc<InstanceClientCache>,
}

impl ArtifactPathResolver {
    pub fn new(clients: Arc<InstanceClientCache>) -> Self {
        Self { clients }
    }

    pub fn is_virtual(path: &str) -> bool {
        path.starts_with("lamin://")
    }

    /// Resolve `path` to `<storage root>/<storage key>[/<sub path>]`.
    pub fn resolve(&self, path: &str) -> ResolveResult<String> {
        let target = VirtualPath::parse(path)?;
        let client = self.clients.get_or_connect(&target.instance)?;

        let artifact = client
            .get_artifact(&target.uid)?
            .ok_or_else(|| ResolveError::ArtifactNotFound(target.uid.clone()))?;
        let storage_id = artifact
            .storage_id
            .ok_or_else(|| ResolveError::StorageNotFound(artifact.uid.clone()))?;
        let storage = client
            .get_storage(&storage_id.to_string())?
            .ok_or_else(|| ResolveError::StorageNotFound(artifact.uid.clone()))?;

        let mut url = storage.url_for(&artifact_storage_key(&artifact, None));
        if let Some(sub) = &target.subpath {
            url.push('/');
            url.push_str(sub);
        }
        debug!(path, url = %url, "resolved virtual path");
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_instance_uid_and_subpath() {
        let parsed =
            VirtualPath::parse("lamin://laminlabs/lamindata/artifact/abcd1234abcd12340000/raw/a.fq")
                .unwrap();
        assert_eq!(parsed.instance, InstanceId::new("laminlabs", "lamindata"));
        assert_eq!(parsed.uid, "abcd1234abcd12340000");
        assert_eq!(parsed.subpath.as_deref(), Some("raw/a.fq"));
    }

    #[test]
    fn subpath_is_optional() {
        let parsed = VirtualPath::parse("lamin://laminlabs/lamindata/artifact/abc/").unwrap();
        assert_eq!(parsed.subpath, None);
    }

    #[test]
    fn rejects_other_shapes() {
        assert!(VirtualPath::parse("s3://bucket/key").is_err());
        assert!(VirtualPath::parse("lamin://laminlabs/lamindata/run/abc").is_err());
        assert!(VirtualPath::parse("lamin://laminlabs/lamindata").is_err());
        assert!(VirtualPath::parse("not a url").is_err());
    }
}
