//! Plugin configuration
//!
//! `LaminConfig` is the deserialized YAML document. `Settings` is the
//! validated, immutable form everything else consumes: instance identity
//! parsed, credentials checked, retry policy built and classification
//! patterns compiled. Anything wrong is reported here, at load time.

mod artifacts;

pub use artifacts::{ArtifactSection, ArtifactsConfig, RuleConfig};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::classify::ArtifactClassifier;
use crate::client::{InstanceId, RetryPolicy, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_MS};

/// Environment variable that overrides `api_key`.
pub const API_KEY_ENV: &str = "LAMIN_API_KEY";

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid instance identity '{0}': expected 'owner/name'")]
    InvalidInstance(String),

    #[error("no instance configured")]
    MissingInstance,

    #[error("no API key configured for instance {0}")]
    MissingCredentials(String),

    #[error("invalid pattern in {field}: {source}")]
    InvalidPattern {
        field: String,
        #[source]
        source: regex::Error,
    },

    #[error("conflicting artifact configuration: {0}")]
    ConflictingSections(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Remote call resilience settings
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub max_retries: u32,
    /// Delay between retries, in milliseconds
    pub retry_delay: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY_MS,
        }
    }
}

/// The configuration document as written by the user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LaminConfig {
    /// `owner/name` of the instance to record provenance in
    pub instance: Option<String>,
    pub api_key: Option<String>,
    pub dry_run: bool,
    /// Reuse this transform instead of reconciling one
    pub transform_uid: Option<String>,
    /// Reuse this run if it is still scheduled
    pub run_uid: Option<String>,
    pub api: ApiConfig,
    pub artifacts: ArtifactsConfig,
}

impl LaminConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    /// Apply overrides from the process environment.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                self.api_key = Some(key);
            }
        }
        self
    }

    /// Validate into runtime settings.
    pub fn validate(&self) -> Result<Settings, ConfigError> {
        let instance = match self.instance.as_deref().map(str::trim) {
            Some(s) if !s.is_empty() => Some(s.parse::<InstanceId>()?),
            _ if self.dry_run => None,
            _ => return Err(ConfigError::MissingInstance),
        };

        let api_key = self
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string);
        if let (Some(instance), None, false) = (&instance, &api_key, self.dry_run) {
            return Err(ConfigError::MissingCredentials(instance.to_string()));
        }

        Ok(Settings {
            instance,
            api_key,
            dry_run: self.dry_run,
            manual: ManualOverrides {
                transform_uid: non_empty(&self.transform_uid),
                run_uid: non_empty(&self.run_uid),
            },
            retry: RetryPolicy::new(
                self.api.max_retries,
                Duration::from_millis(self.api.retry_delay),
            ),
            classifier: ArtifactClassifier::from_config(&self.artifacts)?,
        })
    }
}

/// Manually supplied record identities
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManualOverrides {
    pub transform_uid: Option<String>,
    pub run_uid: Option<String>,
}

/// Validated configuration
#[derive(Debug, Clone)]
pub struct Settings {
    /// `None` only in dry-run mode
    pub instance: Option<InstanceId>,
    pub api_key: Option<String>,
    pub dry_run: bool,
    pub manual: ManualOverrides,
    pub retry: RetryPolicy,
    pub classifier: ArtifactClassifier,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
