//! Remote instance identity

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::config::ConfigError;

/// Identity of one remote metadata instance: `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId {
    pub owner: String,
    pub name: String,
}

impl InstanceId {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl FromStr for InstanceId {
    type Err = ConfigError;

    /// Parse `owner/name`. Both parts must be non-empty and there must be
    /// exactly one separator.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidInstance(s.to_string());
        let (owner, name) = s.trim().split_once('/').ok_or_else(invalid)?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return Err(invalid());
        }
        Ok(Self::new(owner, name))
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_owner_and_name() {
        let id: InstanceId = "laminlabs/lamindata".parse().unwrap();
        assert_eq!(id, InstanceId::new("laminlabs", "lamindata"));
        assert_eq!(id.to_string(), "laminlabs/lamindata");
    }

    #[test]
    fn rejects_malformed_identities() {
        for bad in ["", "lamindata", "/lamindata", "laminlabs/", "a/b/c"] {
            assert!(bad.parse::<InstanceId>().is_err(), "accepted {:?}", bad);
        }
    }
}
