//! Storage location records

use serde::{Deserialize, Serialize};

use super::record::Record;

/// A storage root (bucket, local directory) artifacts live under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageLocation {
    pub uid: String,
    pub id: i64,
    pub root: String,
    #[serde(flatten)]
    pub extra: Record,
}

impl StorageLocation {
    /// Join a storage key onto this root.
    pub fn url_for(&self, key: &str) -> String {
        format!(
            "{}/{}",
            self.root.trim_end_matches('/'),
            key.trim_start_matches('/')
        )
    }
}
