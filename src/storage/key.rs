//! Storage key derivation

use crate::model::Artifact;

/// Directory under a storage root that holds uid-addressed objects.
pub const VIRTUAL_PREFIX: &str = ".lamindb/";

/// Length of a uid without its version suffix.
pub const UID_BASE_LEN: usize = 16;

/// Key of an object stored under its uid.
///
/// Artifacts that overwrite their versions in place are stored under the
/// version-less first 16 characters of the uid, so every version lands on
/// the same key.
pub fn auto_storage_key(uid: &str, suffix: &str, overwrite_versions: bool) -> String {
    let stem = if overwrite_versions {
        uid.get(..UID_BASE_LEN).unwrap_or(uid)
    } else {
        uid
    };
    format!("{}{}{}", VIRTUAL_PREFIX, stem, suffix)
}

/// Where an artifact's content lives relative to its storage root.
///
/// An explicit `override_key` always wins. Otherwise a real (non-virtual)
/// key is used as stored, and a missing or virtual key is derived from the
/// uid.
pub fn artifact_storage_key(artifact: &Artifact, override_key: Option<&str>) -> String {
    if let Some(key) = override_key {
        return key.to_string();
    }
    match artifact.key.as_deref() {
        Some(key) if !artifact.key_is_virtual => key.to_string(),
        _ => auto_storage_key(&artifact.uid, &artifact.suffix, artifact.overwrite_versions),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Record;

    fn artifact(uid: &str, key: Option<&str>, key_is_virtual: bool) -> Artifact {
        Artifact {
            uid: uid.to_string(),
            id: 1,
            run_id: None,
            key: key.map(str::to_string),
            path: None,
            kind: None,
            description: None,
            storage_id: Some(1),
            suffix: ".txt".to_string(),
            key_is_virtual,
            overwrite_versions: false,
            labels: Vec::new(),
            projects: Vec::new(),
            extra: Record::new(),
        }
    }

    #[test]
    fn sixteen_char_uid_is_used_whole() {
        assert_eq!(
            auto_storage_key("abcd1234abcd1234", ".txt", false),
            ".lamindb/abcd1234abcd1234.txt"
        );
    }

    #[test]
    fn versioned_uid_keeps_all_characters() {
        let uid = "abcd1234abcd12340001";
        assert_eq!(
            auto_storage_key(uid, ".csv", false),
            ".lamindb/abcd1234abcd12340001.csv"
        );
    }

    #[test]
    fn overwriting_versions_truncates_to_base_uid() {
        assert_eq!(
            auto_storage_key("abcd1234abcd12340001", "", true),
            ".lamindb/abcd1234abcd1234"
        );
        assert_eq!(auto_storage_key("short", ".txt", true), ".lamindb/short.txt");
    }

    #[test]
    fn real_key_is_used_verbatim() {
        let a = artifact("abcd1234abcd12340001", Some("results/counts.txt"), false);
        assert_eq!(artifact_storage_key(&a, None), "results/counts.txt");
    }

    #[test]
    fn virtual_or_missing_key_is_derived() {
        let a = artifact("abcd1234abcd12340001", Some("counts.txt"), true);
        assert_eq!(artifact_storage_key(&a, None), ".lamindb/abcd1234abcd12340001.txt");

        let b = artifact("abcd1234abcd12340001", None, false);
        assert_eq!(artifact_storage_key(&b, None), ".lamindb/abcd1234abcd12340001.txt");
    }

    #[test]
    fn override_key_wins() {
        let a = artifact("abcd1234abcd12340001", Some("counts.txt"), true);
        assert_eq!(artifact_storage_key(&a, Some("pinned/key.txt")), "pinned/key.txt");
    }
}
