//! Conversion between wire maps and typed records

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

/// A loosely-structured record as returned by the metadata service.
pub type Record = Map<String, Value>;

/// Numeric id carried by every record fabricated in dry-run mode.
pub const DRY_RUN_ID: i64 = -1;

/// Prefix of every uid fabricated in dry-run mode.
pub const DRY_RUN_UID_PREFIX: &str = "dryrun";

/// Decode a wire record into a typed struct.
///
/// Fields the struct does not name land in its flattened `extra` map.
pub fn from_record<T: DeserializeOwned>(record: Record) -> Result<T, serde_json::Error> {
    serde_json::from_value(Value::Object(record))
}

/// Encode a typed struct back into a wire record.
pub fn to_record<T: Serialize>(value: &T) -> Result<Record, serde_json::Error> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(serde::ser::Error::custom(format!(
            "expected a JSON object, got {}",
            other
        ))),
    }
}

/// Build a dry-run uid of exactly `len` characters.
pub(crate) fn sentinel_uid(len: usize) -> String {
    let mut uid = String::with_capacity(len);
    uid.push_str(DRY_RUN_UID_PREFIX);
    while uid.len() < len {
        uid.push('0');
    }
    uid.truncate(len);
    uid
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_uid_has_requested_length() {
        assert_eq!(sentinel_uid(16), "dryrun0000000000");
        assert_eq!(sentinel_uid(20).len(), 20);
        assert!(sentinel_uid(4).starts_with("dryr"));
    }

    #[test]
    fn to_record_rejects_non_objects() {
        assert!(to_record(&42).is_err());
    }
}
