//! Run: one execution of a transform

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::Record;

/// Lifecycle state of a run.
///
/// Serialized as the service's integer status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum RunStatus {
    Scheduled,
    /// Decoded for completeness; never produced here
    Restarted,
    Started,
    Completed,
    Errored,
    Aborted,
}

impl RunStatus {
    pub fn code(&self) -> i64 {
        match self {
            Self::Scheduled => -3,
            Self::Restarted => -2,
            Self::Started => -1,
            Self::Completed => 0,
            Self::Errored => 1,
            Self::Aborted => 2,
        }
    }

    /// True once the run has reached an end state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Errored | Self::Aborted)
    }

    /// Whether `next` is a legal successor of `self`.
    ///
    /// Scheduled → Started → {Completed, Errored, Aborted}. A run that never
    /// reached Started may still be closed out directly.
    pub fn can_advance_to(&self, next: RunStatus) -> bool {
        match (self, next) {
            (Self::Scheduled | Self::Restarted, Self::Started) => true,
            (Self::Scheduled | Self::Restarted | Self::Started, n) => n.is_terminal(),
            _ => false,
        }
    }
}

impl TryFrom<i64> for RunStatus {
    type Error = String;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            -3 => Ok(Self::Scheduled),
            -2 => Ok(Self::Restarted),
            -1 => Ok(Self::Started),
            0 => Ok(Self::Completed),
            1 => Ok(Self::Errored),
            2 => Ok(Self::Aborted),
            other => Err(format!("unknown run status code: {}", other)),
        }
    }
}

impl From<RunStatus> for i64 {
    fn from(status: RunStatus) -> Self {
        status.code()
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Scheduled => "SCHEDULED",
            Self::Restarted => "RESTARTED",
            Self::Started => "STARTED",
            Self::Completed => "COMPLETED",
            Self::Errored => "ERRORED",
            Self::Aborted => "ABORTED",
        };
        f.write_str(name)
    }
}

/// One execution of a transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub uid: String,
    pub id: i64,
    pub transform_id: i64,
    #[serde(rename = "_status_code")]
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_type: Option<String>,
    #[serde(flatten)]
    pub extra: Record,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_advances_only_forward() {
        use RunStatus::*;
        assert!(Scheduled.can_advance_to(Started));
        assert!(Started.can_advance_to(Completed));
        assert!(Started.can_advance_to(Aborted));
        assert!(Scheduled.can_advance_to(Errored));
        assert!(!Started.can_advance_to(Scheduled));
        assert!(!Completed.can_advance_to(Started));
        assert!(!Errored.can_advance_to(Completed));
    }

    #[test]
    fn status_uses_service_codes_on_the_wire() {
        let json = serde_json::to_value(RunStatus::Started).unwrap();
        assert_eq!(json, serde_json::json!(-1));
        let back: RunStatus = serde_json::from_value(serde_json::json!(2)).unwrap();
        assert_eq!(back, RunStatus::Aborted);
        assert!(serde_json::from_value::<RunStatus>(serde_json::json!(9)).is_err());
    }
}
