//! Workload event kinds and the status each one leads to.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::EventError;

// =============================================================================
// Event Kind Constants
// =============================================================================

/// Event kind names as stored in the event log.
pub mod event_kinds {
    pub const CREATED: &str = "created";
    pub const STARTING: &str = "starting";
    pub const VM_RESTARTED: &str = "vmRestarted";
    pub const FORCED_RESTART: &str = "forcedRestart";
    pub const AWAITING_CERT: &str = "awaitingCert";
    pub const RUNNING: &str = "running";
    pub const STOPPED: &str = "stopped";
    pub const FAILED_TO_START: &str = "failedToStart";
    pub const WARNING: &str = "warning";
}

// =============================================================================
// Workload Status
// =============================================================================

/// Coarse workload status derived from the event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkloadStatus {
    Scheduled,
    Starting,
    AwaitingCert,
    Running,
    Stopped,
    Error,
}

impl WorkloadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Starting => "starting",
            Self::AwaitingCert => "awaitingCert",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }

    /// Whether a workload in this status still claims node capacity and burns credits.
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Stopped)
    }
}

impl fmt::Display for WorkloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkloadStatus {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(Self::Scheduled),
            "starting" => Ok(Self::Starting),
            "awaitingCert" => Ok(Self::AwaitingCert),
            "running" => Ok(Self::Running),
            "stopped" => Ok(Self::Stopped),
            "error" => Ok(Self::Error),
            other => Err(EventError::UnknownStatus(other.to_string())),
        }
    }
}

// =============================================================================
// Event Kinds
// =============================================================================

/// A lifecycle event reported for a workload.
///
/// On the wire this is internally tagged by `kind`:
/// `{"kind": "failedToStart", "error": "image pull failed"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum WorkloadEventKind {
    Created,
    Starting,
    VmRestarted,
    ForcedRestart,
    AwaitingCert,
    Running,
    Stopped,
    FailedToStart { error: String },
    Warning { message: String },
}

impl WorkloadEventKind {
    /// The stored name of this kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Created => event_kinds::CREATED,
            Self::Starting => event_kinds::STARTING,
            Self::VmRestarted => event_kinds::VM_RESTARTED,
            Self::ForcedRestart => event_kinds::FORCED_RESTART,
            Self::AwaitingCert => event_kinds::AWAITING_CERT,
            Self::Running => event_kinds::RUNNING,
            Self::Stopped => event_kinds::STOPPED,
            Self::FailedToStart { .. } => event_kinds::FAILED_TO_START,
            Self::Warning { .. } => event_kinds::WARNING,
        }
    }

    /// The free-text detail carried by `failedToStart` and `warning`.
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::FailedToStart { error } => Some(error),
            Self::Warning { message } => Some(message),
            _ => None,
        }
    }

    /// Rebuilds a kind from its stored name and optional detail column.
    ///
    /// Detail is ignored for kinds that do not carry one.
    pub fn from_parts(name: &str, detail: Option<String>) -> Result<Self, EventError> {
        let kind = match name {
            event_kinds::CREATED => Self::Created,
            event_kinds::STARTING => Self::Starting,
            event_kinds::VM_RESTARTED => Self::VmRestarted,
            event_kinds::FORCED_RESTART => Self::ForcedRestart,
            event_kinds::AWAITING_CERT => Self::AwaitingCert,
            event_kinds::RUNNING => Self::Running,
            event_kinds::STOPPED => Self::Stopped,
            event_kinds::FAILED_TO_START => Self::FailedToStart {
                error: detail.ok_or(EventError::MissingDetail(event_kinds::FAILED_TO_START))?,
            },
            event_kinds::WARNING => Self::Warning {
                message: detail.ok_or(EventError::MissingDetail(event_kinds::WARNING))?,
            },
            other => return Err(EventError::UnknownKind(other.to_string())),
        };
        Ok(kind)
    }

    pub fn is_warning(&self) -> bool {
        matches!(self, Self::Warning { .. })
    }
}

/// Maps an event kind to the status it puts the workload in.
///
/// Returns `None` for `warning`, which never changes status.
pub fn derive_status(kind: &WorkloadEventKind) -> Option<WorkloadStatus> {
    match kind {
        WorkloadEventKind::Created => Some(WorkloadStatus::Scheduled),
        WorkloadEventKind::Starting
        | WorkloadEventKind::VmRestarted
        | WorkloadEventKind::ForcedRestart => Some(WorkloadStatus::Starting),
        WorkloadEventKind::AwaitingCert => Some(WorkloadStatus::AwaitingCert),
        WorkloadEventKind::Running => Some(WorkloadStatus::Running),
        WorkloadEventKind::Stopped => Some(WorkloadStatus::Stopped),
        WorkloadEventKind::FailedToStart { .. } => Some(WorkloadStatus::Error),
        WorkloadEventKind::Warning { .. } => None,
    }
}

/// Status after replaying an event log that is already in timestamp order.
///
/// This is the status of the last non-warning event, or `None` if the log
/// contains only warnings.
pub fn replay_status<'a, I>(events: I) -> Option<WorkloadStatus>
where
    I: IntoIterator<Item = &'a WorkloadEventKind>,
{
    events.into_iter().filter_map(derive_status).last()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case(WorkloadEventKind::Created, Some(WorkloadStatus::Scheduled))]
    #[case(WorkloadEventKind::Starting, Some(WorkloadStatus::Starting))]
    #[case(WorkloadEventKind::VmRestarted, Some(WorkloadStatus::Starting))]
    #[case(WorkloadEventKind::ForcedRestart, Some(WorkloadStatus::Starting))]
    #[case(WorkloadEventKind::AwaitingCert, Some(WorkloadStatus::AwaitingCert))]
    #[case(WorkloadEventKind::Running, Some(WorkloadStatus::Running))]
    #[case(WorkloadEventKind::Stopped, Some(WorkloadStatus::Stopped))]
    #[case(WorkloadEventKind::FailedToStart { error: "oom".into() }, Some(WorkloadStatus::Error))]
    #[case(WorkloadEventKind::Warning { message: "disk low".into() }, None)]
    fn test_derive_status_table(
        #[case] kind: WorkloadEventKind,
        #[case] expected: Option<WorkloadStatus>,
    ) {
        assert_eq!(derive_status(&kind), expected);
    }

    #[test]
    fn test_replay_keeps_status_through_warning() {
        let log = vec![
            WorkloadEventKind::Created,
            WorkloadEventKind::Starting,
            WorkloadEventKind::Running,
            WorkloadEventKind::Warning {
                message: "disk low".into(),
            },
        ];
        assert_eq!(replay_status(&log), Some(WorkloadStatus::Running));
    }

    #[test]
    fn test_replay_only_warnings() {
        let log = vec![WorkloadEventKind::Warning {
            message: "noisy".into(),
        }];
        assert_eq!(replay_status(&log), None);
    }

    #[test]
    fn test_wire_format_is_tagged() {
        let kind = WorkloadEventKind::FailedToStart {
            error: "image pull failed".into(),
        };
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"kind": "failedToStart", "error": "image pull failed"})
        );

        let parsed: WorkloadEventKind =
            serde_json::from_value(serde_json::json!({"kind": "vmRestarted"})).unwrap();
        assert_eq!(parsed, WorkloadEventKind::VmRestarted);
    }

    #[test]
    fn test_from_parts_matches_name_and_detail() {
        let kind = WorkloadEventKind::Warning {
            message: "disk low".into(),
        };
        let rebuilt =
            WorkloadEventKind::from_parts(kind.name(), kind.detail().map(str::to_string)).unwrap();
        assert_eq!(rebuilt, kind);
    }

    #[test]
    fn test_from_parts_requires_detail() {
        assert_eq!(
            WorkloadEventKind::from_parts("failedToStart", None),
            Err(EventError::MissingDetail("failedToStart"))
        );
        assert!(matches!(
            WorkloadEventKind::from_parts("exploded", None),
            Err(EventError::UnknownKind(_))
        ));
    }

    #[test]
    fn test_status_strings() {
        for status in [
            WorkloadStatus::Scheduled,
            WorkloadStatus::Starting,
            WorkloadStatus::AwaitingCert,
            WorkloadStatus::Running,
            WorkloadStatus::Stopped,
            WorkloadStatus::Error,
        ] {
            let parsed: WorkloadStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
        assert!(!WorkloadStatus::Stopped.is_active());
        assert!(WorkloadStatus::Error.is_active());
    }

    fn any_kind() -> impl Strategy<Value = WorkloadEventKind> {
        prop_oneof![
            Just(WorkloadEventKind::Created),
            Just(WorkloadEventKind::Starting),
            Just(WorkloadEventKind::VmRestarted),
            Just(WorkloadEventKind::ForcedRestart),
            Just(WorkloadEventKind::AwaitingCert),
            Just(WorkloadEventKind::Running),
            Just(WorkloadEventKind::Stopped),
            "[a-z ]{0,12}".prop_map(|error| WorkloadEventKind::FailedToStart { error }),
            "[a-z ]{0,12}".prop_map(|message| WorkloadEventKind::Warning { message }),
        ]
    }

    proptest! {
        #[test]
        fn prop_warnings_never_affect_status(log in proptest::collection::vec(any_kind(), 0..32)) {
            let without_warnings: Vec<_> =
                log.iter().filter(|k| !k.is_warning()).cloned().collect();
            prop_assert_eq!(replay_status(&log), replay_status(&without_warnings));
        }

        #[test]
        fn prop_status_follows_last_non_warning(log in proptest::collection::vec(any_kind(), 1..32)) {
            let expected = log.iter().rev().find(|k| !k.is_warning()).and_then(derive_status);
            prop_assert_eq!(replay_status(&log), expected);
        }
    }
}
