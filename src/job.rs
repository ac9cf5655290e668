//! Caller-facing job status.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `reason` carried by every [`JobStatus::SystemError`] produced by the resolver.
pub const SYSTEM_ERROR_REASON: &str = "SYSTEM_ERROR";

/// Status of a job as seen by callers. Exactly one variant is populated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobStatus {
    /// The container is still executing.
    Running {
        /// Time the status was observed, not the container's own start time.
        started_at: DateTime<Utc>,
    },
    /// The command exited.
    Completed {
        exit_code: i64,
        oom_killed: bool,
        recent_logs: Vec<String>,
    },
    /// The runtime could not report on the container.
    SystemError { reason: String, message: String },
}

impl JobStatus {
    /// Build a system error with the standard reason.
    pub fn system_error(message: impl Into<String>) -> Self {
        JobStatus::SystemError {
            reason: SYSTEM_ERROR_REASON.to_string(),
            message: message.into(),
        }
    }

    /// Which variant this status is.
    pub fn kind(&self) -> JobStatusKind {
        match self {
            JobStatus::Running { .. } => JobStatusKind::Running,
            JobStatus::Completed { .. } => JobStatusKind::Completed,
            JobStatus::SystemError { .. } => JobStatusKind::SystemError,
        }
    }

    /// Completed and SystemError are terminal.
    pub fn is_terminal(&self) -> bool {
        self.kind().is_terminal()
    }
}

/// Variant tag of a [`JobStatus`], used for transition detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatusKind {
    Running,
    Completed,
    SystemError,
}

impl JobStatusKind {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatusKind::Completed | JobStatusKind::SystemError)
    }
}

impl fmt::Display for JobStatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatusKind::Running => "RUNNING",
            JobStatusKind::Completed => "COMPLETED",
            JobStatusKind::SystemError => "SYSTEM_ERROR",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_kinds_and_terminality() {
        let running = JobStatus::Running {
            started_at: Utc::now(),
        };
        let completed = JobStatus::Completed {
            exit_code: 0,
            oom_killed: false,
            recent_logs: vec![],
        };
        let failed = JobStatus::system_error("Container not found");

        assert_eq!(running.kind(), JobStatusKind::Running);
        assert!(!running.is_terminal());
        assert!(completed.is_terminal());
        assert!(failed.is_terminal());
        assert_eq!(failed.kind().to_string(), "SYSTEM_ERROR");
    }

    #[test]
    fn test_wire_format_is_tagged() {
        let status = JobStatus::Completed {
            exit_code: 42,
            oom_killed: true,
            recent_logs: vec!["line 1".into()],
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "state": "completed",
                "exit_code": 42,
                "oom_killed": true,
                "recent_logs": ["line 1"],
            })
        );

        let parsed: JobStatus = serde_json::from_value(serde_json::json!({
            "state": "system_error",
            "reason": "SYSTEM_ERROR",
            "message": "Container not found",
        }))
        .unwrap();
        assert_eq!(parsed, JobStatus::system_error("Container not found"));
    }
}
