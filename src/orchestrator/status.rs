//! Translation of raw container state into caller-facing job status.

use chrono::Utc;

use crate::job::JobStatus;
use crate::sandbox::{ContainerRuntime, ContainerState};

/// Number of log lines embedded in a completed status.
pub const RECENT_LOG_LINES: usize = 50;

/// Resolve a container snapshot into a [`JobStatus`].
///
/// A reported system error wins over everything else. A running container
/// is stamped with the observation time. Anything else is completed, and only
/// then are the recent logs fetched from `runtime`.
pub async fn resolve(runtime: &dyn ContainerRuntime, state: &ContainerState) -> JobStatus {
    if let Some(ref message) = state.system_error {
        return JobStatus::system_error(message.clone());
    }

    if state.is_running {
        return JobStatus::Running {
            started_at: Utc::now(),
        };
    }

    let recent_logs = runtime
        .tail_logs(&state.container_id, RECENT_LOG_LINES)
        .await;

    JobStatus::Completed {
        exit_code: state.exit_code.unwrap_or(0),
        oom_killed: state.oom_killed,
        recent_logs,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::job::{JobStatusKind, SYSTEM_ERROR_REASON};
    use crate::sandbox::CONTAINER_NOT_FOUND;
    use crate::testing::FakeRuntime;

    fn state(is_running: bool, exit_code: Option<i64>, system_error: Option<&str>) -> ContainerState {
        ContainerState {
            container_id: "c1".to_string(),
            is_running,
            exit_code,
            oom_killed: false,
            system_error: system_error.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_system_error_always_wins() {
        let runtime = FakeRuntime::new();
        for (running, exit) in [(true, None), (false, Some(1)), (false, None)] {
            let status = resolve(&runtime, &state(running, exit, Some("engine exploded"))).await;
            assert_eq!(
                status,
                JobStatus::SystemError {
                    reason: SYSTEM_ERROR_REASON.to_string(),
                    message: "engine exploded".to_string(),
                }
            );
        }
        assert_eq!(runtime.tail_calls(), 0);
    }

    #[tokio::test]
    async fn test_running_container() {
        let runtime = FakeRuntime::new();
        let before = Utc::now();
        let status = resolve(&runtime, &state(true, None, None)).await;

        match status {
            JobStatus::Running { started_at } => assert!(started_at >= before),
            other => panic!("expected running, got {:?}", other),
        }
        assert_eq!(runtime.tail_calls(), 0);
    }

    #[tokio::test]
    async fn test_completed_container_embeds_logs() {
        let runtime = FakeRuntime::new();
        runtime.set_logs("c1", vec!["Line1".into(), "Line2".into()]);

        let status = resolve(&runtime, &state(false, Some(42), None)).await;
        assert_eq!(
            status,
            JobStatus::Completed {
                exit_code: 42,
                oom_killed: false,
                recent_logs: vec!["Line1".into(), "Line2".into()],
            }
        );
        assert_eq!(runtime.tail_calls(), 1);
    }

    #[tokio::test]
    async fn test_missing_exit_code_defaults_to_zero() {
        let runtime = FakeRuntime::new();
        let status = resolve(&runtime, &state(false, None, None)).await;
        assert!(matches!(status, JobStatus::Completed { exit_code: 0, .. }));
    }

    #[tokio::test]
    async fn test_oom_killed_is_carried() {
        let runtime = FakeRuntime::new();
        let mut oom = state(false, Some(137), None);
        oom.oom_killed = true;

        let status = resolve(&runtime, &oom).await;
        assert!(matches!(
            status,
            JobStatus::Completed {
                exit_code: 137,
                oom_killed: true,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_unknown_container_resolves_to_system_error() {
        let runtime = FakeRuntime::new();
        let status = resolve(&runtime, &ContainerState::not_found("nonexistent")).await;

        assert_eq!(status.kind(), JobStatusKind::SystemError);
        assert_eq!(status, JobStatus::system_error(CONTAINER_NOT_FOUND));
    }
}
