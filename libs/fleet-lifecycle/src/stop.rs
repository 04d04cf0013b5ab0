//! Stop workflow.

use tracing::{debug, error, info, warn};

use crate::container::ContainerRef;
use crate::error::{LifecycleError, LifecycleResult};
use crate::metrics;
use crate::orchestrator::LifecycleOrchestrator;
use crate::report::{LifecycleBatchResult, Outcome};

/// What happened to one container in the stop workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    AlreadyStopped,
    /// Ensemble member without `force`.
    Skipped,
    /// Still alive after every poll.
    StillAlive,
}

impl LifecycleOrchestrator {
    /// Stop every container matched by `patterns`.
    ///
    /// Only a malformed name aborts the batch; per-container failures end
    /// up in the failed set and the rest of the batch carries on.
    pub async fn stop(
        &self,
        patterns: &[String],
        force: bool,
    ) -> LifecycleResult<LifecycleBatchResult> {
        let containers = self.resolve_batch(patterns).await?;
        let mut result = LifecycleBatchResult::new();
        for container in &containers {
            match self.stop_container(container, force, &mut result).await {
                Ok(StopOutcome::Stopped | StopOutcome::AlreadyStopped) => {
                    result.record(container, Outcome::Stopped)
                }
                Ok(StopOutcome::Skipped) => {}
                Ok(StopOutcome::StillAlive) => result.record(container, Outcome::Failed),
                Err(err) => {
                    error!(container = %container, error = %err, "stop failed");
                    result.record(container, Outcome::Failed);
                }
            }
        }
        self.finish(&result);
        Ok(result)
    }

    /// Stop one container and wait for it to report not alive.
    pub async fn stop_container(
        &self,
        container: &ContainerRef,
        force: bool,
        result: &mut LifecycleBatchResult,
    ) -> LifecycleResult<StopOutcome> {
        if !force && self.membership.is_ensemble_member(container).await? {
            metrics::LIFECYCLE_PROTECTED_SKIPS.inc();
            let refusal = LifecycleError::ProtectedResource(container.name.clone());
            warn!(error = %refusal, "refusing to stop without force");
            result.advise(format!(
                "Container {container} is part of the ensemble. \
                 If you still want to stop it, please use --force option."
            ));
            return Ok(StopOutcome::Skipped);
        }

        self.apply_credentials(container).await;

        if !self.control.is_alive(container).await? {
            info!(container = %container, "already stopped");
            result.note(format!("Container '{container}' already stopped."));
            return Ok(StopOutcome::AlreadyStopped);
        }

        self.control.stop(container, force).await?;
        if !self.control.is_alive(container).await? {
            info!(container = %container, "stopped");
            result.note(format!("Container '{container}' stopped successfully."));
            return Ok(StopOutcome::Stopped);
        }

        let attempts = self.config.stop_poll_attempts;
        for attempt in 1..=attempts {
            tokio::time::sleep(self.config.stop_poll_interval).await;
            match self.control.is_alive(container).await {
                Ok(false) => {
                    info!(container = %container, attempt, "stopped");
                    result.note(format!("Container '{container}' stopped successfully."));
                    return Ok(StopOutcome::Stopped);
                }
                Ok(true) => debug!(container = %container, attempt, attempts, "still alive"),
                Err(err) => debug!(container = %container, attempt, error = %err, "liveness check failed"),
            }
        }

        error!(container = %container, attempts, "container did not stop");
        result.advise(format!(
            "Container '{container}' was not stopped successfully, \
             something went wrong. Check logs."
        ));
        Ok(StopOutcome::StillAlive)
    }

    /// Push operator-supplied management credentials to the container so
    /// later remote access uses them. A failure is logged, not fatal.
    async fn apply_credentials(&self, container: &ContainerRef) {
        let Some(credentials) = self.credentials.get() else {
            return;
        };
        match self
            .control
            .update_credentials(container, &credentials)
            .await
        {
            Ok(()) => {
                debug!(container = %container, user = %credentials.user, "credentials applied");
            }
            Err(err) => {
                warn!(container = %container, error = %err, "failed to apply updated credentials");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use registry_session::CoordinationError;
    use tracing_test::traced_test;

    use crate::container::ContainerRef;
    use crate::error::LifecycleError;
    use crate::fakes::Harness;
    use crate::fleet::CredentialStore;
    use crate::report::Outcome;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_stopped_is_noop() {
        let h = Harness::new(["web1"]);
        h.fleet.mark_stopped("web1");

        let result = h
            .orchestrator()
            .stop(&names(&["web1"]), false)
            .await
            .unwrap();
        assert_eq!(result.outcome("web1"), Some(Outcome::Stopped));
        assert_eq!(result.messages(), ["Container 'web1' already stopped."]);
        assert!(h.fleet.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_succeeds_immediately() {
        let h = Harness::new(["web1"]);
        let started = tokio::time::Instant::now();

        let result = h
            .orchestrator()
            .stop(&names(&["web1"]), false)
            .await
            .unwrap();
        assert_eq!(result.stopped(), vec!["web1"]);
        assert_eq!(h.fleet.calls(), vec!["stop:web1:false"]);
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert!(h.log().contains(&"credentials:web1:admin".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_credentials_nothing_applied() {
        let h = Harness::new(["web1"]);
        h.credentials.clear();

        let result = h
            .orchestrator()
            .stop(&names(&["web1"]), false)
            .await
            .unwrap();
        assert_eq!(result.stopped(), vec!["web1"]);
        assert!(!h.log().iter().any(|c| c.starts_with("credentials:")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_succeeds_within_one_poll() {
        let h = Harness::new(["web1"]);
        h.fleet.script_alive("web1", &[true, true, false]);
        let started = tokio::time::Instant::now();

        let result = h
            .orchestrator()
            .stop(&names(&["web1"]), false)
            .await
            .unwrap();
        assert_eq!(result.outcome("web1"), Some(Outcome::Stopped));
        assert_eq!(started.elapsed(), h.config.stop_poll_interval);
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_stop_still_alive_reports_failure() {
        let h = Harness::new(["web1", "web2"]);
        h.fleet.script_alive("web1", &[true]);
        let started = tokio::time::Instant::now();

        let result = h
            .orchestrator()
            .stop(&names(&["web1", "web2"]), false)
            .await
            .unwrap();
        assert_eq!(result.failed(), vec!["web1"]);
        assert_eq!(result.stopped(), vec!["web2"]);
        assert_eq!(
            started.elapsed(),
            h.config.stop_poll_interval * h.config.stop_poll_attempts
        );
        assert!(result.advisories()[0].contains("was not stopped successfully"));
        assert!(logs_contain("container did not stop"));
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_ensemble_member_skipped_without_force() {
        let h = Harness::new(["web1"]);
        h.fleet.add(ContainerRef::new("zk1").ensemble());

        let result = h
            .orchestrator()
            .stop(&names(&["zk1", "web1"]), false)
            .await
            .unwrap();
        assert_eq!(result.outcome("zk1"), None);
        assert_eq!(result.stopped(), vec!["web1"]);
        assert_eq!(
            result.advisories(),
            ["Container zk1 is part of the ensemble. \
              If you still want to stop it, please use --force option."]
        );
        assert_eq!(h.fleet.calls(), vec!["stop:web1:false"]);
        assert!(logs_contain("container 'zk1' is an ensemble member"));

        let forced = h.orchestrator().stop(&names(&["zk1"]), true).await.unwrap();
        assert_eq!(forced.stopped(), vec!["zk1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_error_does_not_abort_batch() {
        let h = Harness::new(["a", "b"]);
        h.fleet
            .fail_stop("a", LifecycleError::operation("a", "agent unreachable"));

        let result = h
            .orchestrator()
            .stop(&names(&["a", "b"]), false)
            .await
            .unwrap();
        assert_eq!(result.failed(), vec!["a"]);
        assert_eq!(result.stopped(), vec!["b"]);
        assert_eq!(result.summary_lines().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_membership_lookup_failure_does_not_abort_batch() {
        let h = Harness::new(["a", "b"]);
        h.fleet.fail_membership(
            "a",
            CoordinationError::Transport("registry hiccup".into()).into(),
        );

        let result = h
            .orchestrator()
            .stop(&names(&["a", "b"]), false)
            .await
            .unwrap();
        assert_eq!(result.failed(), vec!["a"]);
        assert_eq!(result.stopped(), vec!["b"]);
        assert_eq!(h.fleet.calls(), vec!["stop:b:false"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_name_touches_nothing() {
        let h = Harness::new(["a"]);
        let err = h
            .orchestrator()
            .stop(&names(&["a", "B!"]), false)
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Validation(_)));
        assert!(h.fleet.calls().is_empty());
    }
}
