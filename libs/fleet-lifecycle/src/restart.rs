//! Restart workflow: classify, stop, quiesce-wait, start, self-restart last.

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::container::ContainerRef;
use crate::error::{LifecycleError, LifecycleResult};
use crate::metrics;
use crate::orchestrator::LifecycleOrchestrator;
use crate::report::{LifecycleBatchResult, Outcome};
use crate::stop::StopOutcome;

/// How a quiesce-wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quiesce {
    /// The liveness marker disappeared.
    Quiesced,
    /// The marker was still present when the timeout ran out.
    TimedOut,
}

impl LifecycleOrchestrator {
    /// Restart every container matched by `patterns`.
    ///
    /// Cancelling `cancel` during a quiesce-wait returns
    /// [`LifecycleError::Cancelled`] without starting anything; containers
    /// already stopped stay stopped.
    pub async fn restart(
        &self,
        patterns: &[String],
        force: bool,
        cancel: &CancellationToken,
    ) -> LifecycleResult<LifecycleBatchResult> {
        let containers = self.resolve_batch(patterns).await?;
        let current = self.membership.current_container().await?;
        let mut result = LifecycleBatchResult::new();

        let local = self
            .classify(&containers, &current, force, &mut result)
            .await;

        let mut stopped = Vec::with_capacity(local.len());
        for container in &local {
            match self.stop_container(container, force, &mut result).await {
                Ok(StopOutcome::Stopped | StopOutcome::AlreadyStopped) => {
                    result.record(container, Outcome::Stopped);
                    stopped.push(container);
                }
                Ok(StopOutcome::Skipped) => {}
                Ok(StopOutcome::StillAlive) => result.record(container, Outcome::Failed),
                Err(LifecycleError::Unsupported { message, .. }) => {
                    info!(
                        container = %container,
                        reason = %message,
                        "not created by the fleet, using remote management"
                    );
                    self.restart_remote_into(container, &mut result).await;
                }
                Err(err) => {
                    error!(container = %container, error = %err, "stop failed");
                    result.record(container, Outcome::Failed);
                }
            }
        }

        for container in &stopped {
            if self.quiesce_wait(container, cancel).await? == Quiesce::TimedOut {
                warn!(container = %container, "liveness marker still present, starting anyway");
            }
        }

        for container in stopped {
            match self.control.start(container, force).await {
                Ok(()) => {
                    info!(container = %container, "restarted");
                    result.record(container, Outcome::RestartedLocally);
                }
                Err(err) => {
                    error!(container = %container, error = %err, "start failed");
                    result.record(container, Outcome::Failed);
                }
            }
        }

        self.finish(&result);

        if result.self_restart_requested() {
            info!(container = %current, "restarting own container");
            if let Err(err) = self.process.request_restart() {
                error!(
                    container = %current,
                    error = %err,
                    "error when forcing a process restart"
                );
            }
        }
        Ok(result)
    }

    /// Sort the batch into skipped, self, remote and local containers.
    /// Remote containers are handled right away; local ones are returned.
    async fn classify(
        &self,
        containers: &[ContainerRef],
        current: &ContainerRef,
        force: bool,
        result: &mut LifecycleBatchResult,
    ) -> Vec<ContainerRef> {
        let mut local = Vec::new();
        for container in containers {
            let membership = if force {
                Ok(false)
            } else {
                self.membership.is_ensemble_member(container).await
            };
            let protected = match membership {
                Ok(protected) => protected,
                Err(err) => {
                    error!(container = %container, error = %err, "ensemble membership lookup failed");
                    result.record(container, Outcome::Failed);
                    continue;
                }
            };
            if protected {
                metrics::LIFECYCLE_PROTECTED_SKIPS.inc();
                let refusal = LifecycleError::ProtectedResource(container.name.clone());
                warn!(error = %refusal, "refusing to restart without force");
                result.advise(format!(
                    "Container {container} is an ensemble member. \
                     If you want to restart it, use the --force flag"
                ));
                continue;
            }
            if container.name == current.name {
                if current.can_restart_itself() {
                    result.request_self_restart();
                } else {
                    warn!(container = %container, "container can't be restarted from itself");
                    result.advise(format!("Container {container} can't be restarted from itself"));
                }
                continue;
            }
            result.track(container);
            match self.membership.is_managed(container).await {
                Ok(true) => local.push(container.clone()),
                Ok(false) => self.restart_remote_into(container, result).await,
                Err(err) => {
                    error!(container = %container, error = %err, "fleet membership lookup failed");
                    result.record(container, Outcome::Failed);
                }
            }
        }
        local
    }

    /// Wait for the container's liveness marker to leave the registry.
    ///
    /// Sleeps first and always checks the marker at least once, even when
    /// the timeout has already run out. Registry errors count as "still
    /// present".
    pub async fn quiesce_wait(
        &self,
        container: &ContainerRef,
        cancel: &CancellationToken,
    ) -> LifecycleResult<Quiesce> {
        let marker = self.paths.status_pid(&container.name);
        let started = Instant::now();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    warn!(container = %container, "quiesce wait cancelled");
                    return Err(LifecycleError::Cancelled);
                }
                _ = tokio::time::sleep(self.config.quiesce_poll_interval) => {}
            }

            match self.registry.exists(&marker).await {
                Ok(false) => {
                    debug!(container = %container, waited_ms = started.elapsed().as_millis(), "container quiesced");
                    return Ok(Quiesce::Quiesced);
                }
                Ok(true) => trace!(container = %container, %marker, "liveness marker present"),
                Err(err) => debug!(container = %container, error = %err, "registry unavailable during quiesce wait"),
            }

            if started.elapsed() >= self.config.quiesce_timeout {
                metrics::LIFECYCLE_QUIESCE_TIMEOUTS.inc();
                return Ok(Quiesce::TimedOut);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;
    use registry_session::CoordinationError;
    use tracing_test::traced_test;

    use super::*;
    use crate::fakes::Harness;

    const MARKER_A: &str = "/fleet/registry/containers/status/a/pid";

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn remote_only(name: &str) -> ContainerRef {
        ContainerRef::new(name).with_remote_endpoint(format!("http://{name}:8181/jolokia"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_and_unsupported_containers() {
        let h = Harness::new(["a", "b"]);
        h.fleet.add(remote_only("b"));
        h.fleet.fail_stop(
            "b",
            LifecycleError::unsupported("b", "has not been created by the fleet"),
        );
        h.registry.script(MARKER_A, &[true, false]);

        let result = h
            .orchestrator()
            .restart(&names(&["a", "b"]), false, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.outcome("a"), Some(Outcome::RestartedLocally));
        assert_eq!(result.outcome("b"), Some(Outcome::RestartedRemotely));
        assert_eq!(result.restarted(), vec!["a", "b"]);
        assert!(result.failed().is_empty());
        assert_eq!(h.registry.polls(), 2);
        assert_eq!(
            h.fleet.calls(),
            vec!["stop:a:false", "stop:b:false", "start:a:false"]
        );
        assert_eq!(h.remote.invocations().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_fallback_failure_is_recorded() {
        let h = Harness::new(["a", "b"]);
        h.fleet.add(remote_only("b"));
        h.fleet.fail_stop(
            "b",
            LifecycleError::unsupported("b", "has not been created by the fleet"),
        );
        h.remote
            .fail_connect(crate::error::RemoteError::Connect("connection refused".into()));

        let result = h
            .orchestrator()
            .restart(&names(&["a", "b"]), false, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.restarted(), vec!["a"]);
        assert_eq!(result.failed(), vec!["b"]);
        assert_eq!(
            result.summary_lines(),
            vec![
                "The list of restarted containers: [a]".to_string(),
                "The list of failed containers: [b]".to_string(),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmanaged_container_goes_straight_to_remote() {
        let h = Harness::new(["a"]);
        h.fleet.add(remote_only("joined").unmanaged());

        let result = h
            .orchestrator()
            .restart(&names(&["joined", "a"]), false, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.outcome("joined"), Some(Outcome::RestartedRemotely));
        assert_eq!(result.restarted(), vec!["joined", "a"]);
        assert!(!h.fleet.calls().iter().any(|c| c.contains("joined")));
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_membership_lookup_failure_is_recorded() {
        let h = Harness::new(["b"]);
        h.fleet.add(remote_only("joined").unmanaged());
        h.fleet.fail_membership(
            "b",
            CoordinationError::Transport("registry hiccup".into()).into(),
        );

        let result = h
            .orchestrator()
            .restart(&names(&["joined", "b"]), false, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.outcome("joined"), Some(Outcome::RestartedRemotely));
        assert_eq!(result.outcome("b"), Some(Outcome::Failed));
        assert_eq!(h.remote.invocations().len(), 2);
        assert!(h.fleet.calls().is_empty());
        assert_eq!(
            result.summary_lines(),
            vec![
                "The list of restarted containers: [joined]".to_string(),
                "The list of failed containers: [b]".to_string(),
            ]
        );
        assert!(logs_contain("ensemble membership lookup failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_managed_lookup_failure_is_recorded() {
        let h = Harness::new(["a"]);
        h.fleet.add(ContainerRef::new("b"));
        h.fleet.fail_membership(
            "b",
            CoordinationError::Transport("registry hiccup".into()).into(),
        );

        let result = h
            .orchestrator()
            .restart(&names(&["a", "b"]), true, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.restarted(), vec!["a"]);
        assert_eq!(result.failed(), vec!["b"]);
        assert_eq!(h.fleet.calls(), vec!["stop:a:true", "start:a:true"]);
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_ensemble_member_excluded_without_force() {
        let h = Harness::new([]);
        h.fleet.add(ContainerRef::new("zk1").ensemble());

        let result = h
            .orchestrator()
            .restart(&names(&["zk1"]), false, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.outcome("zk1"), None);
        assert!(result.summary_lines().is_empty());
        assert_eq!(
            result.advisories(),
            ["Container zk1 is an ensemble member. \
              If you want to restart it, use the --force flag"]
        );
        assert!(h.fleet.calls().is_empty());
        assert!(logs_contain("container 'zk1' is an ensemble member"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensemble_check_precedes_self_restart() {
        let h = Harness::new([]);
        let me = ContainerRef::new("root").ensemble();
        h.fleet.add(me.clone());
        h.fleet.set_current(me);

        let result = h
            .orchestrator()
            .restart(&names(&["root"]), false, &CancellationToken::new())
            .await
            .unwrap();

        assert!(!result.self_restart_requested());
        assert_eq!(h.process.requests(), 0);
        assert!(result.advisories()[0].contains("is an ensemble member"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_self_restart_runs_last() {
        let h = Harness::new(["root", "a"]);

        let result = h
            .orchestrator()
            .restart(&names(&["root", "a"]), false, &CancellationToken::new())
            .await
            .unwrap();

        assert!(result.self_restart_requested());
        assert_eq!(result.outcome("root"), None);
        assert_eq!(result.restarted(), vec!["a"]);
        assert_eq!(h.process.requests(), 1);
        assert_eq!(h.fleet.calls(), vec!["stop:a:false", "start:a:false"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_self_restart_refused_for_child_or_ssh() {
        for me in [
            ContainerRef::new("me").child(),
            ContainerRef::new("me").with_provider_scheme("ssh"),
        ] {
            let h = Harness::new([]);
            h.fleet.add(me.clone());
            h.fleet.set_current(me);

            let result = h
                .orchestrator()
                .restart(&names(&["me"]), false, &CancellationToken::new())
                .await
                .unwrap();

            assert!(!result.self_restart_requested());
            assert_eq!(h.process.requests(), 0);
            assert_eq!(
                result.advisories(),
                ["Container me can't be restarted from itself"]
            );
        }
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_self_restart_failure_is_logged() {
        let h = Harness::new(["root"]);
        h.process.set_failing();

        let result = h
            .orchestrator()
            .restart(&names(&["root"]), false, &CancellationToken::new())
            .await
            .unwrap();

        assert!(result.self_restart_requested());
        assert_eq!(h.process.requests(), 1);
        assert!(logs_contain("error when forcing a process restart"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_failure_moves_to_failed() {
        let h = Harness::new(["a", "b"]);
        h.fleet
            .fail_start("b", LifecycleError::operation("b", "agent unreachable"));

        let result = h
            .orchestrator()
            .restart(&names(&["a", "b"]), false, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.restarted(), vec!["a"]);
        assert_eq!(result.failed(), vec!["b"]);
        assert!(result.stopped().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiesce_timeout_still_starts() {
        let mut h = Harness::new(["a"]);
        h.config.quiesce_timeout = Duration::from_secs(9);
        h.registry.script(MARKER_A, &[true]);

        let result = h
            .orchestrator()
            .restart(&names(&["a"]), false, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.restarted(), vec!["a"]);
        assert_eq!(h.registry.polls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiesce_checks_once_with_elapsed_timeout() {
        let mut h = Harness::new(["a"]);
        h.config.quiesce_timeout = Duration::ZERO;
        let orchestrator = h.orchestrator();
        let a = ContainerRef::new("a");
        let cancel = CancellationToken::new();

        let outcome = orchestrator.quiesce_wait(&a, &cancel).await.unwrap();
        assert_eq!(outcome, Quiesce::Quiesced);
        assert_eq!(h.registry.polls(), 1);

        h.registry.script(MARKER_A, &[true]);
        let outcome = orchestrator.quiesce_wait(&a, &cancel).await.unwrap();
        assert_eq!(outcome, Quiesce::TimedOut);
        assert_eq!(h.registry.polls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiesce_treats_registry_errors_as_present() {
        let mut h = Harness::new(["a"]);
        h.config.quiesce_timeout = Duration::from_secs(6);
        h.registry.set_failing(true);

        let outcome = h
            .orchestrator()
            .quiesce_wait(&ContainerRef::new("a"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, Quiesce::TimedOut);
        assert_eq!(h.registry.polls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_quiesce_aborts_batch() {
        let h = Harness::new(["a", "b"]);
        h.registry.script(MARKER_A, &[true]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            trigger.cancel();
        });

        let err = h
            .orchestrator()
            .restart(&names(&["a", "b"]), false, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, LifecycleError::Cancelled));
        assert_eq!(h.fleet.calls(), vec!["stop:a:false", "stop:b:false"]);
    }
}
