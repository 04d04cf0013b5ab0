//! Timing and remote-restart configuration for lifecycle workflows.

use std::time::Duration;

/// Pause between liveness polls after a stop.
pub const DEFAULT_STOP_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Liveness polls after a stop before reporting failure.
pub const DEFAULT_STOP_POLL_ATTEMPTS: u32 = 12;

/// Pause between registry polls while waiting for a container to quiesce.
pub const DEFAULT_QUIESCE_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Upper bound on the quiesce-wait per container.
pub const DEFAULT_QUIESCE_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleConfig {
    pub stop_poll_interval: Duration,
    pub stop_poll_attempts: u32,
    pub quiesce_poll_interval: Duration,
    pub quiesce_timeout: Duration,
    pub remote: RemoteRestartConfig,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            stop_poll_interval: DEFAULT_STOP_POLL_INTERVAL,
            stop_poll_attempts: DEFAULT_STOP_POLL_ATTEMPTS,
            quiesce_poll_interval: DEFAULT_QUIESCE_POLL_INTERVAL,
            quiesce_timeout: DEFAULT_QUIESCE_TIMEOUT,
            remote: RemoteRestartConfig::default(),
        }
    }
}

/// Names used when restarting a container over remote management.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRestartConfig {
    /// Object exposing `setSystemProperty`.
    pub control_object: String,
    /// Substring identifying the framework object; its full name embeds
    /// a per-instance identifier.
    pub framework_object_pattern: String,
    /// System property asking the runtime to restart on its next stop.
    pub restart_property: String,
}

impl Default for RemoteRestartConfig {
    fn default() -> Self {
        Self {
            control_object: "io.fleet:type=Fleet".into(),
            framework_object_pattern: "osgi.core:type=framework".into(),
            restart_property: "karaf.restart.jvm".into(),
        }
    }
}
