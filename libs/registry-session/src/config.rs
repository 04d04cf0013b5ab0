//! Connection configuration for the coordination registry.

use std::time::Duration;

use crate::error::{CoordinationError, CoordinationResult};

/// Default ceiling for client rebuild retries after a resolution failure.
pub const DEFAULT_RETRY_MAX: u32 = 3;

/// Default pause between rebuild retries.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Default connection timeout if not configured.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default session timeout if not configured.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(60);

/// Default request timeout if not configured.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(2000);

/// Default KV bucket holding the registry tree.
pub const DEFAULT_BUCKET: &str = "fleet_registry";

/// Everything needed to build one registry client.
///
/// A client never sees this mutate: a changed value makes the session
/// manager build a new client and swap it in.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Registry endpoints, e.g. `nats://10.0.0.1:4222`.
    pub servers: Vec<String>,
    /// Optional shared secret presented when connecting.
    pub password: Option<String>,
    /// Rebuild attempts allowed after a host-resolution failure.
    pub retry_max: u32,
    /// Pause before each rebuild attempt.
    pub retry_interval: Duration,
    pub connect_timeout: Duration,
    pub session_timeout: Duration,
    /// KV bucket holding the registry tree.
    pub bucket: String,
    pub request_timeout: Duration,
}

impl ConnectionConfig {
    /// Config with default timeouts for the given endpoints.
    pub fn new<I, S>(servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            servers: servers.into_iter().map(Into::into).collect(),
            password: None,
            retry_max: DEFAULT_RETRY_MAX,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            bucket: DEFAULT_BUCKET.to_owned(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Parse a comma-separated endpoint list (`FLEET_SERVERS` style).
    pub fn from_server_list(list: &str) -> Self {
        Self::new(
            list.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned),
        )
    }

    /// Builder-style setter for the shared secret.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Reject endpoint lists that cannot produce a client.
    pub fn validate(&self) -> CoordinationResult<()> {
        if self.servers.is_empty() {
            return Err(CoordinationError::Config(
                "no registry endpoints configured".into(),
            ));
        }
        if let Some(bad) = self
            .servers
            .iter()
            .find(|s| s.trim().is_empty() || s.chars().any(char::is_whitespace))
        {
            return Err(CoordinationError::Config(format!(
                "invalid registry endpoint '{bad}'"
            )));
        }
        if self.bucket.trim().is_empty() {
            return Err(CoordinationError::Config("registry bucket is empty".into()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("servers", &self.servers)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("retry_max", &self.retry_max)
            .field("retry_interval", &self.retry_interval)
            .field("connect_timeout", &self.connect_timeout)
            .field("session_timeout", &self.session_timeout)
            .field("bucket", &self.bucket)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}
