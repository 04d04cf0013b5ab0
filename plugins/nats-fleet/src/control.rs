//! Container stop/start over NATS request/reply.
//!
//! Each container's agent answers on `{prefix}.control.{name}.stop`,
//! `{prefix}.control.{name}.start` and `{prefix}.control.{name}.credentials`.
//! Liveness is read from the registry.

use std::sync::Arc;

use async_trait::async_trait;
use fleet_lifecycle::{
    ContainerControl, ContainerRef, Credentials, LifecycleError, LifecycleResult,
};
use registry_session::{
    CoordinationError, CoordinationResult, NatsConnector, RegistryHandle, RegistryPaths,
    SessionManager,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Default subject prefix for control requests.
pub const DEFAULT_PREFIX: &str = "fleet";

/// Request/reply transport for control messages.
#[async_trait]
pub trait ControlTransport: Send + Sync + 'static {
    async fn request(&self, subject: &str, payload: Vec<u8>) -> CoordinationResult<Vec<u8>>;
}

#[async_trait]
impl ControlTransport for SessionManager<NatsConnector> {
    async fn request(&self, subject: &str, payload: Vec<u8>) -> CoordinationResult<Vec<u8>> {
        // re-fetch each time, the session may have swapped clients
        self.client()?.request(subject, payload).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Stop,
    Start,
    /// Replace the management credentials the agent stores for its container.
    Credentials,
}

impl std::fmt::Display for ControlAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlAction::Stop => write!(f, "stop"),
            ControlAction::Start => write!(f, "start"),
            ControlAction::Credentials => write!(f, "credentials"),
        }
    }
}

/// Maps a control action on a container to its NATS subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlSubjects {
    prefix: String,
}

impl Default for ControlSubjects {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_owned(),
        }
    }
}

impl ControlSubjects {
    /// Returns an error if the prefix is empty, has empty tokens or
    /// contains wildcards or unresolved `{…}` placeholders.
    pub fn with_prefix(prefix: impl Into<String>) -> CoordinationResult<Self> {
        let subjects = Self {
            prefix: prefix.into(),
        };
        subjects.validate()?;
        Ok(subjects)
    }

    pub fn resolve(&self, action: ControlAction, container: &str) -> String {
        format!("{}.control.{container}.{action}", self.prefix)
    }

    fn validate(&self) -> CoordinationResult<()> {
        if self.prefix.split('.').any(str::is_empty) {
            return Err(CoordinationError::Config(format!(
                "control subject prefix '{}' has an empty token",
                self.prefix
            )));
        }
        if self
            .prefix
            .contains(|c: char| matches!(c, '{' | '}' | '*' | '>') || c.is_whitespace())
        {
            return Err(CoordinationError::Config(format!(
                "control subject prefix '{}' is malformed",
                self.prefix
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct ControlRequest {
    force: bool,
}

#[derive(Serialize)]
struct CredentialsRequest<'a> {
    user: &'a str,
    password: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ReplyStatus {
    Ok,
    Unsupported,
    Error,
}

#[derive(Debug, Deserialize)]
struct ControlReply {
    status: ReplyStatus,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug)]
pub struct NatsContainerControl<S> {
    transport: Arc<S>,
    subjects: ControlSubjects,
    paths: RegistryPaths,
}

impl<S> NatsContainerControl<S>
where
    S: ControlTransport + RegistryHandle,
{
    pub fn new(transport: Arc<S>, subjects: ControlSubjects, paths: RegistryPaths) -> Self {
        Self {
            transport,
            subjects,
            paths,
        }
    }

    async fn send<P: Serialize>(
        &self,
        action: ControlAction,
        container: &ContainerRef,
        request: &P,
    ) -> LifecycleResult<()> {
        let subject = self.subjects.resolve(action, &container.name);
        let payload = serde_json::to_vec(request)
            .map_err(|err| LifecycleError::operation(&container.name, err.to_string()))?;

        let reply = self
            .transport
            .request(&subject, payload)
            .await
            .map_err(|err| {
                let message = format!("{action} request failed: {err}");
                LifecycleError::operation(&container.name, message)
            })?;
        let reply: ControlReply = serde_json::from_slice(&reply).map_err(|err| {
            LifecycleError::operation(&container.name, format!("malformed {action} reply: {err}"))
        })?;

        let message = reply.message.unwrap_or_default();
        match reply.status {
            ReplyStatus::Ok => {
                info!(container = %container.name, %action, "control request accepted");
                Ok(())
            }
            ReplyStatus::Unsupported => Err(LifecycleError::unsupported(&container.name, message)),
            ReplyStatus::Error => Err(LifecycleError::operation(&container.name, message)),
        }
    }
}

#[async_trait]
impl<S> ContainerControl for NatsContainerControl<S>
where
    S: ControlTransport + RegistryHandle,
{
    async fn stop(&self, container: &ContainerRef, force: bool) -> LifecycleResult<()> {
        debug!(container = %container.name, force, "sending stop request");
        let request = ControlRequest { force };
        self.send(ControlAction::Stop, container, &request).await
    }

    async fn start(&self, container: &ContainerRef, force: bool) -> LifecycleResult<()> {
        debug!(container = %container.name, force, "sending start request");
        let request = ControlRequest { force };
        self.send(ControlAction::Start, container, &request).await
    }

    async fn update_credentials(
        &self,
        container: &ContainerRef,
        credentials: &Credentials,
    ) -> LifecycleResult<()> {
        debug!(container = %container.name, user = %credentials.user, "sending credentials");
        let request = CredentialsRequest {
            user: &credentials.user,
            password: &credentials.password,
        };
        self.send(ControlAction::Credentials, container, &request)
            .await
    }

    async fn is_alive(&self, container: &ContainerRef) -> LifecycleResult<bool> {
        Ok(self
            .transport
            .exists(&self.paths.alive(&container.name))
            .await?)
    }
}
