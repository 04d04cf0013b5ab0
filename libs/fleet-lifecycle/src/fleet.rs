//! Collaborator interfaces consumed by the lifecycle orchestrator.
//!
//! Concrete implementations live in the backend plugins; the orchestrator
//! only sees these traits so every workflow can be driven by fakes.

use async_trait::async_trait;

use crate::container::ContainerRef;
use crate::error::{LifecycleResult, RemoteError};

/// Fleet membership queries.
#[async_trait]
pub trait FleetMembership: Send + Sync + 'static {
    /// Expand a name or glob pattern, in resolution order.
    async fn resolve(&self, pattern: &str) -> LifecycleResult<Vec<ContainerRef>>;

    async fn is_managed(&self, container: &ContainerRef) -> LifecycleResult<bool> {
        Ok(container.managed)
    }

    async fn is_ensemble_member(&self, container: &ContainerRef) -> LifecycleResult<bool> {
        Ok(container.ensemble_member)
    }

    /// The container this process runs in.
    async fn current_container(&self) -> LifecycleResult<ContainerRef>;
}

/// Per-container stop/start through the local control path.
#[async_trait]
pub trait ContainerControl: Send + Sync + 'static {
    /// Stop the container. A container the fleet did not create yields
    /// [`LifecycleError::Unsupported`](crate::LifecycleError::Unsupported).
    async fn stop(&self, container: &ContainerRef, force: bool) -> LifecycleResult<()>;

    async fn start(&self, container: &ContainerRef, force: bool) -> LifecycleResult<()>;

    async fn is_alive(&self, container: &ContainerRef) -> LifecycleResult<bool>;

    /// Replace the management credentials stored for the container.
    async fn update_credentials(
        &self,
        container: &ContainerRef,
        credentials: &Credentials,
    ) -> LifecycleResult<()>;
}

/// Opens sessions against a container's remote-management endpoint.
#[async_trait]
pub trait RemoteManagement: Send + Sync + 'static {
    /// Fails with [`RemoteError::Authentication`] when credentials are rejected.
    async fn connect(
        &self,
        endpoint: &str,
        credentials: Option<&Credentials>,
    ) -> Result<Box<dyn RemoteSession>, RemoteError>;
}

/// An open remote-management session.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Identifiers of every management object currently registered.
    async fn list_objects(&self) -> Result<Vec<String>, RemoteError>;

    async fn invoke(
        &self,
        object: &str,
        operation: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, RemoteError>;
}

/// Cached management credentials.
#[async_trait]
pub trait CredentialStore: Send + Sync + 'static {
    fn get(&self) -> Option<Credentials>;

    /// Ask the operator for new credentials.
    async fn prompt(&self, container: &ContainerRef) -> Option<Credentials>;

    fn clear(&self);
}

/// Orderly termination of this process under an external supervisor.
pub trait ProcessRestart: Send + Sync + 'static {
    fn request_restart(&self) -> LifecycleResult<()>;
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}
