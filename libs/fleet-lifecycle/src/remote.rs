//! Remote-management fallback for containers outside the local control path.

use serde_json::json;
use tracing::{error, info, warn};

use crate::container::ContainerRef;
use crate::error::{LifecycleError, LifecycleResult};
use crate::fleet::RemoteSession;
use crate::metrics;
use crate::orchestrator::LifecycleOrchestrator;
use crate::report::{LifecycleBatchResult, Outcome};

/// Operation setting a system property on the control object.
pub const SET_PROPERTY_OPERATION: &str = "setSystemProperty";

/// Operation stopping bundles on the framework object; bundle 0 is the runtime itself.
pub const STOP_BUNDLES_OPERATION: &str = "stopBundles";

/// First object whose identifier contains `pattern`.
///
/// Identifiers are scanned in the order the session listed them; when
/// several match, the first one wins.
pub fn find_management_object<'a>(objects: &'a [String], pattern: &str) -> Option<&'a str> {
    objects
        .iter()
        .find(|object| object.contains(pattern))
        .map(String::as_str)
}

impl LifecycleOrchestrator {
    /// Remote restart whose outcome is recorded rather than returned.
    pub(crate) async fn restart_remote_into(
        &self,
        container: &ContainerRef,
        result: &mut LifecycleBatchResult,
    ) {
        match self.restart_remote(container).await {
            Ok(()) => result.record(container, Outcome::RestartedRemotely),
            Err(err) => {
                error!(container = %container, error = %err, "remote restart failed");
                result.record(container, Outcome::Failed);
            }
        }
    }

    /// Ask a container's own runtime to restart through remote management.
    pub async fn restart_remote(&self, container: &ContainerRef) -> LifecycleResult<()> {
        let endpoint = container.remote_endpoint.as_deref().ok_or_else(|| {
            LifecycleError::operation(&container.name, "no remote-management endpoint advertised")
        })?;
        let remote = &self.config.remote;

        let session = self.open_remote_session(container, endpoint).await?;
        let objects = session.list_objects().await?;
        let framework = find_management_object(&objects, &remote.framework_object_pattern)
            .ok_or_else(|| {
                LifecycleError::operation(
                    &container.name,
                    format!(
                        "no management object matching '{}'",
                        remote.framework_object_pattern
                    ),
                )
            })?;

        session
            .invoke(
                &remote.control_object,
                SET_PROPERTY_OPERATION,
                vec![json!(remote.restart_property), json!("true")],
            )
            .await?;
        warn!(
            container = %container,
            "automated restart support is not universally available; restart the container manually if it does not come back"
        );
        session
            .invoke(framework, STOP_BUNDLES_OPERATION, vec![json!([0])])
            .await?;

        info!(container = %container, %endpoint, "remote restart requested");
        Ok(())
    }

    /// Connect with cached credentials; after an authentication failure,
    /// clear them, prompt once and try exactly one more time.
    async fn open_remote_session(
        &self,
        container: &ContainerRef,
        endpoint: &str,
    ) -> LifecycleResult<Box<dyn RemoteSession>> {
        let credentials = self.credentials.get();
        match self.remote.connect(endpoint, credentials.as_ref()).await {
            Ok(session) => Ok(session),
            Err(err) if err.is_authentication() => {
                warn!(container = %container, error = %err, "remote credentials rejected");
                metrics::LIFECYCLE_REMOTE_AUTH_RETRIES.inc();
                self.credentials.clear();
                let credentials = self.credentials.prompt(container).await;
                Ok(self.remote.connect(endpoint, credentials.as_ref()).await?)
            }
            Err(err) => Err(err.into()),
        }
    }
}
