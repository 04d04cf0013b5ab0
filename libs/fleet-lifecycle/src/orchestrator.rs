//! Batch lifecycle orchestrator.
//!
//! Stop and restart workflows live in their own modules as further
//! `impl LifecycleOrchestrator` blocks; this module holds the wiring and
//! the batch resolution both share.

use std::sync::Arc;

use registry_session::{RegistryHandle, RegistryPaths};
use tracing::{debug, info};

use crate::config::LifecycleConfig;
use crate::container::{ContainerRef, is_glob_pattern, validate_container_name};
use crate::error::{LifecycleError, LifecycleResult};
use crate::fleet::{
    ContainerControl, CredentialStore, FleetMembership, ProcessRestart, RemoteManagement,
};
use crate::metrics;
use crate::report::LifecycleBatchResult;

/// External collaborators the orchestrator drives.
#[derive(Clone)]
pub struct Collaborators {
    pub membership: Arc<dyn FleetMembership>,
    pub control: Arc<dyn ContainerControl>,
    pub remote: Arc<dyn RemoteManagement>,
    pub credentials: Arc<dyn CredentialStore>,
    pub process: Arc<dyn ProcessRestart>,
}

pub struct LifecycleOrchestrator {
    pub(crate) membership: Arc<dyn FleetMembership>,
    pub(crate) control: Arc<dyn ContainerControl>,
    pub(crate) remote: Arc<dyn RemoteManagement>,
    pub(crate) credentials: Arc<dyn CredentialStore>,
    pub(crate) process: Arc<dyn ProcessRestart>,
    pub(crate) registry: Arc<dyn RegistryHandle>,
    pub(crate) paths: RegistryPaths,
    pub(crate) config: LifecycleConfig,
}

impl LifecycleOrchestrator {
    /// `registry` is consulted on every poll, so passing a session manager
    /// keeps the orchestrator on whatever client is current.
    pub fn new(
        collaborators: Collaborators,
        registry: Arc<dyn RegistryHandle>,
        paths: RegistryPaths,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            membership: collaborators.membership,
            control: collaborators.control,
            remote: collaborators.remote,
            credentials: collaborators.credentials,
            process: collaborators.process,
            registry,
            paths,
            config,
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Expand patterns into a de-duplicated list in resolution order.
    ///
    /// Every name is validated before anything is returned, so a single
    /// malformed name fails the batch with no container touched.
    pub async fn resolve_batch(&self, patterns: &[String]) -> LifecycleResult<Vec<ContainerRef>> {
        if patterns.is_empty() {
            return Err(LifecycleError::Validation("no container names given".into()));
        }
        let mut containers: Vec<ContainerRef> = Vec::new();
        for pattern in patterns {
            if !is_glob_pattern(pattern) {
                validate_container_name(pattern)?;
            }
            for container in self.membership.resolve(pattern).await? {
                if !containers.iter().any(|c| c.name == container.name) {
                    containers.push(container);
                }
            }
        }
        for container in &containers {
            validate_container_name(&container.name)?;
        }
        debug!(
            containers = ?containers.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            "resolved batch"
        );
        Ok(containers)
    }

    /// Log the summary and count each container's final outcome once.
    pub(crate) fn finish(&self, result: &LifecycleBatchResult) {
        for outcome in result.outcomes() {
            metrics::LIFECYCLE_OUTCOMES
                .with_label_values(&[outcome.as_label()])
                .inc();
        }
        for line in result.summary_lines() {
            info!("{line}");
        }
    }
}

impl std::fmt::Debug for LifecycleOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleOrchestrator")
            .field("paths", &self.paths)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
