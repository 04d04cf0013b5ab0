//! Fleet membership read from the coordination registry.
//!
//! Known containers are the children of
//! `<root>/registry/containers/config`; each child holds a JSON
//! [`ContainerMetadata`]. Ensemble members are listed, comma separated,
//! at `<root>/configs/ensemble/containers`.

use std::sync::Arc;

use async_trait::async_trait;
use fleet_lifecycle::{
    ContainerRef, FleetMembership, LifecycleError, LifecycleResult, is_glob_pattern,
};
use registry_session::{CoordinationError, RegistryHandle, RegistryPaths};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Per-container metadata stored under the container's config node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerMetadata {
    pub root: bool,
    pub managed: bool,
    /// Provider scheme the container was created with, e.g. `ssh` or `child`.
    pub provider: Option<String>,
    pub remote_endpoint: Option<String>,
    pub parent: Option<String>,
}

impl Default for ContainerMetadata {
    fn default() -> Self {
        Self {
            root: true,
            managed: true,
            provider: None,
            remote_endpoint: None,
            parent: None,
        }
    }
}

impl ContainerMetadata {
    fn into_ref(self, name: &str, ensemble_member: bool) -> ContainerRef {
        ContainerRef {
            name: name.to_owned(),
            ensemble_member,
            managed: self.managed,
            root: self.root && self.parent.is_none(),
            provider_scheme: self.provider,
            remote_endpoint: self.remote_endpoint,
        }
    }
}

#[derive(Debug)]
pub struct RegistryMembership<R> {
    registry: Arc<R>,
    paths: RegistryPaths,
    current: String,
}

impl<R: RegistryHandle + 'static> RegistryMembership<R> {
    /// `current` is the name of the container this process runs in.
    pub fn new(registry: Arc<R>, paths: RegistryPaths, current: impl Into<String>) -> Self {
        Self {
            registry,
            paths,
            current: current.into(),
        }
    }

    async fn ensemble(&self) -> LifecycleResult<Vec<String>> {
        match self
            .registry
            .read_data(&self.paths.ensemble_containers())
            .await
        {
            Ok(data) => Ok(parse_ensemble(&String::from_utf8_lossy(&data))),
            Err(CoordinationError::NoNode(_)) => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }

    async fn metadata(&self, name: &str) -> LifecycleResult<ContainerMetadata> {
        let path = self.paths.container_config(name);
        match self.registry.read_data(&path).await {
            Ok(data) if data.iter().all(u8::is_ascii_whitespace) => {
                Ok(ContainerMetadata::default())
            }
            Ok(data) => serde_json::from_slice(&data).map_err(|err| {
                LifecycleError::from(CoordinationError::Codec(format!(
                    "container metadata at '{path}': {err}"
                )))
            }),
            Err(CoordinationError::NoNode(_)) => Ok(ContainerMetadata::default()),
            Err(err) => Err(err.into()),
        }
    }

    async fn container_ref(
        &self,
        name: &str,
        ensemble: &[String],
    ) -> LifecycleResult<ContainerRef> {
        let member = ensemble.iter().any(|m| m == name);
        Ok(self.metadata(name).await?.into_ref(name, member))
    }
}

#[async_trait]
impl<R: RegistryHandle + 'static> FleetMembership for RegistryMembership<R> {
    async fn resolve(&self, pattern: &str) -> LifecycleResult<Vec<ContainerRef>> {
        let known = self
            .registry
            .children(&self.paths.containers_config_root())
            .await?;
        let names = match_names(&known, pattern)?;
        if names.is_empty() {
            warn!(pattern, "pattern matched no containers");
        }

        let ensemble = self.ensemble().await?;
        let mut containers = Vec::with_capacity(names.len());
        for name in names {
            containers.push(self.container_ref(name, &ensemble).await?);
        }
        debug!(pattern, count = containers.len(), "resolved containers");
        Ok(containers)
    }

    async fn is_ensemble_member(&self, container: &ContainerRef) -> LifecycleResult<bool> {
        Ok(self.ensemble().await?.contains(&container.name))
    }

    async fn current_container(&self) -> LifecycleResult<ContainerRef> {
        let ensemble = self.ensemble().await?;
        self.container_ref(&self.current, &ensemble).await
    }
}

fn parse_ensemble(data: &str) -> Vec<String> {
    data.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Names from `known` selected by `pattern`, in `known` order.
fn match_names<'a>(known: &'a [String], pattern: &str) -> LifecycleResult<Vec<&'a str>> {
    if is_glob_pattern(pattern) {
        let glob = glob::Pattern::new(pattern).map_err(|err| {
            LifecycleError::Validation(format!("invalid container pattern '{pattern}': {err}"))
        })?;
        return Ok(known
            .iter()
            .filter(|name| glob.matches(name))
            .map(String::as_str)
            .collect());
    }
    known
        .iter()
        .find(|name| *name == pattern)
        .map(|name| vec![name.as_str()])
        .ok_or_else(|| LifecycleError::Validation(format!("container '{pattern}' does not exist")))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use async_trait::async_trait;
    use registry_session::CoordinationResult;

    use super::*;

    /// In-memory registry tree keyed by full path.
    #[derive(Default)]
    struct MemoryRegistry {
        nodes: BTreeMap<String, Vec<u8>>,
    }

    impl MemoryRegistry {
        fn with(mut self, path: &str, data: &str) -> Self {
            self.nodes.insert(path.to_owned(), data.as_bytes().to_vec());
            self
        }
    }

    #[async_trait]
    impl RegistryHandle for MemoryRegistry {
        async fn exists(&self, path: &str) -> CoordinationResult<bool> {
            Ok(self.nodes.contains_key(path))
        }

        async fn children(&self, path: &str) -> CoordinationResult<Vec<String>> {
            let prefix = format!("{path}/");
            let mut names: Vec<String> = self
                .nodes
                .keys()
                .filter_map(|k| k.strip_prefix(&prefix))
                .filter_map(|rest| rest.split('/').next())
                .map(str::to_owned)
                .collect();
            names.dedup();
            Ok(names)
        }

        async fn read_data(&self, path: &str) -> CoordinationResult<Vec<u8>> {
            self.nodes
                .get(path)
                .cloned()
                .ok_or_else(|| CoordinationError::NoNode(path.to_owned()))
        }
    }

    fn fleet() -> RegistryMembership<MemoryRegistry> {
        let registry = MemoryRegistry::default()
            .with("/fleet/registry/containers/config/root", "")
            .with(
                "/fleet/registry/containers/config/web1",
                r#"{"provider":"child","parent":"root"}"#,
            )
            .with("/fleet/registry/containers/config/web2", "{}")
            .with(
                "/fleet/registry/containers/config/joined",
                r#"{"managed":false,"remote_endpoint":"http://joined:8181/jolokia"}"#,
            )
            .with("/fleet/registry/containers/config/box", r#"{"provider":"ssh"}"#)
            .with("/fleet/configs/ensemble/containers", "root, box");
        RegistryMembership::new(Arc::new(registry), RegistryPaths::default(), "root")
    }

    #[tokio::test]
    async fn test_resolve_exact_name() {
        let web1 = fleet().resolve("web1").await.unwrap();
        assert_eq!(web1.len(), 1);
        assert!(!web1[0].root);
        assert!(web1[0].managed);
        assert_eq!(web1[0].provider_scheme.as_deref(), Some("child"));
    }

    #[tokio::test]
    async fn test_resolve_glob() {
        let names: Vec<String> = fleet()
            .resolve("web*")
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["web1", "web2"]);
        assert!(fleet().resolve("db*").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_name_is_validation_error() {
        let err = fleet().resolve("nope").await.unwrap_err();
        assert!(matches!(err, LifecycleError::Validation(_)));
        let err = fleet().resolve("web[").await.unwrap_err();
        assert!(matches!(err, LifecycleError::Validation(_)));
    }

    #[tokio::test]
    async fn test_flags_from_metadata_and_ensemble() {
        let membership = fleet();
        let joined = membership.resolve("joined").await.unwrap().remove(0);
        assert!(!joined.managed);
        assert_eq!(
            joined.remote_endpoint.as_deref(),
            Some("http://joined:8181/jolokia")
        );
        let boxed = membership.resolve("box").await.unwrap().remove(0);
        assert!(boxed.ensemble_member);
        assert!(boxed.is_ssh());
        assert!(membership.is_ensemble_member(&boxed).await.unwrap());
        assert!(!membership.is_managed(&joined).await.unwrap());

        let current = membership.current_container().await.unwrap();
        assert_eq!(current.name, "root");
        assert!(current.root && current.ensemble_member);
    }

    #[tokio::test]
    async fn test_corrupt_metadata() {
        let registry = MemoryRegistry::default()
            .with("/fleet/registry/containers/config/bad", "{not json");
        let membership =
            RegistryMembership::new(Arc::new(registry), RegistryPaths::default(), "root");
        let err = membership.resolve("bad").await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::Registry(CoordinationError::Codec(_))
        ));
    }

    #[test]
    fn test_parse_ensemble() {
        assert_eq!(parse_ensemble(" zk1,zk2 ,, zk3"), vec!["zk1", "zk2", "zk3"]);
        assert!(parse_ensemble("").is_empty());
    }
}
