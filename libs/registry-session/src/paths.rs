//! Registry path resolver.
//!
//! The registry root is configurable per deployment. The resolver is a pure
//! translator from a logical node to its slash-delimited path, so no
//! hard-coded path strings appear in the lifecycle code.

use crate::error::{CoordinationError, CoordinationResult};

/// Default registry root.
pub const DEFAULT_ROOT: &str = "/fleet";

/// Logical registry nodes used by the fleet tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Node {
    /// Process-identity marker of a running container.
    StatusPid,
    /// Liveness marker of a container.
    Alive,
    /// Container metadata.
    ContainerConfig,
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Node::StatusPid => write!(f, "status_pid"),
            Node::Alive => write!(f, "alive"),
            Node::ContainerConfig => write!(f, "container_config"),
        }
    }
}

/// Maps logical nodes to concrete registry paths under a root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryPaths {
    root: String,
}

impl Default for RegistryPaths {
    fn default() -> Self {
        Self {
            root: DEFAULT_ROOT.to_owned(),
        }
    }
}

impl RegistryPaths {
    /// Create a resolver rooted at `root`.
    ///
    /// The root must be absolute, must not end with `/` and must not
    /// contain unresolved `{…}` placeholders.
    pub fn new(root: impl Into<String>) -> CoordinationResult<Self> {
        let root = root.into();
        if !root.starts_with('/') || root.len() < 2 {
            return Err(CoordinationError::Config(format!(
                "registry root '{root}' must be an absolute path"
            )));
        }
        if root.ends_with('/') {
            return Err(CoordinationError::Config(format!(
                "registry root '{root}' must not end with '/'"
            )));
        }
        if root.contains('{') || root.contains('}') || root.contains("//") {
            return Err(CoordinationError::Config(format!(
                "registry root '{root}' is malformed"
            )));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Resolve a per-container node.
    pub fn resolve(&self, node: Node, container: &str) -> String {
        match node {
            Node::StatusPid => format!(
                "{}/registry/containers/status/{container}/pid",
                self.root
            ),
            Node::Alive => format!("{}/registry/containers/alive/{container}", self.root),
            Node::ContainerConfig => {
                format!("{}/registry/containers/config/{container}", self.root)
            }
        }
    }

    /// Liveness marker polled during quiesce-wait.
    pub fn status_pid(&self, container: &str) -> String {
        self.resolve(Node::StatusPid, container)
    }

    pub fn alive(&self, container: &str) -> String {
        self.resolve(Node::Alive, container)
    }

    pub fn container_config(&self, container: &str) -> String {
        self.resolve(Node::ContainerConfig, container)
    }

    /// Parent node whose children are the known container names.
    pub fn containers_config_root(&self) -> String {
        format!("{}/registry/containers/config", self.root)
    }

    /// Comma-separated list of ensemble members.
    pub fn ensemble_containers(&self) -> String {
        format!("{}/configs/ensemble/containers", self.root)
    }

    /// Fleet requirements document.
    pub fn requirements(&self) -> String {
        format!("{}/configs/requirements.json", self.root)
    }
}
