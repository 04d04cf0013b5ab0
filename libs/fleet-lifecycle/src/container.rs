use serde::{Deserialize, Serialize};

use crate::error::{LifecycleError, LifecycleResult};

/// Provider scheme of containers reached over SSH; they cannot restart themselves.
pub const SSH_SCHEME: &str = "ssh";

/// One fleet member, as resolved for a single batch invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRef {
    pub name: String,
    /// Participates in the registry's quorum.
    #[serde(default)]
    pub ensemble_member: bool,
    /// Reachable through the local control path.
    #[serde(default = "default_true")]
    pub managed: bool,
    /// A root instance rather than a child of another container.
    #[serde(default = "default_true")]
    pub root: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_scheme: Option<String>,
    /// Remote-management endpoint used by the fallback path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_endpoint: Option<String>,
}

fn default_true() -> bool {
    true
}

impl ContainerRef {
    /// A managed root container with no remote endpoint.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ensemble_member: false,
            managed: true,
            root: true,
            provider_scheme: None,
            remote_endpoint: None,
        }
    }

    pub fn ensemble(mut self) -> Self {
        self.ensemble_member = true;
        self
    }

    pub fn unmanaged(mut self) -> Self {
        self.managed = false;
        self
    }

    pub fn child(mut self) -> Self {
        self.root = false;
        self
    }

    pub fn with_provider_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.provider_scheme = Some(scheme.into());
        self
    }

    pub fn with_remote_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.remote_endpoint = Some(endpoint.into());
        self
    }

    pub fn is_ssh(&self) -> bool {
        self.provider_scheme.as_deref() == Some(SSH_SCHEME)
    }

    /// Only a root container not provisioned over SSH can restart itself.
    pub fn can_restart_itself(&self) -> bool {
        self.root && !self.is_ssh()
    }
}

impl std::fmt::Display for ContainerRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Container names: lowercase alphanumerics, then `_` or `-` allowed.
pub fn validate_container_name(name: &str) -> LifecycleResult<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_lowercase() || first.is_ascii_digit() => chars
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-'),
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(LifecycleError::Validation(format!(
            "container name '{name}' is invalid; names must match ^[a-z0-9]+[a-z0-9_-]*$"
        )))
    }
}

/// Whether `pattern` needs glob expansion rather than a direct lookup.
pub fn is_glob_pattern(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}
