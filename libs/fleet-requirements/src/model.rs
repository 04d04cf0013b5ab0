//! Fleet requirements document.
//!
//! Field names follow the camelCase JSON stored in the registry; absent
//! optional fields and empty lists are omitted when writing.

use serde::{Deserialize, Serialize};

/// Desired shape of the fleet: instance bounds per profile plus the hosts
/// new containers may be provisioned on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetRequirements {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub profile_requirements: Vec<ProfileRequirements>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_configuration: Option<SshConfiguration>,
}

impl FleetRequirements {
    pub fn profile(&self, profile: &str) -> Option<&ProfileRequirements> {
        self.profile_requirements
            .iter()
            .find(|r| r.profile == profile)
    }

    /// Insert or replace the requirements for `requirements.profile`,
    /// keeping the list sorted by profile.
    pub fn upsert(&mut self, requirements: ProfileRequirements) {
        match self
            .profile_requirements
            .iter_mut()
            .find(|r| r.profile == requirements.profile)
        {
            Some(existing) => *existing = requirements,
            None => self.profile_requirements.push(requirements),
        }
        self.profile_requirements
            .sort_by(|a, b| a.profile.cmp(&b.profile));
    }

    /// Drop profiles that carry no requirement at all.
    pub fn remove_empty(&mut self) {
        self.profile_requirements.retain(|r| !r.is_empty());
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRequirements {
    pub profile: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_instances: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum_instances: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum_instances_per_host: Option<u32>,
    /// Profiles that must be running before this one is scaled up.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependent_profiles: Vec<String>,
}

impl ProfileRequirements {
    pub fn new(profile: impl Into<String>) -> Self {
        Self {
            profile: profile.into(),
            ..Default::default()
        }
    }

    pub fn minimum(mut self, instances: u32) -> Self {
        self.minimum_instances = Some(instances);
        self
    }

    pub fn maximum(mut self, instances: u32) -> Self {
        self.maximum_instances = Some(instances);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.minimum_instances.is_none()
            && self.maximum_instances.is_none()
            && self.maximum_instances_per_host.is_none()
            && self.dependent_profiles.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshConfiguration {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<SshHostConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshHostConfiguration {
    pub host_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum_container_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Auto-scaler's view of how far each profile is from its requirements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoScaleStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub profile_statuses: Vec<AutoScaleProfileStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoScaleProfileStatus {
    pub profile: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
