//! # fleet-lifecycle
//!
//! Stops and restarts batches of fleet containers by name.
//!
//! The registry is the source of truth for whether a stopped container
//! has really gone away: restarts wait for the container's liveness
//! marker to disappear before starting it again. Containers the local
//! control path cannot handle are restarted through their own remote
//! management endpoint, and the container running this process is
//! restarted last, through an external supervisor.

pub mod config;
pub mod container;
pub mod error;
pub mod fleet;
pub mod metrics;
pub mod orchestrator;
pub mod process;
pub mod remote;
pub mod report;
pub mod restart;
pub mod stop;

#[cfg(test)]
mod fakes;

pub use config::{LifecycleConfig, RemoteRestartConfig};
pub use container::{ContainerRef, is_glob_pattern, validate_container_name};
pub use error::{LifecycleError, LifecycleResult, RemoteError};
pub use fleet::{
    ContainerControl, CredentialStore, Credentials, FleetMembership, ProcessRestart,
    RemoteManagement, RemoteSession,
};
pub use orchestrator::{Collaborators, LifecycleOrchestrator};
pub use process::{SupervisorRestart, restart_requested};
pub use report::{LifecycleBatchResult, Outcome, format_list};
pub use restart::Quiesce;
pub use stop::StopOutcome;
