//! Parse from either cli or env var

use std::{path::PathBuf, time::Duration};

pub use clap::Parser;
use clap::{Args, Subcommand};
use fleet_lifecycle::{Credentials, LifecycleConfig};
use registry_session::{ConnectionConfig, RegistryPaths, config as defaults, paths::DEFAULT_ROOT};

/// default log level. Can use this argument or FLEET_LOG env var
pub const DEFAULT_FLEET_LOG: &str = "info";
/// log as "json", "pretty" or "standard" (unstructured)
pub const DEFAULT_LOG_FORMAT: &str = "standard";
/// how long to wait for the first registry client before giving up
pub const DEFAULT_STARTUP_TIMEOUT_MS: u64 = 30_000;
/// tokio worker thread name
pub static DEFAULT_THREAD_NAME: &str = "fleetctl-worker";

#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[clap(author, name = "fleetctl", bin_name = "fleetctl", about, long_about = None)]
/// parses from cli & environment var. fleetctl will load `.env` in the working dir as well
pub struct Config {
    /// comma separated registry endpoints, e.g. nats://10.0.0.1:4222
    #[clap(long, env = "FLEET_SERVERS", default_value = "")]
    pub servers: String,
    /// shared secret presented to the registry
    #[clap(long, env = "FLEET_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
    /// client rebuilds allowed after a host-resolution failure
    #[clap(long, env = "FLEET_RETRY_MAX", default_value_t = defaults::DEFAULT_RETRY_MAX)]
    pub retry_max: u32,
    /// pause before each rebuild attempt
    #[clap(long, env = "FLEET_RETRY_INTERVAL_MS", default_value_t = 500)]
    pub retry_interval_ms: u64,
    #[clap(long, env = "FLEET_CONNECT_TIMEOUT_MS", default_value_t = 15_000)]
    pub connect_timeout_ms: u64,
    #[clap(long, env = "FLEET_SESSION_TIMEOUT_MS", default_value_t = 60_000)]
    pub session_timeout_ms: u64,
    /// KV bucket holding the registry tree
    #[clap(long, env = "FLEET_BUCKET", default_value = defaults::DEFAULT_BUCKET)]
    pub bucket: String,
    /// root of the registry tree
    #[clap(long, env = "FLEET_REGISTRY_ROOT", default_value = DEFAULT_ROOT)]
    pub registry_root: String,
    /// prefix of container control subjects
    #[clap(long, env = "FLEET_SUBJECT_PREFIX", default_value = nats_fleet::DEFAULT_PREFIX)]
    pub subject_prefix: String,
    /// name of the container this process runs in
    #[clap(long, env = "FLEET_CONTAINER", default_value = "root")]
    pub container: String,
    /// set the log level. All valid RUST_LOG arguments are accepted
    #[clap(long, env = "FLEET_LOG", default_value = DEFAULT_FLEET_LOG)]
    pub fleet_log: String,
    /// log format: json, pretty or standard
    #[clap(long, env = "LOG_FORMAT", default_value = DEFAULT_LOG_FORMAT)]
    pub log_format: String,
    /// how long to wait for a connected registry client
    #[clap(long, env = "FLEET_STARTUP_TIMEOUT_MS", default_value_t = DEFAULT_STARTUP_TIMEOUT_MS)]
    pub startup_timeout_ms: u64,
    /// how long a restart waits for a stopped container to leave the registry
    #[clap(long, env = "FLEET_QUIESCE_TIMEOUT_MS", default_value_t = 120_000)]
    pub quiesce_timeout_ms: u64,
    /// Worker thread name
    #[clap(long, env = "FLEET_THREAD_NAME", default_value = DEFAULT_THREAD_NAME)]
    pub thread_name: String,
    /// number of tokio worker threads, defaults to the number of logical CPUs
    #[clap(long, env = "FLEET_THREADS")]
    pub threads: Option<usize>,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Stop containers by name or glob pattern
    Stop {
        /// also stop ensemble members
        #[clap(long)]
        force: bool,
        #[clap(flatten)]
        remote: RemoteArgs,
        #[clap(required = true)]
        names: Vec<String>,
    },
    /// Restart containers by name or glob pattern
    Restart {
        /// also restart ensemble members
        #[clap(long)]
        force: bool,
        #[clap(flatten)]
        remote: RemoteArgs,
        #[clap(required = true)]
        names: Vec<String>,
    },
    /// Inspect or edit registry nodes
    #[clap(subcommand)]
    Registry(RegistryCommand),
    /// Export or import the fleet requirements document
    #[clap(subcommand)]
    Requirements(RequirementsCommand),
    /// Log every registry connection-state transition until interrupted
    Watch,
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct RemoteArgs {
    /// management user; stop also pushes these credentials to each container
    #[clap(long, env = "FLEET_REMOTE_USER")]
    pub remote_user: Option<String>,
    #[clap(long, env = "FLEET_REMOTE_PASSWORD", hide_env_values = true)]
    pub remote_password: Option<String>,
    /// per-request timeout for remote management
    #[clap(long, default_value_t = remote_http::DEFAULT_TIMEOUT.as_millis() as u64)]
    pub remote_timeout_ms: u64,
    /// never prompt for remote credentials
    #[clap(long)]
    pub non_interactive: bool,
}

impl RemoteArgs {
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.remote_user, &self.remote_password) {
            (Some(user), password) => Some(Credentials::new(
                user.clone(),
                password.clone().unwrap_or_default(),
            )),
            (None, _) => None,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum RegistryCommand {
    /// List the children of a node
    Ls { path: String },
    /// Print a node's data
    Get { path: String },
    /// Print whether a node exists
    Exists { path: String },
    /// Write a node's data
    Put { path: String, data: String },
    /// Remove a node
    Rm { path: String },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum RequirementsCommand {
    /// Print the requirements document
    Export {
        #[clap(long)]
        indent: bool,
    },
    /// Replace the requirements document with the contents of a file
    Import { file: PathBuf },
}

impl Config {
    pub fn connection(&self) -> ConnectionConfig {
        let mut conn = ConnectionConfig::from_server_list(&self.servers);
        conn.password = self.password.clone();
        conn.retry_max = self.retry_max;
        conn.retry_interval = Duration::from_millis(self.retry_interval_ms);
        conn.connect_timeout = Duration::from_millis(self.connect_timeout_ms);
        conn.session_timeout = Duration::from_millis(self.session_timeout_ms);
        conn.bucket = self.bucket.clone();
        conn
    }

    pub fn paths(&self) -> registry_session::CoordinationResult<RegistryPaths> {
        RegistryPaths::new(self.registry_root.clone())
    }

    pub fn lifecycle(&self) -> LifecycleConfig {
        LifecycleConfig {
            quiesce_timeout: Duration::from_millis(self.quiesce_timeout_ms),
            ..Default::default()
        }
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }
}
