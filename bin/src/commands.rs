use std::{
    io::{IsTerminal, Write},
    process::ExitCode,
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use fleet_lifecycle::{
    Collaborators, LifecycleBatchResult, LifecycleError, LifecycleOrchestrator, SupervisorRestart,
    restart_requested,
};
use fleet_requirements::FleetRequirements;
use nats_fleet::{ControlSubjects, NatsContainerControl, RegistryMembership};
use prometheus::TextEncoder;
use registry_session::{
    CoordinationError, NatsConnector, RegistryHandle, RegistryPaths, SessionManager,
};
use remote_http::{HttpRemoteManagement, PromptingCredentials};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cli::{RegistryCommand, RemoteArgs, RequirementsCommand};

pub type Session = SessionManager<NatsConnector>;

/// Process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Success,
    /// A command failed or a container ended in the failed set.
    Failure,
    Config,
    /// This container asked to be restarted; the supervisor acts on this code.
    SelfRestart,
}

impl Exit {
    pub fn code(self) -> u8 {
        match self {
            Exit::Success => 0,
            Exit::Failure => 1,
            Exit::Config => 2,
            Exit::SelfRestart => 3,
        }
    }

    /// Exit status for an error that aborted a command.
    pub fn for_error(err: &anyhow::Error) -> Self {
        let config = err.chain().any(|cause| {
            matches!(
                cause.downcast_ref::<CoordinationError>(),
                Some(CoordinationError::Config(_))
            ) || matches!(
                cause.downcast_ref::<LifecycleError>(),
                Some(
                    LifecycleError::Validation(_)
                        | LifecycleError::Registry(CoordinationError::Config(_))
                )
            )
        });
        if config { Exit::Config } else { Exit::Failure }
    }

    /// Exit status once a batch ran to completion.
    pub fn for_batch(result: &LifecycleBatchResult) -> Self {
        if result.self_restart_requested() && restart_requested() {
            Exit::SelfRestart
        } else if result.has_failures() {
            Exit::Failure
        } else {
            Exit::Success
        }
    }
}

impl From<Exit> for ExitCode {
    fn from(exit: Exit) -> Self {
        ExitCode::from(exit.code())
    }
}

/// Everything a lifecycle command needs besides its arguments.
#[derive(Debug)]
pub struct CommandContext {
    pub session: Arc<Session>,
    pub paths: RegistryPaths,
    pub subjects: ControlSubjects,
    /// Name of the container this process runs in.
    pub container: String,
    pub lifecycle: fleet_lifecycle::LifecycleConfig,
    pub shutdown: CancellationToken,
}

impl CommandContext {
    fn orchestrator(
        &self,
        credentials: PromptingCredentials,
        remote_timeout: Duration,
    ) -> Result<LifecycleOrchestrator> {
        let membership = RegistryMembership::new(
            Arc::clone(&self.session),
            self.paths.clone(),
            self.container.clone(),
        );
        let control = NatsContainerControl::new(
            Arc::clone(&self.session),
            self.subjects.clone(),
            self.paths.clone(),
        );
        let remote = HttpRemoteManagement::new(remote_timeout)
            .context("failed to set up remote management")?;
        let collaborators = Collaborators {
            membership: Arc::new(membership),
            control: Arc::new(control),
            remote: Arc::new(remote),
            credentials: Arc::new(credentials),
            process: Arc::new(SupervisorRestart::new(self.shutdown.clone())),
        };
        let registry: Arc<dyn RegistryHandle> = self.session.clone();
        Ok(LifecycleOrchestrator::new(
            collaborators,
            registry,
            self.paths.clone(),
            self.lifecycle.clone(),
        ))
    }
}

/// Operator credentials from the command line; prompting needs a terminal.
fn credentials(remote: &RemoteArgs) -> PromptingCredentials {
    let interactive = !remote.non_interactive && std::io::stdin().is_terminal();
    PromptingCredentials::new(remote.credentials(), interactive)
}

pub async fn stop(
    ctx: &CommandContext,
    names: &[String],
    force: bool,
    remote: &RemoteArgs,
) -> Result<Exit> {
    let orchestrator = ctx.orchestrator(credentials(remote), remote.timeout())?;
    let result = orchestrator.stop(names, force).await?;
    print_report(&result);
    Ok(Exit::for_batch(&result))
}

pub async fn restart(
    ctx: &CommandContext,
    names: &[String],
    force: bool,
    remote: &RemoteArgs,
) -> Result<Exit> {
    let orchestrator = ctx.orchestrator(credentials(remote), remote.timeout())?;

    let cancel = ctx.shutdown.child_token();
    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if signal::ctrl_c().await.is_ok() {
                warn!("interrupted, cancelling restart");
                cancel.cancel();
            }
        }
    });
    let result = orchestrator.restart(names, force, &cancel).await;
    interrupt.abort();

    let result = result?;
    print_report(&result);
    Ok(Exit::for_batch(&result))
}

pub async fn registry(ctx: &CommandContext, command: &RegistryCommand) -> Result<Exit> {
    match command {
        RegistryCommand::Ls { path } => {
            for child in ctx.session.children(path).await? {
                println!("{child}");
            }
        }
        RegistryCommand::Get { path } => {
            let data = ctx.session.read_data(path).await?;
            println!("{}", String::from_utf8_lossy(&data));
        }
        RegistryCommand::Exists { path } => {
            let exists = ctx.session.exists(path).await?;
            println!("{exists}");
        }
        RegistryCommand::Put { path, data } => {
            let revision = ctx
                .session
                .client()?
                .put(path, data.clone().into_bytes())
                .await?;
            info!(%path, revision, "registry node written");
        }
        RegistryCommand::Rm { path } => {
            ctx.session.client()?.delete(path).await?;
            info!(%path, "registry node removed");
        }
    }
    Ok(Exit::Success)
}

pub async fn requirements(ctx: &CommandContext, command: &RequirementsCommand) -> Result<Exit> {
    let path = ctx.paths.requirements();
    match command {
        RequirementsCommand::Export { indent } => {
            let current = load_requirements(&ctx.session, &path).await?;
            if current.is_none() {
                debug!(%path, "no requirements document stored");
            }
            let mut out = std::io::stdout().lock();
            let current = current.unwrap_or_default();
            fleet_requirements::write_requirements(&mut out, &current, *indent)?;
            out.write_all(b"\n")?;
        }
        RequirementsCommand::Import { file } => {
            let input = std::fs::File::open(file)
                .with_context(|| format!("failed to open {}", file.display()))?;
            let requirements = fleet_requirements::read_requirements(std::io::BufReader::new(input))
                .with_context(|| format!("failed to parse {}", file.display()))?;

            if let Some(current) = load_requirements(&ctx.session, &path).await? {
                if fleet_requirements::equal(&current, &requirements)? {
                    info!(%path, "requirements unchanged");
                    return Ok(Exit::Success);
                }
            }
            let json = fleet_requirements::to_json(&requirements)?;
            let revision = ctx.session.client()?.put(&path, json.into_bytes()).await?;
            info!(
                %path,
                revision,
                profiles = requirements.profile_requirements.len(),
                "requirements imported"
            );
        }
    }
    Ok(Exit::Success)
}

async fn load_requirements(session: &Session, path: &str) -> Result<Option<FleetRequirements>> {
    match session.read_data(path).await {
        Ok(data) => Ok(fleet_requirements::from_json(&String::from_utf8_lossy(&data))?),
        Err(CoordinationError::NoNode(_)) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Log connection-state transitions and availability changes until
/// interrupted, then print the collected metrics.
pub async fn watch(ctx: &CommandContext) -> Result<Exit> {
    let listener = ctx.session.add_listener(|_, state| {
        info!(%state, "registry connection state changed");
    });
    let mut availability = ctx.session.availability();
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => break,
            _ = ctx.shutdown.cancelled() => break,
            changed = availability.changed() => {
                if changed.is_err() {
                    warn!("registry session closed");
                    break;
                }
                match *availability.borrow_and_update() {
                    Some(generation) => info!(generation, "registry client published"),
                    None => warn!("registry client retracted"),
                }
            }
        }
    }
    ctx.session.remove_listener(listener);

    let stats = ctx.session.stats();
    info!(
        builds = stats.builds(),
        publications = stats.publications(),
        retries = stats.retries(),
        "registry session stats"
    );
    let mut buf = String::new();
    TextEncoder::new().encode_utf8(&prometheus::gather(), &mut buf)?;
    print!("{buf}");
    Ok(Exit::Success)
}

/// Advisories, then per-container messages, then the summary lines.
fn report_lines(result: &LifecycleBatchResult) -> Vec<String> {
    result
        .advisories()
        .iter()
        .chain(result.messages())
        .cloned()
        .chain(result.summary_lines())
        .collect()
}

fn print_report(result: &LifecycleBatchResult) {
    for line in report_lines(result) {
        println!("{line}");
    }
    if result.has_failures() {
        error!(failed = ?result.failed(), "batch finished with failures");
    }
}

#[cfg(test)]
mod tests {
    use fleet_lifecycle::{ContainerRef, Outcome};

    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(Exit::Success.code(), 0);
        assert_eq!(Exit::Failure.code(), 1);
        assert_eq!(Exit::Config.code(), 2);
        assert_eq!(Exit::SelfRestart.code(), 3);
    }

    #[test]
    fn test_exit_for_error() {
        let err = anyhow::Error::new(CoordinationError::Config("no endpoints".into()))
            .context("failed to start registry session");
        assert_eq!(Exit::for_error(&err), Exit::Config);

        let err = anyhow::Error::new(LifecycleError::Validation("bad name".into()));
        assert_eq!(Exit::for_error(&err), Exit::Config);

        let err = anyhow::Error::new(CoordinationError::Timeout("slow".into()));
        assert_eq!(Exit::for_error(&err), Exit::Failure);
        assert_eq!(
            Exit::for_error(&anyhow::Error::new(LifecycleError::Cancelled)),
            Exit::Failure
        );
    }

    #[test]
    fn test_exit_for_batch() {
        let mut result = LifecycleBatchResult::new();
        result.record(&ContainerRef::new("web1"), Outcome::Stopped);
        assert_eq!(Exit::for_batch(&result), Exit::Success);
        result.record(&ContainerRef::new("web2"), Outcome::Failed);
        assert_eq!(Exit::for_batch(&result), Exit::Failure);
    }

    #[test]
    fn test_report_order() {
        let mut result = LifecycleBatchResult::new();
        result.note("Container 'web2' already stopped.");
        result.advise("Container zk1 is part of the ensemble.");
        result.record(&ContainerRef::new("web1"), Outcome::Stopped);

        let lines = report_lines(&result);
        assert_eq!(lines[0], "Container zk1 is part of the ensemble.");
        assert_eq!(lines[1], "Container 'web2' already stopped.");
        assert!(lines[2..].iter().any(|l| l.contains("[web1]")));
    }
}
