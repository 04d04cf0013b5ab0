#![allow(clippy::cognitive_complexity)]
use std::{process::ExitCode, sync::Arc};

use anyhow::{Context, Result};
use tokio::runtime::Builder;
use tokio_util::sync::CancellationToken;
use tracing::*;

mod cli;
mod commands;
mod startup;
mod trace;

use cli::{Command, Parser};
use commands::{CommandContext, Exit, Session};
use nats_fleet::ControlSubjects;
use registry_session::NatsConnector;

#[cfg(not(target_env = "musl"))]
use jemallocator::Jemalloc;

#[cfg(not(target_env = "musl"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

fn main() -> ExitCode {
    // loaded first so its values act as env fallbacks for the cli
    let dotenv = dotenv::dotenv();
    // parses from cli or environment var
    let config = cli::Config::parse();
    let trace_config = match trace::Config::parse(&config.fleet_log, &config.log_format) {
        Ok(trace_config) => trace_config,
        Err(err) => {
            eprintln!("failed to configure logging: {err:#}");
            return Exit::Config.into();
        }
    };
    debug!(?config, ?trace_config);
    if let Err(err) = dotenv {
        debug!(?err, ".env file not loaded");
    }

    let mut builder = Builder::new_multi_thread();
    // configure thread name & enable IO/time
    builder.thread_name(&config.thread_name).enable_all();
    if let Some(num) = config.threads {
        builder.worker_threads(num);
    }
    let rt = match builder.build() {
        Ok(rt) => rt,
        Err(err) => {
            error!(?err, "failed to build runtime");
            return Exit::Failure.into();
        }
    };

    let exit = rt.block_on(async move {
        match tokio::spawn(async move { start(config).await }).await {
            Err(err) => {
                error!(?err, "command task panicked");
                Exit::Failure
            }
            Ok(Err(err)) => {
                error!(?err, "exited with error");
                eprintln!("error: {err:#}");
                Exit::for_error(&err)
            }
            Ok(Ok(exit)) => {
                debug!(?exit, "exiting...");
                exit
            }
        }
    });
    exit.into()
}

async fn start(config: cli::Config) -> Result<Exit> {
    let paths = config.paths().context("invalid registry root")?;
    let subjects = ControlSubjects::with_prefix(config.subject_prefix.clone())
        .context("invalid control subject prefix")?;
    let connection = config.connection();
    info!(?connection, "using registry");

    let session: Arc<Session> = Arc::new(Session::new(NatsConnector::default()));
    session
        .activate(connection)
        .context("failed to start registry session")?;

    let ctx = CommandContext {
        session: Arc::clone(&session),
        paths,
        subjects,
        container: config.container.clone(),
        lifecycle: config.lifecycle(),
        shutdown: CancellationToken::new(),
    };

    let result = run(&config, &ctx).await;
    session.deactivate().await;
    result
}

async fn run(config: &cli::Config, ctx: &CommandContext) -> Result<Exit> {
    // watch reports the session as it comes up, everything else needs it up
    if !matches!(config.command, Command::Watch) {
        startup::wait_for_registry(ctx.session.availability(), config.startup_timeout())
            .await?;
    }

    match &config.command {
        Command::Stop {
            force,
            remote,
            names,
        } => commands::stop(ctx, names, *force, remote).await,
        Command::Restart {
            force,
            remote,
            names,
        } => commands::restart(ctx, names, *force, remote).await,
        Command::Registry(command) => commands::registry(ctx, command).await,
        Command::Requirements(command) => commands::requirements(ctx, command).await,
        Command::Watch => commands::watch(ctx).await,
    }
}
