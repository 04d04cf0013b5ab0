//! Global tracing subscriber.
//!
//! Everything is written to stderr; stdout carries command output only.

use std::io;

use anyhow::Result;
use tracing_subscriber::{
    filter::EnvFilter,
    fmt::{
        self,
        format::{Format, PrettyFields},
    },
    prelude::__tracing_subscriber_SubscriberExt,
    util::SubscriberInitExt,
};

/// Output style chosen with `--log-format`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
    /// Unstructured single-line output, also used for unknown names.
    Standard,
}

impl LogFormat {
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            _ => LogFormat::Standard,
        }
    }
}

/// The subscriber that was installed.
#[derive(Debug)]
pub struct Config {
    pub log_format: LogFormat,
}

impl Config {
    /// Install the global subscriber; call once, before anything logs.
    pub fn parse(fleet_log: &str, log_format: &str) -> Result<Self> {
        let log_format = LogFormat::from_name(log_format);
        let registry = tracing_subscriber::registry().with(env_filter(fleet_log)?);
        match log_format {
            LogFormat::Json => registry
                .with(fmt::layer().json().with_writer(io::stderr))
                .init(),
            LogFormat::Pretty => registry
                .with(
                    fmt::layer()
                        .event_format(Format::default().pretty().with_source_location(false))
                        .fmt_fields(PrettyFields::new())
                        .with_writer(io::stderr),
                )
                .init(),
            LogFormat::Standard => registry
                .with(fmt::layer().with_writer(io::stderr))
                .init(),
        }
        Ok(Self { log_format })
    }
}

/// `fleet_log` takes `RUST_LOG` syntax; an unparsable value falls back to
/// `info`. HTTP and TLS internals stay quiet either way.
fn env_filter(fleet_log: &str) -> Result<EnvFilter> {
    Ok(EnvFilter::try_new(fleet_log)
        .or_else(|_| EnvFilter::try_new("info"))?
        .add_directive("hyper=off".parse()?)
        .add_directive("rustls=off".parse()?))
}
