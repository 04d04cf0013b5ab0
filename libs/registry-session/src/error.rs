//! Error types for coordination registry operations.
//!
//! Consumers can tell transport hiccups, configuration mistakes and
//! missing registry nodes apart without seeing the client library's own
//! error types.

use thiserror::Error;

/// Top-level error type for the registry-session crate.
#[derive(Debug, Clone, Error)]
pub enum CoordinationError {
    /// Connection or transport-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Operation timed out waiting for a response.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The client could not resolve one of the configured endpoints.
    ///
    /// Fatal to the underlying client; the session manager retries it up
    /// to `retry_max` times.
    #[error("host resolution failed: {0}")]
    HostResolution(String),

    /// The client was used before it finished starting.
    #[error("client is not started")]
    NotStarted,

    /// Codec error while decoding registry data.
    #[error("codec error: {0}")]
    Codec(String),

    /// Configuration error (e.g. empty endpoint list).
    #[error("configuration error: {0}")]
    Config(String),

    /// No client is currently connected.
    #[error("not connected: {0}")]
    NotConnected(String),

    /// The requested registry node does not exist.
    #[error("no node at '{0}'")]
    NoNode(String),

    /// Maximum retry attempts exhausted.
    #[error("max retries exhausted after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
}

impl CoordinationError {
    /// Returns true for the narrow endpoint-resolution failure the session
    /// manager retries instead of giving up.
    pub fn is_host_resolution(&self) -> bool {
        matches!(self, CoordinationError::HostResolution(_))
    }

    /// Returns true if the client library recovers from this on its own.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CoordinationError::NotStarted)
    }
}

/// Shorthand result alias for coordination operations.
pub type CoordinationResult<T> = Result<T, CoordinationError>;
