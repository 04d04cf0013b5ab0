//! Error types for fleet lifecycle operations.

use registry_session::CoordinationError;
use thiserror::Error;

/// Result type for lifecycle operations.
pub type LifecycleResult<T> = Result<T, LifecycleError>;

#[derive(Debug, Clone, Error)]
pub enum LifecycleError {
    /// Malformed container name or pattern. Aborts the batch before any action.
    #[error("validation error: {0}")]
    Validation(String),

    /// Ensemble member targeted without `force`.
    #[error("container '{0}' is an ensemble member")]
    ProtectedResource(String),

    /// The control path refused the operation because the container was
    /// not created by the fleet. Routes to the remote fallback.
    #[error("{container}: {message}")]
    Unsupported { container: String, message: String },

    /// Stop, start or remote invoke failed for one container.
    #[error("{container}: {message}")]
    Operation { container: String, message: String },

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Registry(#[from] CoordinationError),

    /// The batch was interrupted by the operator.
    #[error("operation cancelled")]
    Cancelled,
}

impl LifecycleError {
    pub fn operation(container: impl Into<String>, message: impl Into<String>) -> Self {
        LifecycleError::Operation {
            container: container.into(),
            message: message.into(),
        }
    }

    pub fn unsupported(container: impl Into<String>, message: impl Into<String>) -> Self {
        LifecycleError::Unsupported {
            container: container.into(),
            message: message.into(),
        }
    }
}

/// Failures of the remote-management path.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    /// Credentials were rejected.
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("connect failed: {0}")]
    Connect(String),

    /// The endpoint answered with something unusable.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl RemoteError {
    pub fn is_authentication(&self) -> bool {
        matches!(self, RemoteError::Authentication(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            LifecycleError::unsupported("web1", "has not been created by the fleet").to_string(),
            "web1: has not been created by the fleet"
        );
        assert_eq!(
            LifecycleError::ProtectedResource("zk1".into()).to_string(),
            "container 'zk1' is an ensemble member"
        );
        let err: LifecycleError = RemoteError::Connect("refused".into()).into();
        assert_eq!(err.to_string(), "connect failed: refused");
    }

    #[test]
    fn test_authentication_classification() {
        assert!(RemoteError::Authentication("401".into()).is_authentication());
        assert!(!RemoteError::Protocol("bad json".into()).is_authentication());
    }
}
