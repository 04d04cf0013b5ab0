//! The seam between the session manager and a concrete registry client.
//!
//! A [`Connector`] builds one [`CoordinationClient`] per configuration
//! epoch and reports everything that happens to it through an
//! [`EventSink`]. The session manager never talks to a client library
//! directly, so a fake connector is enough to exercise it in tests.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::trace;

use crate::config::ConnectionConfig;
use crate::error::{CoordinationError, CoordinationResult};

/// Connection states reported by a registry client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not connected, the client is trying to get back.
    Disconnected,
    /// Initial connection in progress.
    Connecting,
    /// First successful connection of this client.
    Connected,
    /// Connected to a member that only serves reads.
    ReadOnly,
    /// Connected again after a disconnect.
    Reconnected,
    /// The client gave up; it must be rebuilt.
    Lost,
}

impl ConnectionState {
    /// Returns true for every state in which reads are served.
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connected | ConnectionState::ReadOnly | ConnectionState::Reconnected
        )
    }

    /// Gauge value exported through metrics.
    pub fn as_gauge(&self) -> i64 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::ReadOnly => 3,
            ConnectionState::Reconnected => 4,
            ConnectionState::Lost => -1,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "DISCONNECTED"),
            ConnectionState::Connecting => write!(f, "CONNECTING"),
            ConnectionState::Connected => write!(f, "CONNECTED"),
            ConnectionState::ReadOnly => write!(f, "READ_ONLY"),
            ConnectionState::Reconnected => write!(f, "RECONNECTED"),
            ConnectionState::Lost => write!(f, "LOST"),
        }
    }
}

/// Something a client reports asynchronously.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Connection state transition.
    State(ConnectionState),
    /// Error the client library could not handle itself.
    Error(CoordinationError),
}

/// Event tagged with the generation of the client that produced it.
#[derive(Debug, Clone)]
pub(crate) struct TaggedEvent {
    pub(crate) generation: u64,
    pub(crate) event: ClientEvent,
}

/// Handed to a [`Connector`] so the client it builds can report events.
///
/// Events from a client that has since been replaced are dropped by the
/// session manager, so a sink may outlive its client harmlessly.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<TaggedEvent>,
}

impl EventSink {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<TaggedEvent>) -> Self {
        Self { generation, tx }
    }

    /// Generation of the client this sink belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Report a connection state transition.
    pub fn state(&self, state: ConnectionState) {
        self.emit(ClientEvent::State(state));
    }

    /// Report an unhandled client error.
    pub fn error(&self, err: CoordinationError) {
        self.emit(ClientEvent::Error(err));
    }

    pub fn emit(&self, event: ClientEvent) {
        if self
            .tx
            .send(TaggedEvent {
                generation: self.generation,
                event,
            })
            .is_err()
        {
            trace!(generation = self.generation, "session worker gone, event dropped");
        }
    }
}

/// A live registry client owned by the session manager.
#[async_trait]
pub trait CoordinationClient: Send + Sync + 'static {
    /// Whether the client currently serves requests.
    fn is_connected(&self) -> bool;

    /// Stop the client and release its connection. Must be idempotent.
    async fn close(&self);
}

/// Builds registry clients from a [`ConnectionConfig`].
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Client: CoordinationClient;

    /// Build and start a client. State transitions and unhandled errors
    /// after this returns are reported through `events`.
    async fn connect(
        &self,
        config: &ConnectionConfig,
        events: EventSink,
    ) -> CoordinationResult<Self::Client>;
}

/// Typed read access to the coordination registry.
///
/// Paths are slash-delimited, e.g. `/fleet/registry/containers/status/web1/pid`.
#[async_trait]
pub trait RegistryHandle: Send + Sync {
    /// Whether a node exists at `path`.
    async fn exists(&self, path: &str) -> CoordinationResult<bool>;

    /// Names of the direct children of `path`, sorted.
    async fn children(&self, path: &str) -> CoordinationResult<Vec<String>>;

    /// Data stored at `path`. Missing nodes are [`CoordinationError::NoNode`].
    async fn read_data(&self, path: &str) -> CoordinationResult<Vec<u8>>;
}
