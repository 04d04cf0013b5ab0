//! # registry-session
//!
//! Managed session to the fleet coordination registry.
//!
//! This library provides:
//! - **Session manager** owning exactly one live registry client, swapping
//!   it atomically when the connection configuration changes and
//!   rebuilding it when the connection is lost.
//! - **Durable state listeners** that survive client swaps and get a
//!   synthetic `CONNECTED` when registered late.
//! - **Bounded retry** of client builds after host-resolution failures.
//! - **Path resolver** mapping logical registry nodes to paths under a
//!   configurable root.
//! - **NATS backend** storing the registry tree in a JetStream KV bucket.
//!
//! ## Design Principles
//!
//! - Dependents never hold a client across a swap; they re-fetch it.
//! - All client builds and teardowns run on one worker, one at a time.
//! - The backend sits behind the [`Connector`] seam so the manager can be
//!   driven by a fake in tests.

pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod nats;
pub mod paths;
pub mod session;

// Re-export key types for convenient access
pub use client::{
    ClientEvent, ConnectionState, Connector, CoordinationClient, EventSink, RegistryHandle,
};
pub use config::ConnectionConfig;
pub use error::{CoordinationError, CoordinationResult};
pub use nats::{NatsConnector, NatsRegistryClient};
pub use paths::{Node, RegistryPaths};
pub use session::{ListenerId, SessionManager, SessionState, SessionStats};
