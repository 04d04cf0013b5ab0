#![warn(
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![deny(rustdoc::broken_intra_doc_links)]
#![allow(clippy::cognitive_complexity)]
//! # nats-fleet
//!
//! Fleet backend over the coordination registry: membership and
//! container metadata read from registry nodes, and stop/start sent to
//! each container's agent as NATS requests.

pub mod control;
pub mod membership;

pub use control::{
    ControlAction, ControlSubjects, ControlTransport, DEFAULT_PREFIX, NatsContainerControl,
};
pub use membership::{ContainerMetadata, RegistryMembership};
