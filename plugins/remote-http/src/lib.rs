#![warn(
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![deny(rustdoc::broken_intra_doc_links)]
//! # remote-http
//!
//! Remote management of containers the fleet cannot control directly,
//! through the JSON-over-HTTP bridge each container exposes, plus the
//! operator credential cache used to authenticate against it.

pub mod credentials;
pub mod management;

pub use credentials::PromptingCredentials;
pub use management::{DEFAULT_TIMEOUT, HttpRemoteManagement};
