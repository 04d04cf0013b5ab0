//! Registry session metrics.
//!
//! Metrics are lazily initialized on first access via `lazy_static!`.
//! Registration failures are fatal (`.unwrap()`), a duplicate metric name
//! is a programming error.

use lazy_static::lazy_static;
use prometheus::{IntCounter, IntGauge, register_int_counter, register_int_gauge};

lazy_static! {
    /// Count of registry clients built (initial, config swap or rebuild)
    pub static ref SESSION_CLIENT_BUILDS: IntCounter = register_int_counter!(
        "registry_session_client_builds",
        "count of coordination registry clients built"
    ).unwrap();

    /// Count of client builds that failed
    pub static ref SESSION_CLIENT_BUILD_ERRORS: IntCounter = register_int_counter!(
        "registry_session_client_build_errors",
        "count of coordination registry client builds that failed"
    ).unwrap();

    /// Count of bounded retries after host-resolution failures
    pub static ref SESSION_RETRIES: IntCounter = register_int_counter!(
        "registry_session_retries",
        "count of client rebuild retries after host-resolution failures"
    ).unwrap();

    /// Count of LOST transitions observed
    pub static ref SESSION_LOST: IntCounter = register_int_counter!(
        "registry_session_lost",
        "count of LOST connection transitions"
    ).unwrap();

    /// Last observed connection state (see `ConnectionState::as_gauge`)
    pub static ref SESSION_CONNECTION_STATE: IntGauge = register_int_gauge!(
        "registry_session_connection_state",
        "last observed registry connection state"
    ).unwrap();
}
