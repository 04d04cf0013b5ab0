//! Lifecycle orchestrator metrics.
//!
//! Metrics are lazily initialized on first access via `lazy_static!`.
//! Registration failures are fatal (`.unwrap()`).

use lazy_static::lazy_static;
use prometheus::{IntCounter, IntCounterVec, register_int_counter, register_int_counter_vec};

lazy_static! {
    /// Containers per final outcome, labelled `stopped`, `restarted_locally`,
    /// `restarted_remotely` or `failed`
    pub static ref LIFECYCLE_OUTCOMES: IntCounterVec = register_int_counter_vec!(
        "fleet_lifecycle_outcomes",
        "count of containers per lifecycle outcome",
        &["outcome"]
    ).unwrap();

    /// Containers skipped because they are ensemble members
    pub static ref LIFECYCLE_PROTECTED_SKIPS: IntCounter = register_int_counter!(
        "fleet_lifecycle_protected_skips",
        "count of ensemble members skipped without force"
    ).unwrap();

    /// Quiesce-waits that ran into their timeout
    pub static ref LIFECYCLE_QUIESCE_TIMEOUTS: IntCounter = register_int_counter!(
        "fleet_lifecycle_quiesce_timeouts",
        "count of quiesce waits that timed out"
    ).unwrap();

    /// Remote sessions retried after an authentication failure
    pub static ref LIFECYCLE_REMOTE_AUTH_RETRIES: IntCounter = register_int_counter!(
        "fleet_lifecycle_remote_auth_retries",
        "count of remote-management reconnects after credential prompts"
    ).unwrap();
}
