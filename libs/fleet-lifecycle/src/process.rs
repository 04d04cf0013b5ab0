//! Self-restart through an external supervisor.
//!
//! The process cannot stop and start itself through the code path that is
//! being stopped. Instead it raises a process-wide flag and cancels its
//! root token; the binary exits with a dedicated status and the
//! supervisor starts it again.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::LifecycleResult;
use crate::fleet::ProcessRestart;

static RESTART_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Whether any [`SupervisorRestart`] in this process has fired.
pub fn restart_requested() -> bool {
    RESTART_REQUESTED.load(Ordering::SeqCst)
}

#[derive(Debug, Clone)]
pub struct SupervisorRestart {
    shutdown: CancellationToken,
}

impl SupervisorRestart {
    /// `shutdown` is the token the process's main loop exits on.
    pub fn new(shutdown: CancellationToken) -> Self {
        Self { shutdown }
    }
}

impl ProcessRestart for SupervisorRestart {
    fn request_restart(&self) -> LifecycleResult<()> {
        RESTART_REQUESTED.store(true, Ordering::SeqCst);
        warn!(
            "automated process restart relies on an external supervisor; \
             without one the container must be restarted manually"
        );
        self.shutdown.cancel();
        Ok(())
    }
}
