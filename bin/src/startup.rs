use std::time::Duration;

use anyhow::{Result, anyhow};
use tokio::sync::watch;
use tracing::{debug, info};

/// Wait until the session publishes a client, returning its generation.
///
/// Fails if nothing is published within `timeout` or the session shuts
/// down first.
pub async fn wait_for_registry(
    mut availability: watch::Receiver<Option<u64>>,
    timeout: Duration,
) -> Result<u64> {
    debug!(?timeout, "waiting for registry client");
    let wait = availability.wait_for(Option::is_some);
    match tokio::time::timeout(timeout, wait).await {
        Err(_) => Err(anyhow!(
            "registry not available after {}ms",
            timeout.as_millis()
        )),
        Ok(Err(_)) => Err(anyhow!("registry session closed during startup")),
        Ok(Ok(generation)) => {
            let generation = (*generation).unwrap_or_default();
            info!(generation, "registry client available");
            Ok(generation)
        }
    }
}
