use std::sync::Weak;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::LifecycleManager;

pub(crate) fn spawn(
    manager: Weak<LifecycleManager>,
    stop: CancellationToken,
    poll_interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(run(manager, stop, poll_interval))
}

async fn run(manager: Weak<LifecycleManager>, stop: CancellationToken, poll_interval: Duration) {
    info!(poll_secs = poll_interval.as_secs(), "idle watcher started");

    while !stop.is_cancelled() {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = sleep(poll_interval) => {}
        }
        if stop.is_cancelled() {
            break;
        }

        // Manager dropped without a shutdown.
        let Some(manager) = manager.upgrade() else {
            break;
        };
        // A failed cycle must not disable eviction for good.
        if let Err(e) = manager.evict_if_idle() {
            warn!(kind = e.kind(), "idle watcher cycle failed: {e}");
        }
    }

    info!("idle watcher stopped");
}
