//! Sweep Task
//!
//! Background task that periodically runs a cache's eviction policies,
//! independent of caller traffic.

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, trace};

/// Spawns a task that calls `sweep` every `interval` until told to stop.
///
/// `sweep` returns the number of entries it removed, or `None` once the
/// cache it belongs to has been dropped. The task also stops when `stop`
/// fires or its sender is dropped. The ticker is owned by the task and is
/// released when the task returns.
///
/// # Arguments
/// * `runtime` - Runtime to spawn onto
/// * `interval` - Period between sweeps, must be non-zero
/// * `stop` - Shutdown signal
/// * `sweep` - Runs one sweep under the cache lock
pub(crate) fn spawn_sweep_task<F>(
    runtime: &Handle,
    interval: Duration,
    mut stop: oneshot::Receiver<()>,
    mut sweep: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Option<usize> + Send + 'static,
{
    runtime.spawn(async move {
        info!("Starting background sweep task with interval of {:?}", interval);

        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut stop => break,
                _ = ticker.tick() => {
                    match sweep() {
                        Some(0) => trace!("Background sweep: nothing to remove"),
                        Some(removed) => debug!("Background sweep: removed {} entries", removed),
                        None => break,
                    }
                }
            }
        }

        info!("Background sweep task stopped");
    })
}
