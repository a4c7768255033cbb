use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::trace;

use super::manager::SessionManager;

const MIN_PERIOD: Duration = Duration::from_millis(100);

/// Runs [`SessionManager::heartbeat_sweep`] every `period` until aborted.
/// The first sweep happens one full period after start.
pub(super) fn spawn(manager: SessionManager, period: Duration) -> JoinHandle<()> {
    let period = period.max(MIN_PERIOD);
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let report = manager.heartbeat_sweep().await;
            trace!(
                delivered = report.delivered,
                deferred = report.deferred,
                dropped = report.dropped,
                "Heartbeat tick"
            );
        }
    })
}
