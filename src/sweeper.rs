use std::sync::Weak;
use std::time::Duration;

use crate::cache::ReadCache;
use crate::lock::LockCoordinator;

/// Background task that periodically purges expired coordinator leases and
/// cache entries. Holds only weak references: when the owning engine is
/// dropped, the task exits on its next tick.
pub async fn run_sweeper(
    locks: Weak<dyn LockCoordinator>,
    cache: Weak<dyn ReadCache>,
    every: Duration,
) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        let (Some(locks), Some(cache)) = (locks.upgrade(), cache.upgrade()) else {
            return;
        };
        let purged_locks = locks.sweep().await;
        let purged_entries = cache.sweep().await;
        if purged_locks > 0 || purged_entries > 0 {
            tracing::debug!("sweep purged {purged_locks} locks, {purged_entries} cache entries");
        }
    }
}
