//! The booking core: journaled in-memory inventory plus the workflows
//! that mutate it. [`BoxOffice`] is the single public handle; it owns the
//! store, the journal writer, the notification hub, and the coordination
//! seams (named locks, read cache).

mod booking;
mod error;
mod events;
mod queries;
mod store;
#[cfg(test)]
mod tests;
mod waitlist;

use std::path::Path;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::info;

use crate::cache::{MemoryCache, ReadCache};
use crate::config::CoreConfig;
use crate::lock::{LockCoordinator, LockOptions, MemoryLockCoordinator};
use crate::model::ChangeEvent;
use crate::notify::NotifyHub;
use crate::sweeper;
use crate::wal::{Wal, WalCommand};

pub use error::CoreError;
pub use events::EventPatch;
pub use store::{InventoryStore, RowGuard};

const WAL_CHANNEL_CAPACITY: usize = 4096;

pub struct BoxOffice {
    pub(crate) store: InventoryStore,
    wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(crate) locks: Arc<dyn LockCoordinator>,
    pub(crate) cache: Arc<dyn ReadCache>,
    pub(crate) config: CoreConfig,
}

impl BoxOffice {
    /// Open (or create) the journal at `wal_path`, replay it into memory,
    /// and spawn the writer and sweeper tasks. Must run inside a tokio
    /// runtime.
    pub fn open(wal_path: &Path, config: CoreConfig) -> Result<Arc<Self>, CoreError> {
        let locks: Arc<dyn LockCoordinator> = Arc::new(MemoryLockCoordinator::new());
        let cache: Arc<dyn ReadCache> = Arc::new(MemoryCache::new());
        Self::open_with(wal_path, config, locks, cache)
    }

    /// Like [`BoxOffice::open`] but with caller-supplied coordination
    /// backends, for deployments that share locks or cache across
    /// processes.
    pub fn open_with(
        wal_path: &Path,
        config: CoreConfig,
        locks: Arc<dyn LockCoordinator>,
        cache: Arc<dyn ReadCache>,
    ) -> Result<Arc<Self>, CoreError> {
        let commits = Wal::replay(wal_path)
            .map_err(|e| CoreError::storage(format!("journal replay failed: {e}")))?;
        let wal = Wal::open(wal_path)
            .map_err(|e| CoreError::storage(format!("journal open failed: {e}")))?;

        let store = InventoryStore::new(config.row_lock_wait);
        let mut replayed = 0usize;
        for commit in &commits {
            for change in commit {
                store.apply(change);
                replayed += 1;
            }
        }
        if replayed > 0 {
            info!(
                commits = commits.len(),
                changes = replayed,
                "replayed journal"
            );
        }

        let (wal_tx, wal_rx) = mpsc::channel(WAL_CHANNEL_CAPACITY);
        tokio::spawn(crate::wal::run_writer(wal, wal_rx));
        tokio::spawn(sweeper::run_sweeper(
            Arc::downgrade(&locks),
            Arc::downgrade(&cache),
            config.sweep_interval,
        ));

        Ok(Arc::new(BoxOffice {
            store,
            wal_tx,
            notify: Arc::new(NotifyHub::new()),
            locks,
            cache,
            config,
        }))
    }

    /// Journal, apply, notify — in that order. Changes in one commit share
    /// a journal frame, so they replay all-or-nothing after a crash. The
    /// caller holds the relevant row locks across this call.
    pub(crate) async fn commit(&self, changes: Vec<ChangeEvent>) -> Result<(), CoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Commit {
                commit: changes.clone(),
                response: tx,
            })
            .await
            .map_err(|_| CoreError::storage("journal writer is gone"))?;
        rx.await
            .map_err(|_| CoreError::storage("journal writer dropped the commit"))?
            .map_err(|e| CoreError::storage(format!("journal write failed: {e}")))?;

        for change in &changes {
            self.store.apply(change);
            self.notify.send(change);
        }
        Ok(())
    }

    /// Rewrite the journal as one snapshot of current committed state.
    pub async fn compact_wal(&self) -> Result<(), CoreError> {
        let commits: Vec<_> = self
            .store
            .snapshot()
            .into_iter()
            .map(|change| vec![change])
            .collect();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                commits,
                response: tx,
            })
            .await
            .map_err(|_| CoreError::storage("journal writer is gone"))?;
        rx.await
            .map_err(|_| CoreError::storage("journal writer dropped the request"))?
            .map_err(|e| CoreError::storage(format!("journal compaction failed: {e}")))
    }

    /// Commits journaled since the last compaction (or open).
    pub async fn wal_commits_since_compact(&self) -> Result<u64, CoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::CommitsSinceCompact { response: tx })
            .await
            .map_err(|_| CoreError::storage("journal writer is gone"))?;
        rx.await
            .map_err(|_| CoreError::storage("journal writer dropped the request"))
    }

    pub(crate) fn lock_options(&self) -> LockOptions {
        LockOptions {
            hold: self.config.lock_hold,
            max_wait: self.config.lock_max_wait,
            poll: self.config.lock_poll,
        }
    }
}
