use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ulid::Ulid;

use crate::core::CoreError;
use crate::model::{Ms, now_ms};

/// Named, TTL-bounded mutual exclusion. Workflow-level guard on top of the
/// store's row locks — it keeps two logical operations (e.g. two cancels of
/// the same booking) from interleaving across transactions. Implementations
/// may be process-local or distributed; workflows only see this trait.
#[async_trait]
pub trait LockCoordinator: Send + Sync {
    /// Try to take `key` for `hold`. Returns false if someone else holds an
    /// unexpired lock on it.
    async fn acquire(&self, key: &str, hold: Duration, holder: &str) -> bool;

    /// Release `key` if `holder` owns it. A stale holder cannot release a
    /// lock that has since been re-acquired by someone else.
    async fn release(&self, key: &str, holder: &str) -> bool;

    /// Purge expired entries so a stuck holder cannot starve a key forever.
    /// Returns the number purged.
    async fn sweep(&self) -> usize;
}

/// Polling options for [`with_lock`].
#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
    pub hold: Duration,
    pub max_wait: Duration,
    pub poll: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            hold: Duration::from_secs(30),
            max_wait: Duration::from_secs(5),
            poll: Duration::from_millis(100),
        }
    }
}

/// Run `op` under the named lock, polling until acquisition or `max_wait`.
/// The lock is held with a generated holder token and always released when
/// `op` returns — including when it panics or the future is dropped, via a
/// lease guard whose drop path hands the release to a spawned task.
pub async fn with_lock<T, F, Fut>(
    locks: Arc<dyn LockCoordinator>,
    key: &str,
    opts: LockOptions,
    op: F,
) -> Result<T, CoreError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, CoreError>>,
{
    let holder = format!("holder-{}", Ulid::new());
    let started = Instant::now();

    loop {
        if locks.acquire(key, opts.hold, &holder).await {
            let lease = LockLease {
                locks: Arc::clone(&locks),
                key: key.to_string(),
                holder: holder.clone(),
                released: false,
            };
            let result = op().await;
            lease.release().await;
            return result;
        }
        if started.elapsed() >= opts.max_wait {
            metrics::counter!(crate::observability::LOCK_TIMEOUTS_TOTAL).increment(1);
            return Err(CoreError::LockTimeout(key.to_string()));
        }
        tokio::time::sleep(opts.poll).await;
    }
}

/// Keeps a named lock held exactly as long as `op` runs. `Drop` cannot
/// await, so the unwind/cancellation path releases on a spawned task; the
/// hold TTL still bounds the window if even that cannot run.
struct LockLease {
    locks: Arc<dyn LockCoordinator>,
    key: String,
    holder: String,
    released: bool,
}

impl LockLease {
    async fn release(mut self) {
        self.locks.release(&self.key, &self.holder).await;
        self.released = true;
    }
}

impl Drop for LockLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let locks = Arc::clone(&self.locks);
        let key = std::mem::take(&mut self.key);
        let holder = std::mem::take(&mut self.holder);
        tokio::spawn(async move {
            locks.release(&key, &holder).await;
        });
    }
}

struct LockEntry {
    holder: String,
    expires_at: Ms,
}

/// In-process coordinator: a map of named leases, valid within one process.
/// Multi-instance deployments swap in a distributed implementation of
/// [`LockCoordinator`] instead.
pub struct MemoryLockCoordinator {
    locks: DashMap<String, LockEntry>,
}

impl Default for MemoryLockCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLockCoordinator {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Whether `key` is currently held. Drops the entry if it expired.
    pub fn is_locked(&self, key: &str) -> bool {
        let now = now_ms();
        let held = self
            .locks
            .get(key)
            .is_some_and(|entry| now < entry.expires_at);
        if !held {
            let _ = self.locks.remove_if(key, |_, e| now >= e.expires_at);
        }
        held
    }
}

#[async_trait]
impl LockCoordinator for MemoryLockCoordinator {
    async fn acquire(&self, key: &str, hold: Duration, holder: &str) -> bool {
        let now = now_ms();
        let lease = LockEntry {
            holder: holder.to_string(),
            expires_at: now + hold.as_millis() as Ms,
        };
        match self.locks.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if now < occupied.get().expires_at {
                    return false;
                }
                // Expired lease: steal it.
                occupied.insert(lease);
                true
            }
            Entry::Vacant(vacant) => {
                vacant.insert(lease);
                true
            }
        }
    }

    async fn release(&self, key: &str, holder: &str) -> bool {
        self.locks
            .remove_if(key, |_, entry| entry.holder == holder)
            .is_some()
    }

    async fn sweep(&self) -> usize {
        let now = now_ms();
        let before = self.locks.len();
        self.locks.retain(|_, entry| now < entry.expires_at);
        before - self.locks.len()
    }
}
