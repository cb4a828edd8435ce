//! Allocation transaction manager.
//!
//! [`Allocator`] owns a store handle and a table of per-resource async
//! mutexes. `allocate` holds the resource's mutex across the whole
//! read-check-insert sequence, so two callers can never both pass the
//! conflict check for the same resource before either has inserted.
//! Different resources use different mutexes and never contend.
//!
//! Critical sections run as their own Tokio task holding the guard, so a
//! caller that gives up waiting cannot release the lock while its insert is
//! still in flight.

mod conflict;
mod error;
mod mutations;
mod queries;
mod utilization;
#[cfg(test)]
mod tests;

pub use conflict::{find_conflict, has_conflict};
pub use error::{AllocError, ErrorKind};
pub use queries::{EventSummary, ResourceStatus};
pub use utilization::{UtilizationReport, UtilizationRow};

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;

use crate::model::ResourceId;
use crate::observability;
use crate::store::Store;

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorConfig {
    /// Upper bound on waiting for a resource's critical section.
    pub lock_timeout: Duration,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

type LockTable = Arc<DashMap<ResourceId, Arc<Mutex<()>>>>;

pub struct Allocator<S> {
    store: Arc<S>,
    locks: LockTable,
    config: AllocatorConfig,
}

impl<S: Store> Allocator<S> {
    pub fn new(store: Arc<S>, config: AllocatorConfig) -> Self {
        Self {
            store,
            locks: Arc::new(DashMap::new()),
            config,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    /// Enter the critical section for `resource_id`, waiting at most
    /// `lock_timeout`. Released when the guard drops, on every exit path.
    pub(crate) async fn lock_resource(
        &self,
        resource_id: ResourceId,
    ) -> Result<OwnedMutexGuard<()>, AllocError> {
        // Clone the Arc out first; the DashMap shard must not stay locked across the await.
        let lock = Arc::clone(&self.locks.entry(resource_id).or_default());
        let started = Instant::now();
        match tokio::time::timeout(self.config.lock_timeout, lock.lock_owned()).await {
            Ok(guard) => {
                metrics::histogram!(observability::LOCK_WAIT_SECONDS)
                    .record(started.elapsed().as_secs_f64());
                Ok(guard)
            }
            Err(_) => {
                warn!(
                    "lock timeout on resource {resource_id} after {:?}",
                    self.config.lock_timeout
                );
                Err(AllocError::Timeout {
                    resource_id,
                    waited: self.config.lock_timeout,
                })
            }
        }
    }

    /// Run `section` to completion in its own task while holding `guard`.
    /// The section gets the store and the lock table; the guard is released
    /// only after it returns, whether or not the caller is still waiting.
    pub(crate) async fn run_locked<T, F, Fut>(
        &self,
        guard: OwnedMutexGuard<()>,
        section: F,
    ) -> Result<T, AllocError>
    where
        T: Send + 'static,
        F: FnOnce(Arc<S>, LockTable) -> Fut,
        Fut: Future<Output = Result<T, AllocError>> + Send + 'static,
    {
        let work = section(Arc::clone(&self.store), Arc::clone(&self.locks));
        tokio::spawn(async move {
            let result = work.await;
            drop(guard);
            result
        })
        .await
        .map_err(|e| AllocError::Aborted(e.to_string()))?
    }

    #[cfg(test)]
    pub(crate) fn lock_count(&self) -> usize {
        self.locks.len()
    }
}
