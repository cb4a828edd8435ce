//! Conflict-free allocation of shared resources to time-bounded events.
//!
//! [`Allocator`] guarantees that, per resource, the spans of allocated
//! events never overlap, even under concurrent `allocate` calls. Storage
//! sits behind the [`Store`] trait; [`MemoryStore`] is the bundled
//! implementation, optionally durable through a write-ahead log.

pub mod compactor;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod store;
pub mod time;
pub mod wal;

pub use config::Config;
pub use engine::{AllocError, Allocator, AllocatorConfig, ErrorKind};
pub use store::{MemoryStore, Store, StoreError};

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};

/// A durable allocator together with the background compactor feeding off
/// its store. Dropping the instance stops the compactor.
pub struct Instance {
    allocator: Allocator<MemoryStore>,
    compactor: JoinHandle<()>,
}

impl Instance {
    pub fn allocator(&self) -> &Allocator<MemoryStore> {
        &self.allocator
    }

    pub fn compactor_running(&self) -> bool {
        !self.compactor.is_finished()
    }

    /// Stop the compactor and wait until it has let go of the store.
    pub async fn shutdown(mut self) {
        self.compactor.abort();
        if let Err(e) = (&mut self.compactor).await {
            if !e.is_cancelled() {
                warn!("compactor ended abnormally: {e}");
            }
        }
        info!("resalloc shut down");
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        self.compactor.abort();
    }
}

/// Open the durable store under `config.data_dir`, start its compactor and
/// return both. Must be called from within a Tokio runtime.
pub fn open(config: &Config) -> std::io::Result<Instance> {
    std::fs::create_dir_all(&config.data_dir)?;
    let store = Arc::new(MemoryStore::open(&config.wal_path())?);

    let compactor = tokio::spawn(compactor::run_compactor(
        store.clone(),
        config.compact_threshold,
        compactor::CHECK_INTERVAL,
    ));

    info!("resalloc opened");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  lock_timeout: {:?}", config.lock_timeout);
    info!("  compact_threshold: {}", config.compact_threshold);
    Ok(Instance {
        allocator: Allocator::new(store, config.allocator()),
        compactor,
    })
}
