//! Pool statistics and the observer registry
//!
//! Every reader is a sampling read over atomics; values may be momentarily
//! inconsistent with each other but each is individually accurate.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};

use cleat_transport::ServerAddress;

use crate::provider::PoolInner;

/// Live counters of one [`ChannelPool`](crate::ChannelPool).
///
/// Holds only a weak reference to the pool, so a registered observer never
/// keeps a closed pool alive; after the pool is dropped every gauge reads 0.
pub struct PoolStatistics {
    name: String,
    address: ServerAddress,
    min_size: usize,
    max_size: usize,
    inner: Weak<PoolInner>,
}

impl PoolStatistics {
    pub(crate) fn new(inner: &Arc<PoolInner>) -> Self {
        let address = inner.core.address.clone();
        Self {
            name: format!("cleat.pool.{}", address),
            address,
            min_size: inner.core.settings.min_size,
            max_size: inner.core.settings.max_size,
            inner: Arc::downgrade(inner),
        }
    }

    /// Stable observer name: `cleat.pool.<host>:<port>`
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The endpoint the pool serves
    pub fn server_address(&self) -> &ServerAddress {
        &self.address
    }

    /// Configured minimum pool size
    pub fn min_size(&self) -> usize {
        self.min_size
    }

    /// Configured maximum pool size
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Connections currently live (checked out or free)
    pub fn size(&self) -> usize {
        self.inner.upgrade().map_or(0, |inner| inner.pool.size())
    }

    /// Connections currently held by channels
    pub fn checked_out_count(&self) -> usize {
        self.inner.upgrade().map_or(0, |inner| {
            inner.pool.size().saturating_sub(inner.pool.available_count())
        })
    }

    /// Operations currently attempting acquisition
    pub fn wait_queue_size(&self) -> usize {
        self.inner
            .upgrade()
            .map_or(0, |inner| inner.wait_queue_size())
    }
}

/// Receives pool statistics observers as pools come and go
pub trait ObserverRegistry: Send + Sync {
    /// Register an observer under its stable name
    fn register(&self, statistics: Arc<PoolStatistics>);

    /// Remove the observer with the given name
    fn unregister(&self, name: &str);
}

/// In-process observer registry
#[derive(Default)]
pub struct InMemoryObserverRegistry {
    entries: RwLock<HashMap<String, Arc<PoolStatistics>>>,
}

impl InMemoryObserverRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an observer by name
    pub fn get(&self, name: &str) -> Option<Arc<PoolStatistics>> {
        self.entries.read().get(name).cloned()
    }

    /// Names of all registered observers
    pub fn names(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }
}

impl ObserverRegistry for InMemoryObserverRegistry {
    fn register(&self, statistics: Arc<PoolStatistics>) {
        self.entries
            .write()
            .insert(statistics.name().to_string(), statistics);
    }

    fn unregister(&self, name: &str) {
        self.entries.write().remove(name);
    }
}

/// The process-wide registry pools use unless one is injected
pub fn global_registry() -> Arc<InMemoryObserverRegistry> {
    static REGISTRY: OnceLock<Arc<InMemoryObserverRegistry>> = OnceLock::new();
    REGISTRY
        .get_or_init(|| Arc::new(InMemoryObserverRegistry::new()))
        .clone()
}
