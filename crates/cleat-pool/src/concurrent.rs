//! Bounded concurrent item pool
//!
//! Capacity is guarded by a semaphore: a caller must win a permit before it
//! may own an item. Handed-out items keep their permit (forgotten here,
//! re-added on release), so at most `max_size` items are live at once even
//! while new ones are being created. Free items sit on a LIFO list, which
//! keeps hot items hot and lets cold ones age into the idle-prune window.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::warn;

use cleat_transport::ServerAddress;

use crate::error::{Error, Result};
use crate::settings::AcquireTimeout;

/// Creates, destroys and vets the items a [`ConcurrentPool`] manages
#[async_trait]
pub trait PoolItemFactory<T>: Send + Sync {
    /// Create a new item. Failures propagate out of
    /// [`ConcurrentPool::get`] after the capacity permit is returned.
    async fn create(&self) -> Result<T>;

    /// Destroy an item
    async fn destroy(&self, item: T);

    /// Whether a free item should be destroyed instead of handed out
    fn should_prune(&self, item: &T) -> bool;
}

/// A bounded, semaphore-guarded set of interchangeable items, all belonging
/// to one server endpoint. The address only feeds timeout errors and logs.
pub struct ConcurrentPool<T> {
    address: ServerAddress,
    max_size: usize,
    factory: Arc<dyn PoolItemFactory<T>>,
    permits: Arc<Semaphore>,
    available: Mutex<Vec<T>>,
    size: AtomicUsize,
    closed: AtomicBool,
}

impl<T: Send + 'static> ConcurrentPool<T> {
    /// Create a pool holding at most `max_size` items
    pub fn new(
        address: ServerAddress,
        max_size: usize,
        factory: Arc<dyn PoolItemFactory<T>>,
    ) -> Self {
        Self {
            address,
            max_size,
            factory,
            permits: Arc::new(Semaphore::new(max_size)),
            available: Mutex::new(Vec::with_capacity(max_size)),
            size: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Hard cap on live items
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Items created and not yet destroyed
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    /// Items currently free in the pool
    pub fn available_count(&self) -> usize {
        self.available.lock().len()
    }

    /// Whether the pool has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Acquire an item within the given timeout: a free one if present,
    /// otherwise a freshly created one.
    pub async fn get(&self, timeout: AcquireTimeout) -> Result<T> {
        if self.is_closed() {
            return Err(Error::PoolClosed);
        }

        let permit = self.acquire_permit(timeout).await?;

        if let Some(item) = self.available.lock().pop() {
            permit.forget();
            return Ok(item);
        }

        match self.factory.create().await {
            Ok(item) => {
                self.size.fetch_add(1, Ordering::AcqRel);
                permit.forget();
                Ok(item)
            }
            // Dropping the permit returns it before the error propagates
            Err(e) => Err(e),
        }
    }

    /// Return an item. Pruned items (and any item returned after close) are
    /// destroyed; the rest go back on the free list. Either way the item's
    /// capacity permit is returned.
    pub async fn release(&self, item: T, prune: bool) {
        if prune || self.is_closed() {
            self.destroy(item).await;
        } else {
            let mut available = self.available.lock();
            // close() drains under this lock; re-check so the item cannot
            // land on the free list after the drain
            if self.closed.load(Ordering::Acquire) {
                drop(available);
                self.destroy(item).await;
            } else {
                available.push(item);
            }
        }
        self.permits.add_permits(1);
    }

    /// Destroy every free item the factory votes to prune
    pub async fn prune(&self) {
        let pruned: Vec<T> = {
            let mut available = self.available.lock();
            let mut keep = Vec::with_capacity(available.len());
            let mut pruned = Vec::new();
            for item in available.drain(..) {
                if self.factory.should_prune(&item) {
                    pruned.push(item);
                } else {
                    keep.push(item);
                }
            }
            *available = keep;
            pruned
        };
        for item in pruned {
            self.destroy(item).await;
        }
    }

    /// Create items until at least `min_size` are live.
    ///
    /// Stops when capacity cannot be claimed without blocking or when a
    /// creation fails; creation failures are logged and swallowed because
    /// this runs from background maintenance.
    pub async fn ensure_min_size(&self, min_size: usize) {
        let target = min_size.min(self.max_size);
        while !self.is_closed() && self.size() < target {
            let permit = match self.permits.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => break,
            };
            match self.factory.create().await {
                Ok(item) => {
                    self.size.fetch_add(1, Ordering::AcqRel);
                    let mut available = self.available.lock();
                    if self.closed.load(Ordering::Acquire) {
                        drop(available);
                        self.destroy(item).await;
                        break;
                    }
                    available.push(item);
                    drop(available);
                    drop(permit);
                }
                Err(e) => {
                    warn!("Failed to create pooled item while ensuring minimum size: {e}");
                    break;
                }
            }
        }
    }

    /// Close the pool and destroy every free item.
    ///
    /// Items currently handed out are destroyed when they are released.
    pub async fn close(&self) {
        let drained: Vec<T> = {
            let mut available = self.available.lock();
            if self.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            available.drain(..).collect()
        };
        // Wakes blocked acquirers with PoolClosed
        self.permits.close();
        for item in drained {
            self.destroy(item).await;
        }
    }

    async fn destroy(&self, item: T) {
        self.factory.destroy(item).await;
        self.size.fetch_sub(1, Ordering::AcqRel);
    }

    async fn acquire_permit(&self, timeout: AcquireTimeout) -> Result<OwnedSemaphorePermit> {
        let permits = self.permits.clone();
        match timeout {
            AcquireTimeout::Immediate => permits.try_acquire_owned().map_err(|e| match e {
                TryAcquireError::Closed => Error::PoolClosed,
                TryAcquireError::NoPermits => {
                    Error::timeout(self.address.clone(), Duration::ZERO)
                }
            }),
            AcquireTimeout::After(wait) => {
                let started = Instant::now();
                match tokio::time::timeout(wait, permits.acquire_owned()).await {
                    Ok(Ok(permit)) => Ok(permit),
                    Ok(Err(_)) => Err(Error::PoolClosed),
                    Err(_) => Err(Error::timeout(self.address.clone(), started.elapsed())),
                }
            }
            AcquireTimeout::Indefinite => {
                permits.acquire_owned().await.map_err(|_| Error::PoolClosed)
            }
        }
    }
}
