//! The channel pool manager
//!
//! [`ChannelPool`] owns a [`ConcurrentPool`] of usage-tracked connections to
//! one endpoint and hands out [`PooledChannel`]s over them. It enforces the
//! wait-queue admission cap, discards stale connections at acquisition time,
//! runs the periodic maintenance task, and carries the generation counter
//! that retires whole connection cohorts after a socket fault.

use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use cleat_transport::{InternalConnectionFactory, ServerAddress};

use crate::channel::PooledChannel;
use crate::concurrent::{ConcurrentPool, PoolItemFactory};
use crate::error::{Error, Result};
use crate::maintenance::PeriodicTask;
use crate::settings::{AcquireTimeout, PoolSettings};
use crate::stats::{global_registry, ObserverRegistry, PoolStatistics};
use crate::tracking::UsageTrackingConnection;

/// Why a pooled connection was destroyed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecycleReason {
    /// A socket fault on a sibling connection retired its whole cohort
    SiblingFault,
    /// The connection outlived the configured lifetime window
    PastMaxLifeTime,
    /// The connection sat idle longer than the configured idle window
    PastMaxIdleTime,
    /// The pool was closed
    PoolClosed,
}

impl fmt::Display for RecycleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SiblingFault => {
                write!(f, "a socket fault was raised on another connection from this pool")
            }
            Self::PastMaxLifeTime => write!(f, "it is past its maximum allowed life time"),
            Self::PastMaxIdleTime => write!(f, "it is past its maximum allowed idle time"),
            Self::PoolClosed => write!(f, "the pool has been closed"),
        }
    }
}

fn expired(start: Instant, window: Duration) -> bool {
    !window.is_zero() && start.elapsed() > window
}

/// State shared between the manager, its item factory and its channels
pub(crate) struct PoolCore {
    pub(crate) address: ServerAddress,
    pub(crate) settings: PoolSettings,
    generation: AtomicU64,
}

impl PoolCore {
    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn from_previous_generation(&self, conn: &UsageTrackingConnection) -> bool {
        self.generation() > conn.generation()
    }

    fn past_max_life_time(&self, conn: &UsageTrackingConnection) -> bool {
        expired(conn.opened_at(), self.settings.max_life_time)
    }

    fn past_max_idle_time(&self, conn: &UsageTrackingConnection) -> bool {
        expired(conn.last_used_at(), self.settings.max_idle_time)
    }

    pub(crate) fn should_prune(&self, conn: &UsageTrackingConnection) -> bool {
        self.from_previous_generation(conn)
            || self.past_max_life_time(conn)
            || self.past_max_idle_time(conn)
    }

    fn recycle_reason(&self, conn: &UsageTrackingConnection) -> RecycleReason {
        if self.from_previous_generation(conn) {
            RecycleReason::SiblingFault
        } else if self.past_max_life_time(conn) {
            RecycleReason::PastMaxLifeTime
        } else if self.past_max_idle_time(conn) {
            RecycleReason::PastMaxIdleTime
        } else {
            RecycleReason::PoolClosed
        }
    }
}

/// Creates usage-tracked connections stamped with the current generation
struct TrackedConnectionFactory {
    connection_factory: Arc<dyn InternalConnectionFactory>,
    core: Arc<PoolCore>,
}

#[async_trait]
impl PoolItemFactory<UsageTrackingConnection> for TrackedConnectionFactory {
    async fn create(&self) -> Result<UsageTrackingConnection> {
        let inner = self.connection_factory.create(&self.core.address).await?;
        let conn = UsageTrackingConnection::new(inner, self.core.generation());
        info!("Opened connection [{}] to {}", conn.id(), self.core.address);
        Ok(conn)
    }

    async fn destroy(&self, mut conn: UsageTrackingConnection) {
        let reason = self.core.recycle_reason(&conn);
        let id = conn.id().to_string();
        conn.close().await;
        info!(
            "Closed connection [{}] to {} because {}.",
            id, self.core.address, reason
        );
    }

    fn should_prune(&self, conn: &UsageTrackingConnection) -> bool {
        self.core.should_prune(conn)
    }
}

pub(crate) struct PoolInner {
    pub(crate) core: Arc<PoolCore>,
    pub(crate) pool: ConcurrentPool<UsageTrackingConnection>,
    wait_queue: AtomicUsize,
    maintenance_mutex: tokio::sync::Mutex<()>,
}

impl PoolInner {
    pub(crate) fn wait_queue_size(&self) -> usize {
        self.wait_queue.load(Ordering::Acquire)
    }

    /// Return a connection on behalf of a channel. `last_used_at` is only
    /// advanced when the connection actually goes back on the free list, so
    /// idle-based destroy reasons stay accurate.
    pub(crate) async fn release(&self, mut conn: UsageTrackingConnection, prune: bool) {
        if !prune {
            conn.touch();
        }
        self.pool.release(conn, prune).await;
    }

    /// Bump the generation if the error is a real socket fault, retiring
    /// every connection opened before it
    pub(crate) fn record_transport_error(&self, channel_id: &str, err: &cleat_transport::Error) {
        if err.is_transport_fault() {
            warn!(
                "Got socket fault on channel [{}] to {}; all connections to {} will be retired",
                channel_id, self.core.address, self.core.address
            );
            self.core.generation.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// The maintenance task body. The mutex keeps a manual
    /// [`ChannelPool::do_maintenance`] call from overlapping a scheduled run.
    pub(crate) async fn run_maintenance(&self) {
        let _exclusive = self.maintenance_mutex.lock().await;
        let settings = &self.core.settings;
        if settings.prune_enabled() {
            debug!("Pruning pooled connections to {}", self.core.address);
            self.pool.prune().await;
        }
        if settings.min_size > 0 {
            debug!(
                "Ensuring at least {} pooled connections to {}",
                settings.min_size, self.core.address
            );
            self.pool.ensure_min_size(settings.min_size).await;
        }
    }
}

/// Decrements the wait-queue counter on every exit path
struct WaitQueueGuard<'a> {
    inner: &'a PoolInner,
}

impl<'a> WaitQueueGuard<'a> {
    fn enter(inner: &'a PoolInner) -> Result<Self> {
        let size = inner.wait_queue.fetch_add(1, Ordering::AcqRel) + 1;
        if size > inner.core.settings.max_wait_queue_size {
            inner.wait_queue.fetch_sub(1, Ordering::AcqRel);
            return Err(Error::WaitQueueFull {
                max_size: inner.core.settings.max_wait_queue_size,
            });
        }
        Ok(Self { inner })
    }
}

impl Drop for WaitQueueGuard<'_> {
    fn drop(&mut self) {
        self.inner.wait_queue.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Remaining budget against the absolute deadline, so the stale-discard
/// retry loop cannot outlive the timeout under high churn
fn remaining_budget(timeout: AcquireTimeout, deadline: Option<Instant>) -> AcquireTimeout {
    match (timeout, deadline) {
        (AcquireTimeout::After(_), Some(deadline)) => {
            AcquireTimeout::After(deadline.saturating_duration_since(Instant::now()))
        }
        (timeout, _) => timeout,
    }
}

/// Restate an inner-pool timeout against the whole acquisition attempt; the
/// inner wait only covers the last iteration of the stale-discard loop
fn stamp_timeout(err: Error, address: &ServerAddress, started: Instant) -> Error {
    match err {
        Error::Timeout { .. } => Error::timeout(address.clone(), started.elapsed()),
        other => other,
    }
}

/// Hands out pooled channels to one endpoint
#[async_trait]
pub trait ChannelProvider: Send + Sync {
    /// Acquire a channel using the pool's default timeout
    async fn get(&self) -> Result<PooledChannel>;

    /// Acquire a channel within the given timeout
    async fn get_with_timeout(&self, timeout: AcquireTimeout) -> Result<PooledChannel>;

    /// Close the provider. Terminal and idempotent; all subsequent
    /// acquisitions fail.
    async fn close(&self);
}

/// A bounded pool of channels to a single server endpoint.
///
/// Constructing a pool registers its statistics observer and, when pruning
/// or a minimum size is configured, starts the background maintenance task;
/// construction must therefore happen inside a tokio runtime.
pub struct ChannelPool {
    inner: Arc<PoolInner>,
    statistics: Arc<PoolStatistics>,
    registry: Arc<dyn ObserverRegistry>,
    maintenance: parking_lot::Mutex<Option<PeriodicTask>>,
    closed: AtomicBool,
}

impl ChannelPool {
    /// Create a pool using the process-wide observer registry
    pub fn new(
        address: ServerAddress,
        connection_factory: Arc<dyn InternalConnectionFactory>,
        settings: PoolSettings,
    ) -> Result<Self> {
        Self::with_registry(address, connection_factory, settings, global_registry())
    }

    /// Create a pool registering its statistics with the given registry
    pub fn with_registry(
        address: ServerAddress,
        connection_factory: Arc<dyn InternalConnectionFactory>,
        settings: PoolSettings,
        registry: Arc<dyn ObserverRegistry>,
    ) -> Result<Self> {
        settings.validate()?;

        let core = Arc::new(PoolCore {
            address,
            settings,
            generation: AtomicU64::new(0),
        });
        let factory = Arc::new(TrackedConnectionFactory {
            connection_factory,
            core: core.clone(),
        });
        let inner = Arc::new(PoolInner {
            pool: ConcurrentPool::new(core.address.clone(), core.settings.max_size, factory),
            core,
            wait_queue: AtomicUsize::new(0),
            maintenance_mutex: tokio::sync::Mutex::new(()),
        });

        let statistics = Arc::new(PoolStatistics::new(&inner));
        registry.register(statistics.clone());

        let maintenance = Self::start_maintenance(&inner);

        Ok(Self {
            inner,
            statistics,
            registry,
            maintenance: parking_lot::Mutex::new(maintenance),
            closed: AtomicBool::new(false),
        })
    }

    fn start_maintenance(inner: &Arc<PoolInner>) -> Option<PeriodicTask> {
        let settings = &inner.core.settings;
        if !settings.prune_enabled() && settings.min_size == 0 {
            return None;
        }
        let task_inner = inner.clone();
        Some(PeriodicTask::spawn(
            settings.maintenance_initial_delay,
            settings.maintenance_frequency,
            move || {
                let inner = task_inner.clone();
                async move { inner.run_maintenance().await }
            },
        ))
    }

    /// The endpoint this pool serves
    pub fn server_address(&self) -> &ServerAddress {
        &self.inner.core.address
    }

    /// Current generation of the pool
    pub fn generation(&self) -> u64 {
        self.inner.core.generation()
    }

    /// The pool's statistics observer
    pub fn statistics(&self) -> Arc<PoolStatistics> {
        self.statistics.clone()
    }

    /// Acquire a channel using the pool's default timeout
    pub async fn get(&self) -> Result<PooledChannel> {
        self.get_with_timeout(self.inner.core.settings.max_wait_time)
            .await
    }

    /// Acquire a channel within the given timeout.
    ///
    /// Stale connections handed back by the inner pool (previous generation,
    /// past lifetime or past idle time) are destroyed and replaced until a
    /// fresh one is obtained or the deadline passes.
    pub async fn get_with_timeout(&self, timeout: AcquireTimeout) -> Result<PooledChannel> {
        let inner = &self.inner;
        let _admission = WaitQueueGuard::enter(inner)?;

        let started = Instant::now();
        let deadline = timeout.deadline();
        let mut conn = inner
            .pool
            .get(remaining_budget(timeout, deadline))
            .await
            .map_err(|e| stamp_timeout(e, &inner.core.address, started))?;
        while inner.core.should_prune(&conn) {
            inner.pool.release(conn, true).await;
            conn = inner
                .pool
                .get(remaining_budget(timeout, deadline))
                .await
                .map_err(|e| stamp_timeout(e, &inner.core.address, started))?;
        }
        Ok(PooledChannel::new(conn, inner.clone()))
    }

    /// Run the maintenance task synchronously on the caller.
    ///
    /// A no-op when neither pruning nor a minimum size is configured.
    pub async fn do_maintenance(&self) {
        let settings = &self.inner.core.settings;
        if settings.prune_enabled() || settings.min_size > 0 {
            self.inner.run_maintenance().await;
        }
    }

    /// Close the pool: destroy free connections, cancel maintenance and
    /// unregister the statistics observer. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.pool.close().await;
        if let Some(task) = self.maintenance.lock().take() {
            task.cancel();
        }
        self.registry.unregister(self.statistics.name());
        info!("Closed connection pool for {}", self.inner.core.address);
    }
}

#[async_trait]
impl ChannelProvider for ChannelPool {
    async fn get(&self) -> Result<PooledChannel> {
        ChannelPool::get(self).await
    }

    async fn get_with_timeout(&self, timeout: AcquireTimeout) -> Result<PooledChannel> {
        ChannelPool::get_with_timeout(self, timeout).await
    }

    async fn close(&self) {
        ChannelPool::close(self).await
    }
}
