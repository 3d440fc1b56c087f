//! Pool configuration

use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// How long an acquisition may wait for free capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireTimeout {
    /// Fail immediately when no capacity is free
    Immediate,
    /// Wait up to the given duration
    After(Duration),
    /// Wait until capacity frees up or the pool closes
    Indefinite,
}

impl AcquireTimeout {
    /// Absolute deadline for a bounded wait starting now
    pub fn deadline(&self) -> Option<Instant> {
        match self {
            Self::After(d) => Some(Instant::now() + *d),
            _ => None,
        }
    }
}

impl From<Duration> for AcquireTimeout {
    /// A zero duration means non-blocking
    fn from(d: Duration) -> Self {
        if d.is_zero() {
            Self::Immediate
        } else {
            Self::After(d)
        }
    }
}

/// Immutable configuration of a [`ChannelPool`](crate::ChannelPool).
///
/// A `Duration::ZERO` idle or lifetime window disables that form of pruning.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Hard cap on live connections
    pub max_size: usize,
    /// Floor the maintenance task replenishes up to
    pub min_size: usize,
    /// Upper bound on concurrent acquisition attempts
    pub max_wait_queue_size: usize,
    /// Default acquisition timeout
    pub max_wait_time: AcquireTimeout,
    /// Connections idle longer than this are pruned; zero disables
    pub max_idle_time: Duration,
    /// Connections older than this are pruned; zero disables
    pub max_life_time: Duration,
    /// Period of the background maintenance task
    pub maintenance_frequency: Duration,
    /// Delay before the first maintenance run
    pub maintenance_initial_delay: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_size: 100,
            min_size: 0,
            max_wait_queue_size: 500,
            max_wait_time: AcquireTimeout::After(Duration::from_secs(120)),
            max_idle_time: Duration::ZERO,
            max_life_time: Duration::ZERO,
            maintenance_frequency: Duration::from_secs(60),
            maintenance_initial_delay: Duration::ZERO,
        }
    }
}

impl PoolSettings {
    /// Set the hard cap on live connections
    pub fn with_max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    /// Set the minimum pool size
    pub fn with_min_size(mut self, size: usize) -> Self {
        self.min_size = size;
        self
    }

    /// Set the wait-queue admission cap
    pub fn with_max_wait_queue_size(mut self, size: usize) -> Self {
        self.max_wait_queue_size = size;
        self
    }

    /// Set the default acquisition timeout
    pub fn with_max_wait_time(mut self, timeout: impl Into<AcquireTimeout>) -> Self {
        self.max_wait_time = timeout.into();
        self
    }

    /// Set the idle window; zero disables idle pruning
    pub fn with_max_idle_time(mut self, window: Duration) -> Self {
        self.max_idle_time = window;
        self
    }

    /// Set the lifetime window; zero disables lifetime pruning
    pub fn with_max_life_time(mut self, window: Duration) -> Self {
        self.max_life_time = window;
        self
    }

    /// Set the maintenance period
    pub fn with_maintenance_frequency(mut self, period: Duration) -> Self {
        self.maintenance_frequency = period;
        self
    }

    /// Set the delay before the first maintenance run
    pub fn with_maintenance_initial_delay(mut self, delay: Duration) -> Self {
        self.maintenance_initial_delay = delay;
        self
    }

    /// Whether any time-based pruning is enabled
    pub fn prune_enabled(&self) -> bool {
        !self.max_idle_time.is_zero() || !self.max_life_time.is_zero()
    }

    /// Check the settings for internal consistency
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(Error::config("max_size must be at least 1"));
        }
        if self.min_size > self.max_size {
            return Err(Error::config(format!(
                "min_size ({}) must not exceed max_size ({})",
                self.min_size, self.max_size
            )));
        }
        if self.maintenance_frequency.is_zero() {
            return Err(Error::config("maintenance_frequency must be non-zero"));
        }
        Ok(())
    }
}
