//! # cleat-pool
//!
//! Pooled channel provider for the Cleat driver.
//!
//! A [`ChannelPool`] manages a bounded set of long-lived connections to a
//! single server endpoint and multiplexes callers onto them:
//!
//! - **Bounded acquisition** with a wait-queue admission cap for backpressure
//! - **Generation-based cohort retirement**: a socket fault on one channel
//!   marks every connection opened before it for destruction
//! - **Periodic maintenance**: idle/lifetime pruning and minimum-size
//!   replenishment on a fixed-rate background task
//! - **Statistics observers** registered under a stable per-endpoint name
//!
//! One pool serves one endpoint; higher layers compose multiple pools.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cleat_pool::prelude::*;
//! use cleat_transport::prelude::*;
//! use std::sync::Arc;
//!
//! let factory = Arc::new(TcpConnectionFactory::default()
//!     .with_authenticator(Arc::new(ScramSha256Authenticator::new("app", "secret"))));
//! let settings = PoolSettings::default().with_max_size(16).with_min_size(2);
//! let pool = ChannelPool::new("db1.internal:8417".parse()?, factory, settings)?;
//!
//! let mut channel = pool.get().await?;
//! let request_id = next_request_id();
//! channel.send_message(&encode_frame(request_id, body)).await?;
//! let reply = channel.receive_message(&ReceiveArgs::new(request_id)).await?;
//! channel.close().await;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod channel;
pub mod concurrent;
pub mod error;
pub mod maintenance;
pub mod provider;
pub mod settings;
pub mod stats;
pub mod tracking;

#[cfg(test)]
pub(crate) mod test_support;

pub use channel::PooledChannel;
pub use error::{Error, Result};
pub use provider::{ChannelPool, ChannelProvider};
pub use settings::{AcquireTimeout, PoolSettings};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::channel::PooledChannel;
    pub use crate::concurrent::{ConcurrentPool, PoolItemFactory};
    pub use crate::error::{Error, Result};
    pub use crate::maintenance::PeriodicTask;
    pub use crate::provider::{ChannelPool, ChannelProvider, RecycleReason};
    pub use crate::settings::{AcquireTimeout, PoolSettings};
    pub use crate::stats::{InMemoryObserverRegistry, ObserverRegistry, PoolStatistics};
    pub use crate::tracking::UsageTrackingConnection;
}
