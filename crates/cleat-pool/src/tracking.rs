//! Usage-tracking decorator over a transport connection

use bytes::Bytes;
use std::time::Instant;

use cleat_transport::{InternalConnection, ResponseBuffers, ServerAddress};

/// A pooled transport connection plus the metadata the pool tracks for it.
///
/// `generation` is stamped once at creation and never changes;
/// `last_used_at` is written only at release time, when exactly one owner
/// holds the connection.
pub struct UsageTrackingConnection {
    inner: Box<dyn InternalConnection>,
    generation: u64,
    opened_at: Instant,
    last_used_at: Instant,
}

impl UsageTrackingConnection {
    pub(crate) fn new(inner: Box<dyn InternalConnection>, generation: u64) -> Self {
        let now = Instant::now();
        Self {
            inner,
            generation,
            opened_at: now,
            last_used_at: now,
        }
    }

    /// Stable id of the underlying connection
    pub fn id(&self) -> &str {
        self.inner.id()
    }

    /// Pool generation this connection was opened under
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// When the connection was opened
    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    /// When the connection was last returned to the pool
    pub fn last_used_at(&self) -> Instant {
        self.last_used_at
    }

    /// Whether the underlying transport is closed
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// The endpoint this connection is bound to
    pub fn server_address(&self) -> &ServerAddress {
        self.inner.server_address()
    }

    pub(crate) fn touch(&mut self) {
        self.last_used_at = Instant::now();
    }

    pub(crate) async fn send_message(&mut self, buffers: &[Bytes]) -> cleat_transport::Result<()> {
        self.inner.send_message(buffers).await
    }

    pub(crate) async fn receive_message(&mut self) -> cleat_transport::Result<ResponseBuffers> {
        self.inner.receive_message().await
    }

    pub(crate) async fn close(&mut self) {
        self.inner.close().await
    }
}
