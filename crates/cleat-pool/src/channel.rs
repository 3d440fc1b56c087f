//! The borrower-facing channel over a pooled connection

use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

use cleat_transport::{ReceiveArgs, ResponseBuffers, ServerAddress};

use crate::error::{Error, Result};
use crate::provider::PoolInner;
use crate::tracking::UsageTrackingConnection;

/// A channel borrowed from a [`ChannelPool`](crate::ChannelPool), valid from
/// acquisition until [`close`](Self::close).
///
/// Transport failures on send or receive are classified before they
/// propagate: a real socket fault bumps the pool's generation and thereby
/// retires every connection opened before it. The channel itself stays open
/// after a failure; the caller decides whether to close it.
///
/// An open channel must be closed, or dropped, from within the pool's tokio
/// runtime: a drop without `close` returns the connection from a spawned
/// task, and spawning outside a runtime panics rather than letting the pool
/// slot leak silently.
pub struct PooledChannel {
    id: String,
    inner: Arc<PoolInner>,
    wrapped: Option<UsageTrackingConnection>,
}

impl PooledChannel {
    pub(crate) fn new(conn: UsageTrackingConnection, inner: Arc<PoolInner>) -> Self {
        Self {
            id: conn.id().to_string(),
            inner,
            wrapped: Some(conn),
        }
    }

    /// Id of the underlying connection; readable even after close
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether the channel has been closed (or its transport has)
    pub fn is_closed(&self) -> bool {
        self.wrapped.as_ref().map_or(true, |conn| conn.is_closed())
    }

    /// The endpoint the channel is bound to; requires the channel to be open
    pub fn server_address(&self) -> Result<&ServerAddress> {
        match &self.wrapped {
            Some(conn) if !conn.is_closed() => Ok(conn.server_address()),
            _ => Err(Error::ChannelClosed),
        }
    }

    /// Send an already-framed message
    pub async fn send_message(&mut self, buffers: &[Bytes]) -> Result<()> {
        let conn = self.wrapped.as_mut().ok_or(Error::ChannelClosed)?;
        match conn.send_message(buffers).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.inner.record_transport_error(&self.id, &e);
                Err(e.into())
            }
        }
    }

    /// Receive the reply to the request named in `args`.
    ///
    /// A reply correlating to a different request raises
    /// [`Error::ResponseMismatch`]; that indicates a bug rather than a broken
    /// wire, so the generation is left alone. The same goes for the
    /// opt-in reply size cap.
    pub async fn receive_message(&mut self, args: &ReceiveArgs) -> Result<ResponseBuffers> {
        let conn = self.wrapped.as_mut().ok_or(Error::ChannelClosed)?;
        let reply = match conn.receive_message().await {
            Ok(reply) => reply,
            Err(e) => {
                self.inner.record_transport_error(&self.id, &e);
                return Err(e.into());
            }
        };

        let header = reply.reply_header();
        if header.response_to != args.response_to {
            return Err(Error::ResponseMismatch {
                expected: args.response_to,
                actual: header.response_to,
            });
        }
        if let Some(max) = args.max_message_size {
            if header.message_length > max {
                return Err(Error::ResponseTooLarge {
                    length: header.message_length,
                    max,
                });
            }
        }
        Ok(reply)
    }

    /// Return the connection to the pool. Stale or broken connections are
    /// destroyed instead of pooled. Idempotent.
    pub async fn close(&mut self) {
        if let Some(conn) = self.wrapped.take() {
            let prune = conn.is_closed() || self.inner.core.should_prune(&conn);
            self.inner.release(conn, prune).await;
        }
    }
}

impl Drop for PooledChannel {
    /// A dropped channel must not leak its pool capacity, so the release is
    /// spawned onto the current runtime when `close` was never awaited.
    /// Panics if no runtime is current; see the type-level contract.
    fn drop(&mut self) {
        if let Some(conn) = self.wrapped.take() {
            debug!(
                "Channel [{}] dropped without close; returning its connection",
                self.id
            );
            let inner = self.inner.clone();
            tokio::spawn(async move {
                let prune = conn.is_closed() || inner.core.should_prune(&conn);
                inner.release(conn, prune).await;
            });
        }
    }
}
