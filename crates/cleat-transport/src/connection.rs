//! Transport traits consumed by the pooling layer

use async_trait::async_trait;
use bytes::Bytes;

use crate::address::ServerAddress;
use crate::error::Result;
use crate::message::ResponseBuffers;

/// A single transport connection carrying framed messages.
///
/// Implementations own the socket exclusively; the pooling layer guarantees
/// one holder at a time, which is why the I/O methods take `&mut self`.
#[async_trait]
pub trait InternalConnection: Send + std::fmt::Debug {
    /// Send an already-framed message as an ordered list of buffers
    async fn send_message(&mut self, buffers: &[Bytes]) -> Result<()>;

    /// Receive the next framed reply
    async fn receive_message(&mut self) -> Result<ResponseBuffers>;

    /// Close the connection. Further sends and receives fail.
    async fn close(&mut self);

    /// Whether the connection has been closed
    fn is_closed(&self) -> bool;

    /// Stable id assigned when the connection was opened
    fn id(&self) -> &str;

    /// The endpoint this connection is bound to
    fn server_address(&self) -> &ServerAddress;
}

/// Opens fresh, authenticated connections to one endpoint.
///
/// Authentication happens inside `create`; its failures propagate to the
/// caller as acquisition failures.
#[async_trait]
pub trait InternalConnectionFactory: Send + Sync {
    /// Open a new connection to the given endpoint
    async fn create(&self, address: &ServerAddress) -> Result<Box<dyn InternalConnection>>;
}
