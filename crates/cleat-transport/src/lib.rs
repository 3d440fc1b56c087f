//! # cleat-transport
//!
//! Wire transport for the Cleat driver: framed binary messages over TCP,
//! plus the SASL authentication performed when a connection is first opened.
//!
//! The pooling layer (`cleat-pool`) consumes this crate through two traits:
//!
//! - [`InternalConnection`]: send/receive of already-framed message buffers
//! - [`InternalConnectionFactory`]: opens and authenticates fresh connections
//!
//! A concrete TCP implementation lives in [`tcp`]; everything above the
//! socket is written against the traits so tests can substitute stubs.

pub mod address;
pub mod auth;
pub mod connection;
pub mod error;
pub mod message;
pub mod tcp;

pub use address::ServerAddress;
pub use connection::{InternalConnection, InternalConnectionFactory};
pub use error::{Error, Result};
pub use message::{MessageHeader, ReceiveArgs, ResponseBuffers};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::address::ServerAddress;
    pub use crate::auth::{Authenticator, PlainAuthenticator, ScramSha256Authenticator};
    pub use crate::connection::{InternalConnection, InternalConnectionFactory};
    pub use crate::error::{Error, Result};
    pub use crate::message::{
        next_request_id, MessageHeader, ReceiveArgs, ResponseBuffers, HEADER_LEN,
    };
    pub use crate::tcp::{TcpConnection, TcpConnectionFactory, TransportConfig};
}
