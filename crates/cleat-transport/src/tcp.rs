//! TCP implementation of the transport traits
//!
//! Frames are written as-is (the caller already framed them) and read back
//! header-first with length validation, so a misbehaving server cannot make
//! the client allocate unbounded memory.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::address::ServerAddress;
use crate::auth::Authenticator;
use crate::connection::{InternalConnection, InternalConnectionFactory};
use crate::error::{Error, Result};
use crate::message::{MessageHeader, ResponseBuffers, HEADER_LEN};

/// Default maximum inbound message size (48 MB)
pub const DEFAULT_MAX_MESSAGE_SIZE: i32 = 48 * 1024 * 1024;

/// Socket-level configuration for the TCP factory
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Time allowed for the TCP connect
    pub connect_timeout: Duration,
    /// Inbound frames longer than this are rejected
    pub max_message_size: i32,
    /// Disable Nagle's algorithm
    pub nodelay: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            nodelay: true,
        }
    }
}

impl TransportConfig {
    /// Set the connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the maximum inbound message size
    pub fn with_max_message_size(mut self, max: i32) -> Self {
        self.max_message_size = max;
        self
    }
}

/// A framed connection over a TCP stream
#[derive(Debug)]
pub struct TcpConnection {
    id: String,
    address: ServerAddress,
    stream: TcpStream,
    max_message_size: i32,
    closed: bool,
}

#[async_trait]
impl InternalConnection for TcpConnection {
    async fn send_message(&mut self, buffers: &[Bytes]) -> Result<()> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        for buffer in buffers {
            self.stream
                .write_all(buffer)
                .await
                .map_err(Error::from_io)?;
        }
        self.stream.flush().await.map_err(Error::from_io)
    }

    async fn receive_message(&mut self) -> Result<ResponseBuffers> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }

        let mut header_buf = [0u8; HEADER_LEN];
        self.stream
            .read_exact(&mut header_buf)
            .await
            .map_err(Error::from_io)?;
        let header = MessageHeader::decode(&header_buf)?;

        if header.message_length > self.max_message_size {
            return Err(Error::MessageTooLarge {
                length: header.message_length,
                max: self.max_message_size,
            });
        }

        let mut body = BytesMut::zeroed(header.body_len());
        self.stream
            .read_exact(&mut body)
            .await
            .map_err(Error::from_io)?;

        Ok(ResponseBuffers::new(header, body.freeze()))
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.stream.shutdown().await;
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn server_address(&self) -> &ServerAddress {
        &self.address
    }
}

/// Opens framed TCP connections, authenticating them when an authenticator
/// is configured
pub struct TcpConnectionFactory {
    config: TransportConfig,
    authenticator: Option<Arc<dyn Authenticator>>,
    next_id: AtomicU64,
}

impl TcpConnectionFactory {
    /// Create a factory with the given socket configuration
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            authenticator: None,
            next_id: AtomicU64::new(0),
        }
    }

    /// Authenticate every new connection with the given mechanism
    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }
}

impl Default for TcpConnectionFactory {
    fn default() -> Self {
        Self::new(TransportConfig::default())
    }
}

#[async_trait]
impl InternalConnectionFactory for TcpConnectionFactory {
    async fn create(&self, address: &ServerAddress) -> Result<Box<dyn InternalConnection>> {
        let connect = TcpStream::connect((address.host(), address.port()));
        let stream = tokio::time::timeout(self.config.connect_timeout, connect)
            .await
            .map_err(|_| Error::socket(format!("timed out connecting to {}", address)))?
            .map_err(Error::from_io)?;

        if self.config.nodelay {
            stream.set_nodelay(true).map_err(Error::from_io)?;
        }

        let id = format!("conn-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        debug!("Connected [{}] to {}", id, address);

        let mut conn = TcpConnection {
            id,
            address: address.clone(),
            stream,
            max_message_size: self.config.max_message_size,
            closed: false,
        };

        if let Some(authenticator) = &self.authenticator {
            debug!(
                "Authenticating [{}] with {}",
                conn.id,
                authenticator.mechanism()
            );
            if let Err(e) = authenticator.authenticate(&mut conn).await {
                conn.close().await;
                return Err(e);
            }
        }

        Ok(Box::new(conn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::PlainAuthenticator;
    use crate::message::{encode_frame, next_request_id};
    use tokio::net::TcpListener;

    async fn read_frame(stream: &mut TcpStream) -> (MessageHeader, Vec<u8>) {
        let mut header_buf = [0u8; HEADER_LEN];
        stream.read_exact(&mut header_buf).await.unwrap();
        let header = MessageHeader::decode(&header_buf).unwrap();
        let mut body = vec![0u8; header.body_len()];
        stream.read_exact(&mut body).await.unwrap();
        (header, body)
    }

    async fn write_reply(stream: &mut TcpStream, response_to: i32, body: &[u8]) {
        let header = MessageHeader {
            message_length: (HEADER_LEN + body.len()) as i32,
            request_id: next_request_id(),
            response_to,
        };
        stream.write_all(&header.encode()).await.unwrap();
        stream.write_all(body).await.unwrap();
    }

    async fn bound_listener() -> (TcpListener, ServerAddress) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, ServerAddress::new("127.0.0.1", port))
    }

    #[tokio::test]
    async fn test_send_receive_round_trip() {
        let (listener, address) = bound_listener().await;

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let (header, body) = read_frame(&mut stream).await;
            assert_eq!(body, b"ping");
            write_reply(&mut stream, header.request_id, b"pong").await;
        });

        let factory = TcpConnectionFactory::default();
        let mut conn = factory.create(&address).await.unwrap();
        assert!(!conn.is_closed());
        assert_eq!(conn.server_address(), &address);

        let request_id = next_request_id();
        conn.send_message(&encode_frame(request_id, Bytes::from_static(b"ping")))
            .await
            .unwrap();

        let reply = conn.receive_message().await.unwrap();
        assert_eq!(reply.reply_header().response_to, request_id);
        assert_eq!(&reply.body()[..], b"pong");

        conn.close().await;
        assert!(conn.is_closed());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_oversized_reply_rejected() {
        let (listener, address) = bound_listener().await;

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let (header, _) = read_frame(&mut stream).await;
            write_reply(&mut stream, header.request_id, &vec![0u8; 256]).await;
        });

        let factory =
            TcpConnectionFactory::new(TransportConfig::default().with_max_message_size(64));
        let mut conn = factory.create(&address).await.unwrap();
        conn.send_message(&encode_frame(next_request_id(), Bytes::from_static(b"hi")))
            .await
            .unwrap();

        let err = conn.receive_message().await.unwrap_err();
        assert!(matches!(err, Error::MessageTooLarge { .. }));
        assert!(!err.is_transport_fault());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_operations_fail_after_close() {
        let (listener, address) = bound_listener().await;
        let server = tokio::spawn(async move {
            let _ = listener.accept().await.unwrap();
        });

        let factory = TcpConnectionFactory::default();
        let mut conn = factory.create(&address).await.unwrap();
        conn.close().await;
        conn.close().await; // idempotent

        let err = conn
            .send_message(&encode_frame(1, Bytes::from_static(b"x")))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
        assert!(matches!(
            conn.receive_message().await.unwrap_err(),
            Error::ConnectionClosed
        ));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_failure_is_socket_error() {
        // Bind then drop to get a port with no listener
        let (listener, address) = bound_listener().await;
        drop(listener);

        let factory = TcpConnectionFactory::default();
        let err = factory.create(&address).await.unwrap_err();
        assert!(err.is_transport_fault());
    }

    #[tokio::test]
    async fn test_plain_authentication() {
        let (listener, address) = bound_listener().await;

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let (header, body) = read_frame(&mut stream).await;
            assert_eq!(&body[..], b"PLAIN\0\0alice\0secret");
            write_reply(&mut stream, header.request_id, &[0]).await;
        });

        let factory = TcpConnectionFactory::default()
            .with_authenticator(Arc::new(PlainAuthenticator::new("alice", "secret")));
        let conn = factory.create(&address).await.unwrap();
        assert!(!conn.is_closed());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_authentication_rejection() {
        let (listener, address) = bound_listener().await;

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let (header, _) = read_frame(&mut stream).await;
            let mut body = vec![2];
            body.extend_from_slice(b"unknown user");
            write_reply(&mut stream, header.request_id, &body).await;
        });

        let factory = TcpConnectionFactory::default()
            .with_authenticator(Arc::new(PlainAuthenticator::new("mallory", "guess")));
        let err = factory.create(&address).await.unwrap_err();
        assert!(matches!(err, Error::Authentication { .. }));
        assert!(err.to_string().contains("unknown user"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_ids_are_stable_and_distinct() {
        let (listener, address) = bound_listener().await;
        let server = tokio::spawn(async move {
            let _a = listener.accept().await.unwrap();
            let _b = listener.accept().await.unwrap();
            // Hold both sockets until the client is done
            tokio::time::sleep(Duration::from_millis(50)).await;
        });

        let factory = TcpConnectionFactory::default();
        let a = factory.create(&address).await.unwrap();
        let b = factory.create(&address).await.unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.id(), a.id());
        server.await.unwrap();
    }
}
