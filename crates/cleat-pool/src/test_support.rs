//! Scriptable transport stubs shared by the pool tests

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use cleat_transport::message::{encode_frame, next_request_id, HEADER_LEN};
use cleat_transport::{
    Error as TransportError, InternalConnection, InternalConnectionFactory, MessageHeader,
    ResponseBuffers, ServerAddress,
};

type TransportResult<T> = cleat_transport::Result<T>;

/// Shared scripting state: counters plus queues of outcomes the next
/// send/receive/create calls will take
#[derive(Debug)]
pub(crate) struct StubBehavior {
    created: AtomicUsize,
    destroyed: AtomicUsize,
    fail_creates: AtomicUsize,
    send_errors: Mutex<VecDeque<TransportError>>,
    receive_results: Mutex<VecDeque<TransportResult<ResponseBuffers>>>,
    seq: AtomicUsize,
}

impl StubBehavior {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            created: AtomicUsize::new(0),
            destroyed: AtomicUsize::new(0),
            fail_creates: AtomicUsize::new(0),
            send_errors: Mutex::new(VecDeque::new()),
            receive_results: Mutex::new(VecDeque::new()),
            seq: AtomicUsize::new(0),
        })
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn fail_next_creates(&self, count: usize) {
        self.fail_creates.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_send(&self, err: TransportError) {
        self.send_errors.lock().push_back(err);
    }

    pub fn script_receive(&self, result: TransportResult<ResponseBuffers>) {
        self.receive_results.lock().push_back(result);
    }

    /// A standalone stub connection, outside any factory bookkeeping except
    /// the destroy counter
    pub fn connection(self: &Arc<Self>, id: &str) -> Box<dyn InternalConnection> {
        Box::new(StubConnection {
            id: id.to_string(),
            address: ServerAddress::new("127.0.0.1", 4000),
            closed: false,
            behavior: self.clone(),
        })
    }
}

/// A well-formed reply frame correlating to the given request id
pub(crate) fn reply_to(response_to: i32) -> ResponseBuffers {
    let body = Bytes::from_static(b"ok");
    let header = MessageHeader {
        message_length: (HEADER_LEN + body.len()) as i32,
        request_id: 99,
        response_to,
    };
    ResponseBuffers::new(header, body)
}

/// A minimal framed request
pub(crate) fn ping_frame() -> Vec<Bytes> {
    encode_frame(next_request_id(), Bytes::from_static(b"ping"))
}

#[derive(Debug)]
struct StubConnection {
    id: String,
    address: ServerAddress,
    closed: bool,
    behavior: Arc<StubBehavior>,
}

#[async_trait]
impl InternalConnection for StubConnection {
    async fn send_message(&mut self, _buffers: &[Bytes]) -> TransportResult<()> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }
        match self.behavior.send_errors.lock().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn receive_message(&mut self) -> TransportResult<ResponseBuffers> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }
        self.behavior
            .receive_results
            .lock()
            .pop_front()
            .expect("no scripted reply for receive_message")
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.behavior.destroyed.fetch_add(1, Ordering::SeqCst);
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

/// Factory producing scripted stub connections with `stub-N` ids
pub(crate) struct StubConnectionFactory {
    behavior: Arc<StubBehavior>,
}

impl StubConnectionFactory {
    pub fn new(behavior: Arc<StubBehavior>) -> Self {
        Self { behavior }
    }
}

#[async_trait]
impl InternalConnectionFactory for StubConnectionFactory {
    async fn create(&self, address: &ServerAddress) -> TransportResult<Box<dyn InternalConnection>> {
        let behavior = &self.behavior;
        if behavior.fail_creates.load(Ordering::SeqCst) > 0 {
            behavior.fail_creates.fetch_sub(1, Ordering::SeqCst);
            return Err(TransportError::socket("scripted connect failure"));
        }
        behavior.created.fetch_add(1, Ordering::SeqCst);
        let n = behavior.seq.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(StubConnection {
            id: format!("stub-{n}"),
            address: address.clone(),
            closed: false,
            behavior: behavior.clone(),
        }))
    }
}
