use crate::{
    core::{
        AddressFamily, CredentialTag, DtlsTransport, MessageCodec, RandomSource,
        ResolutionCache, Resolved, Role,
    },
    dns::{CodecError, MokaResolutionCache, TransportError},
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// How one handshake attempt of the mock transport plays out.
#[derive(Debug, Clone)]
pub enum HandshakeStep {
    /// The server answers; `recv` reports the handshake signal at once.
    Complete,
    /// Nothing comes back; `recv` waits out its timeout.
    NoAnswer,
    /// `session_init` itself fails.
    InitFails,
}

/// How one `send` of the mock transport plays out.
#[derive(Debug, Clone)]
pub enum SendStep {
    /// Accepts the datagram after `delay`.
    Ok { delay: Duration },
    /// Fails after `delay`.
    Fail { delay: Duration },
}

/// How one query-phase `recv` of the mock transport plays out.
#[derive(Debug, Clone)]
pub enum RecvStep {
    /// Delivers these bytes immediately.
    Reply(Vec<u8>),
    /// Nothing arrives; waits out the timeout.
    Silence,
    /// Claims one byte more than the buffer holds.
    Overrun,
}

/// Everything the mock transport was asked to do, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    CreateSocket { local: SocketAddr, remote: SocketAddr },
    CreateSock { tag: CredentialTag, role: Role },
    SessionInit { at_ms: u64 },
    HandshakeRecv { at_ms: u64, timeout: Duration },
    Send { payload: Vec<u8>, timeout: Duration },
    Recv { timeout: Duration },
    SessionDestroy,
    CloseSock,
    CloseSocket,
}

#[derive(Default)]
struct MockScript {
    binds: VecDeque<Result<(), TransportError>>,
    sock_failure: Option<TransportError>,
    handshakes: VecDeque<HandshakeStep>,
    sends: VecDeque<SendStep>,
    recvs: VecDeque<RecvStep>,
    events: Vec<TransportEvent>,
}

/// Handle type shared by socket, sock and session of the mock.
#[derive(Debug)]
pub struct MockHandle {
    remote: SocketAddr,
    established: bool,
}

/// Scripted DTLS transport. Unscripted binds, handshakes and sends succeed;
/// unscripted receives stay silent.
#[derive(Clone)]
pub struct MockTransport {
    script: Arc<Mutex<MockScript>>,
    origin: Instant,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(MockScript::default())),
            origin: Instant::now(),
        }
    }

    pub fn push_bind(&self, result: Result<(), TransportError>) {
        self.script.lock().unwrap().binds.push_back(result);
    }

    pub fn fail_sock_creation(&self, err: TransportError) {
        self.script.lock().unwrap().sock_failure = Some(err);
    }

    pub fn push_handshake(&self, step: HandshakeStep) {
        self.script.lock().unwrap().handshakes.push_back(step);
    }

    pub fn push_send(&self, step: SendStep) {
        self.script.lock().unwrap().sends.push_back(step);
    }

    pub fn push_recv(&self, step: RecvStep) {
        self.script.lock().unwrap().recvs.push_back(step);
    }

    pub fn events(&self) -> Vec<TransportEvent> {
        self.script.lock().unwrap().events.clone()
    }

    pub fn clear_events(&self) {
        self.script.lock().unwrap().events.clear();
    }

    pub fn count(&self, matches: impl Fn(&TransportEvent) -> bool) -> usize {
        self.events().iter().filter(|e| matches(e)).count()
    }

    fn record(&self, event: TransportEvent) {
        self.script.lock().unwrap().events.push(event);
    }

    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DtlsTransport for MockTransport {
    type Socket = MockHandle;
    type Sock = MockHandle;
    type Session = MockHandle;

    async fn create_socket(
        &self,
        local: SocketAddr,
        remote: SocketAddr,
    ) -> Result<MockHandle, TransportError> {
        self.record(TransportEvent::CreateSocket { local, remote });
        let result = self.script.lock().unwrap().binds.pop_front().unwrap_or(Ok(()));
        result.map(|()| MockHandle {
            remote,
            established: false,
        })
    }

    fn socket_remote(&self, socket: &MockHandle) -> SocketAddr {
        socket.remote
    }

    async fn create_sock(
        &self,
        socket: &MockHandle,
        tag: CredentialTag,
        role: Role,
    ) -> Result<MockHandle, TransportError> {
        self.record(TransportEvent::CreateSock { tag, role });
        match self.script.lock().unwrap().sock_failure.clone() {
            Some(err) => Err(err),
            None => Ok(MockHandle {
                remote: socket.remote,
                established: false,
            }),
        }
    }

    async fn session_init(
        &self,
        _sock: &mut MockHandle,
        remote: SocketAddr,
    ) -> Result<MockHandle, TransportError> {
        self.record(TransportEvent::SessionInit {
            at_ms: self.now_ms(),
        });
        let fails = matches!(
            self.script.lock().unwrap().handshakes.front(),
            Some(HandshakeStep::InitFails)
        );
        if fails {
            self.script.lock().unwrap().handshakes.pop_front();
            return Err(TransportError::Other("session init failed".to_string()));
        }
        Ok(MockHandle {
            remote,
            established: false,
        })
    }

    async fn send(
        &self,
        _sock: &mut MockHandle,
        _session: &mut MockHandle,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        self.record(TransportEvent::Send {
            payload: data.to_vec(),
            timeout,
        });
        let step = self
            .script
            .lock()
            .unwrap()
            .sends
            .pop_front()
            .unwrap_or(SendStep::Ok {
                delay: Duration::ZERO,
            });
        match step {
            SendStep::Ok { delay } => {
                tokio::time::sleep(delay).await;
                Ok(data.len())
            }
            SendStep::Fail { delay } => {
                tokio::time::sleep(delay).await;
                Err(TransportError::Other("send failed".to_string()))
            }
        }
    }

    async fn recv(
        &self,
        _sock: &mut MockHandle,
        session: &mut MockHandle,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        if !session.established {
            self.record(TransportEvent::HandshakeRecv {
                at_ms: self.now_ms(),
                timeout,
            });
            let step = self
                .script
                .lock()
                .unwrap()
                .handshakes
                .pop_front()
                .unwrap_or(HandshakeStep::Complete);
            return match step {
                HandshakeStep::Complete => {
                    session.established = true;
                    Err(TransportError::HandshakePending)
                }
                HandshakeStep::NoAnswer | HandshakeStep::InitFails => {
                    tokio::time::sleep(timeout).await;
                    Err(TransportError::TimedOut)
                }
            };
        }

        self.record(TransportEvent::Recv { timeout });
        let step = self
            .script
            .lock()
            .unwrap()
            .recvs
            .pop_front()
            .unwrap_or(RecvStep::Silence);
        match step {
            RecvStep::Reply(bytes) => {
                let len = bytes.len().min(buf.len());
                buf[..len].copy_from_slice(&bytes[..len]);
                Ok(len)
            }
            RecvStep::Silence => {
                tokio::time::sleep(timeout).await;
                Err(TransportError::TimedOut)
            }
            RecvStep::Overrun => Ok(buf.len() + 1),
        }
    }

    async fn session_destroy(&self, _sock: &mut MockHandle, _session: MockHandle) {
        self.record(TransportEvent::SessionDestroy);
    }

    async fn close_sock(&self, _sock: MockHandle) {
        self.record(TransportEvent::CloseSock);
    }

    async fn close_socket(&self, _socket: MockHandle) {
        self.record(TransportEvent::CloseSocket);
    }
}

/// Toy wire format standing in for real DNS messages.
///
/// A query is the big-endian id followed by the name. A reply is the id,
/// a family byte (4 or 6), a big-endian TTL and the address, zero-padded to
/// 20 bytes. A family byte of 0 marks a reply the codec rejects.
#[derive(Default)]
pub struct FakeCodec {
    encoded_ids: Mutex<Vec<u16>>,
}

impl FakeCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids of every query encoded so far.
    pub fn encoded_ids(&self) -> Vec<u16> {
        self.encoded_ids.lock().unwrap().clone()
    }

    pub fn reply(id: u16, addr: IpAddr, ttl: u32) -> Vec<u8> {
        let mut bytes = id.to_be_bytes().to_vec();
        match addr {
            IpAddr::V4(v4) => {
                bytes.push(4);
                bytes.extend_from_slice(&ttl.to_be_bytes());
                bytes.extend_from_slice(&v4.octets());
            }
            IpAddr::V6(v6) => {
                bytes.push(6);
                bytes.extend_from_slice(&ttl.to_be_bytes());
                bytes.extend_from_slice(&v6.octets());
            }
        }
        bytes.resize(bytes.len().max(20), 0);
        bytes
    }

    /// A long enough reply the codec refuses to parse.
    pub fn garbage_reply() -> Vec<u8> {
        vec![0u8; 20]
    }
}

impl MessageCodec for FakeCodec {
    fn encode_query(
        &self,
        buf: &mut [u8],
        domain: &str,
        id: u16,
        _family: AddressFamily,
    ) -> Result<usize, CodecError> {
        let len = 2 + domain.len();
        if len > buf.len() {
            return Err(CodecError::BufferTooSmall);
        }
        buf[..2].copy_from_slice(&id.to_be_bytes());
        buf[2..len].copy_from_slice(domain.as_bytes());
        self.encoded_ids.lock().unwrap().push(id);
        Ok(len)
    }

    fn decode_reply(&self, reply: &[u8], family: AddressFamily) -> Result<Resolved, CodecError> {
        if reply.len() < 7 {
            return Err(CodecError::Malformed);
        }
        let ttl = u32::from_be_bytes([reply[3], reply[4], reply[5], reply[6]]);
        let addr = match reply[2] {
            4 if reply.len() >= 11 => {
                let octets: [u8; 4] = reply[7..11].try_into().map_err(|_| CodecError::Malformed)?;
                IpAddr::from(octets)
            }
            6 if reply.len() >= 23 => {
                let octets: [u8; 16] =
                    reply[7..23].try_into().map_err(|_| CodecError::Malformed)?;
                IpAddr::from(octets)
            }
            _ => return Err(CodecError::Malformed),
        };
        if !family.accepts(&addr) {
            return Err(CodecError::NoAddress);
        }
        Ok(Resolved { addr, ttl })
    }
}

/// Resolution cache that counts how it is used.
pub struct CountingCache {
    inner: MokaResolutionCache,
    lookups: AtomicUsize,
    inserts: AtomicUsize,
}

impl CountingCache {
    pub fn new() -> Self {
        Self {
            inner: MokaResolutionCache::new(16),
            lookups: AtomicUsize::new(0),
            inserts: AtomicUsize::new(0),
        }
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn inserts(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }
}

impl Default for CountingCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResolutionCache for CountingCache {
    async fn lookup(&self, domain: &str, family: AddressFamily) -> Option<Resolved> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.lookup(domain, family).await
    }

    async fn insert(&self, domain: &str, resolved: Resolved) {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        self.inner.insert(domain, resolved).await;
    }
}

/// Random source replaying a fixed sequence, repeating its last value.
pub struct SequenceRandom {
    values: Mutex<VecDeque<u32>>,
    last: Mutex<u32>,
}

impl SequenceRandom {
    pub fn new(values: impl IntoIterator<Item = u32>) -> Self {
        Self {
            values: Mutex::new(values.into_iter().collect()),
            last: Mutex::new(0),
        }
    }
}

impl RandomSource for SequenceRandom {
    fn next_u32(&self) -> u32 {
        let mut last = self.last.lock().unwrap();
        if let Some(value) = self.values.lock().unwrap().pop_front() {
            *last = value;
        }
        *last
    }
}
