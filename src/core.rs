//! Core domain types and collaborator traits for the DNS-over-DTLS client
//!
//! This module defines the data that flows through the resolver and the
//! trait contracts of everything the resolver drives but does not own: the
//! DTLS transport, the credential store, the DNS message codec, the
//! resolution cache, the random source and the clock.

use crate::dns::{CodecError, CredentialError, TransportError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Address family requested from a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressFamily {
    /// Either family; the first record the codec accepts wins.
    Unspec,
    Inet,
    Inet6,
}

impl AddressFamily {
    /// Returns the family an address belongs to.
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => AddressFamily::Inet,
            IpAddr::V6(_) => AddressFamily::Inet6,
        }
    }

    /// Checks whether `addr` satisfies a request for this family.
    pub fn accepts(&self, addr: &IpAddr) -> bool {
        match self {
            AddressFamily::Unspec => true,
            family => *family == AddressFamily::of(addr),
        }
    }
}

/// A resolved address together with its remaining validity in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    pub addr: IpAddr,
    pub ttl: u32,
}

/// Tag under which keying material is registered with the credential store.
pub type CredentialTag = u16;

/// Kind of keying material held by a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CredentialType {
    /// No credential. A session recorded with this type does not exist.
    Empty,
    Psk,
    Ecdsa,
}

/// The (tag, type) pair identifying a registered credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CredentialIdentity {
    pub tag: CredentialTag,
    pub kind: CredentialType,
}

impl CredentialIdentity {
    pub const EMPTY: CredentialIdentity = CredentialIdentity {
        tag: 0,
        kind: CredentialType::Empty,
    };

    pub fn is_empty(&self) -> bool {
        self.kind == CredentialType::Empty
    }
}

/// Keying material handed to the credential store when a session is set up.
///
/// The resolver never inspects `material`; it only registers the credential
/// and removes it again by identity.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub tag: CredentialTag,
    pub kind: CredentialType,
    pub material: Vec<u8>,
}

impl Credential {
    pub fn new(tag: CredentialTag, kind: CredentialType, material: impl Into<Vec<u8>>) -> Self {
        Self {
            tag,
            kind,
            material: material.into(),
        }
    }

    pub fn identity(&self) -> CredentialIdentity {
        CredentialIdentity {
            tag: self.tag,
            kind: self.kind,
        }
    }
}

// Keying material stays out of logs.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("tag", &self.tag)
            .field("kind", &self.kind)
            .field("material", &format_args!("[{} bytes]", self.material.len()))
            .finish()
    }
}

/// Side of the DTLS handshake a session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

// =============================================================================
// Collaborator Traits
// =============================================================================

/// Encrypted datagram transport: an unencrypted UDP socket, a DTLS sock
/// layered on top of it, and per-peer DTLS sessions.
///
/// `recv` on a session whose handshake has just completed reports
/// [`TransportError::HandshakePending`]; that signal is how the caller learns
/// a session came up.
#[async_trait]
pub trait DtlsTransport: Send + Sync + 'static {
    /// Bound UDP socket.
    type Socket: Send + Sync;
    /// DTLS sock layered on a [`Self::Socket`].
    type Sock: Send + Sync;
    /// Per-peer DTLS session state.
    type Session: Send + Sync;

    /// Binds a UDP socket to `local`, connected to `remote`.
    ///
    /// # Returns
    /// * `Err(TransportError::AddrInUse)` if the local port is taken
    async fn create_socket(
        &self,
        local: SocketAddr,
        remote: SocketAddr,
    ) -> Result<Self::Socket, TransportError>;

    /// Remote endpoint a socket is connected to.
    fn socket_remote(&self, socket: &Self::Socket) -> SocketAddr;

    /// Creates a DTLS sock over `socket` using the credential registered under `tag`.
    async fn create_sock(
        &self,
        socket: &Self::Socket,
        tag: CredentialTag,
        role: Role,
    ) -> Result<Self::Sock, TransportError>;

    /// Starts a handshake toward `remote`, returning the fresh session state.
    async fn session_init(
        &self,
        sock: &mut Self::Sock,
        remote: SocketAddr,
    ) -> Result<Self::Session, TransportError>;

    /// Sends `data` as one encrypted record, waiting at most `timeout`.
    async fn send(
        &self,
        sock: &mut Self::Sock,
        session: &mut Self::Session,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError>;

    /// Receives one decrypted record into `buf`, waiting at most `timeout`.
    async fn recv(
        &self,
        sock: &mut Self::Sock,
        session: &mut Self::Session,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError>;

    async fn session_destroy(&self, sock: &mut Self::Sock, session: Self::Session);

    async fn close_sock(&self, sock: Self::Sock);

    async fn close_socket(&self, socket: Self::Socket);
}

/// Registers and removes keying material used by the transport.
pub trait CredentialStore: Send + Sync {
    /// Adds a credential.
    ///
    /// # Returns
    /// * `Err(CredentialError::AlreadyExists)` if the (tag, type) is already registered
    /// * `Err(CredentialError::NoSpace)` if the store is full
    fn add(&self, credential: &Credential) -> Result<(), CredentialError>;

    fn remove(&self, identity: CredentialIdentity);
}

/// DNS wire-format encoder and decoder.
pub trait MessageCodec: Send + Sync {
    /// Writes a query for `domain` into `buf` and returns the encoded length.
    fn encode_query(
        &self,
        buf: &mut [u8],
        domain: &str,
        id: u16,
        family: AddressFamily,
    ) -> Result<usize, CodecError>;

    /// Extracts the first address of `family` and its TTL from a reply.
    fn decode_reply(&self, reply: &[u8], family: AddressFamily) -> Result<Resolved, CodecError>;
}

/// Domain name to address store with per-entry validity.
#[async_trait]
pub trait ResolutionCache: Send + Sync {
    /// Returns a still-valid entry, with its remaining TTL.
    async fn lookup(&self, domain: &str, family: AddressFamily) -> Option<Resolved>;

    async fn insert(&self, domain: &str, resolved: Resolved);
}

/// Source of pseudo-random numbers for port selection and transaction ids.
pub trait RandomSource: Send + Sync {
    fn next_u32(&self) -> u32;
}

/// Monotonic millisecond clock and sleep service.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;

    async fn sleep(&self, duration: Duration);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_family_accepts() {
        let v4 = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1));
        let v6 = IpAddr::V6(Ipv6Addr::LOCALHOST);

        assert!(AddressFamily::Unspec.accepts(&v4));
        assert!(AddressFamily::Unspec.accepts(&v6));
        assert!(AddressFamily::Inet.accepts(&v4));
        assert!(!AddressFamily::Inet.accepts(&v6));
        assert!(AddressFamily::Inet6.accepts(&v6));
        assert!(!AddressFamily::Inet6.accepts(&v4));
    }

    #[test]
    fn test_credential_debug_hides_material() {
        let credential = Credential::new(7, CredentialType::Psk, b"secret-key".to_vec());
        let rendered = format!("{:?}", credential);
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("10 bytes"));
    }

    #[test]
    fn test_empty_identity() {
        assert!(CredentialIdentity::EMPTY.is_empty());
        let identity = Credential::new(1, CredentialType::Ecdsa, vec![]).identity();
        assert!(!identity.is_empty());
    }
}
