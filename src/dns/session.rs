//! Session lifecycle: binding, credential registration, DTLS handshake with
//! backoff, and teardown.

use crate::{
    core::{Credential, CredentialIdentity, CredentialStore, CredentialType, DtlsTransport, Role},
    dns::{
        client::{DodtlsClient, ServerSession},
        credential_registration, map_transport_error, DnsError, HandshakeBackoff, TransportError,
        SESSION_RECV_TIMEOUT, SESSION_TIMEOUT,
    },
};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// First port of the IANA dynamic/private range.
pub const DYNAMIC_PORT_MIN: u16 = 49152;

/// Picks an ephemeral port in 49152..=65535 from a random value.
pub fn ephemeral_port(random: u32) -> u16 {
    let span = u32::from(u16::MAX - DYNAMIC_PORT_MIN) + 1;
    DYNAMIC_PORT_MIN + (random % span) as u16
}

/// Unspecified local endpoint of the same family as `server`.
fn local_endpoint(server: &SocketAddr, port: u16) -> SocketAddr {
    let ip = match server.ip() {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    SocketAddr::new(ip, port)
}

/// A credential registered for a session that is not yet established or is
/// being torn down. Dropping it while armed removes the credential, so a
/// cancelled connect or disconnect cannot leave it behind.
struct CredentialGuard<'a> {
    credentials: &'a dyn CredentialStore,
    identity: CredentialIdentity,
    armed: bool,
}

impl<'a> CredentialGuard<'a> {
    fn new(credentials: &'a dyn CredentialStore, identity: CredentialIdentity) -> Self {
        Self {
            credentials,
            identity,
            armed: true,
        }
    }

    /// Removes the credential now.
    fn remove(mut self) {
        self.armed = false;
        self.credentials.remove(self.identity);
    }

    /// Keeps the credential registered; the session now owns it.
    fn disarm(mut self) -> CredentialIdentity {
        self.armed = false;
        self.identity
    }
}

impl Drop for CredentialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!(tag = self.identity.tag, "Session abandoned, removing credential");
            self.credentials.remove(self.identity);
        }
    }
}

impl<T: DtlsTransport> DodtlsClient<T> {
    /// Establishes the DTLS session to `server`, replacing any existing one.
    ///
    /// On failure everything built so far is torn down again; the client is
    /// left disconnected.
    #[instrument(skip(self, credential), fields(tag = credential.tag))]
    pub async fn connect(&self, server: SocketAddr, credential: &Credential) -> Result<(), DnsError> {
        if credential.kind == CredentialType::Empty {
            return Err(DnsError::InvalidInput);
        }

        let mut state = self.lock_scratch().await;
        if let Some(previous) = state.server.take() {
            info!(server = %server, "Replacing existing DNS-over-DTLS session");
            self.close_session(previous).await;
        }

        let socket = self.bind_ephemeral(server).await?;

        if let Err(e) = credential_registration(self.credentials.add(credential)) {
            warn!(error = %e, "Unable to add credential to credential store");
            self.transport.close_socket(socket).await;
            metrics::counter!("dodtls_sessions_total", "status" => "failure").increment(1);
            return Err(e);
        }
        let registered = CredentialGuard::new(self.credentials.as_ref(), credential.identity());

        let mut sock = match self
            .transport
            .create_sock(&socket, credential.tag, Role::Client)
            .await
        {
            Ok(sock) => sock,
            Err(e) => {
                warn!(error = %e, "Unable to create DTLS sock");
                registered.remove();
                self.transport.close_socket(socket).await;
                metrics::counter!("dodtls_sessions_total", "status" => "failure").increment(1);
                return Err(map_transport_error(e));
            }
        };

        match self.handshake(&mut sock, server, &mut state.buf).await {
            Some(session) => {
                state.server = Some(ServerSession {
                    socket,
                    sock,
                    session,
                    identity: registered.disarm(),
                });
                state.next_id = (self.random.next_u32() & 0xffff) as u16;
                info!(server = %server, "DNS-over-DTLS session established");
                metrics::counter!("dodtls_sessions_total", "status" => "established").increment(1);
                Ok(())
            }
            None => {
                warn!(server = %server, "DTLS handshake timed out");
                self.transport.close_sock(sock).await;
                registered.remove();
                self.transport.close_socket(socket).await;
                metrics::counter!("dodtls_sessions_total", "status" => "timeout").increment(1);
                Err(DnsError::Timeout)
            }
        }
    }

    /// Tears down the active session. A no-op when there is none.
    pub async fn disconnect(&self) -> Result<(), DnsError> {
        let mut state = self.lock_scratch().await;
        if let Some(server) = state.server.take() {
            self.close_session(server).await;
            info!("DNS-over-DTLS session closed");
        }
        Ok(())
    }

    /// Binds a UDP socket on a random ephemeral port, drawing a new port for
    /// as long as the chosen one is taken.
    async fn bind_ephemeral(&self, server: SocketAddr) -> Result<T::Socket, DnsError> {
        loop {
            let local = local_endpoint(&server, ephemeral_port(self.random.next_u32()));
            match self.transport.create_socket(local, server).await {
                Ok(socket) => {
                    debug!(local = %local, "Bound UDP socket");
                    return Ok(socket);
                }
                Err(TransportError::AddrInUse) => {
                    debug!(local = %local, "Local port in use, picking another");
                }
                Err(e) => {
                    warn!(error = %e, "Unable to create UDP socket");
                    return Err(map_transport_error(e));
                }
            }
        }
    }

    /// Drives the handshake until the transport signals it, retrying with
    /// exponential backoff until [`SESSION_TIMEOUT`] has passed.
    async fn handshake(
        &self,
        sock: &mut T::Sock,
        server: SocketAddr,
        buf: &mut [u8],
    ) -> Option<T::Session> {
        let mut backoff =
            HandshakeBackoff::new(self.clock.now_ms(), SESSION_TIMEOUT, SESSION_RECV_TIMEOUT);

        while let Some(timeout) = backoff.next_attempt(self.clock.now_ms()) {
            let try_start = self.clock.now_ms();
            metrics::counter!("dodtls_handshake_attempts_total").increment(1);

            match self.transport.session_init(sock, server).await {
                Ok(mut session) => {
                    match self.transport.recv(sock, &mut session, buf, timeout).await {
                        Err(TransportError::HandshakePending) => return Some(session),
                        Ok(len) => {
                            debug!(len, ?timeout, "Unexpected data before handshake completed");
                        }
                        Err(e) => {
                            debug!(error = %e, ?timeout, "Unable to establish DTLS handshake");
                        }
                    }
                    self.transport.session_destroy(sock, session).await;
                }
                Err(e) => {
                    debug!(error = %e, "Unable to initialize DTLS session");
                }
            }

            let spent = Duration::from_millis(self.clock.now_ms().saturating_sub(try_start));
            if spent < timeout {
                self.clock.sleep(timeout - spent).await;
            }
            backoff.record_failure(self.clock.now_ms());
        }

        debug!(attempts = backoff.attempts(), "Handshake deadline exhausted");
        None
    }

    /// Releases every resource of an established session.
    pub(crate) async fn close_session(&self, server: ServerSession<T>) {
        let ServerSession {
            socket,
            mut sock,
            session,
            identity,
        } = server;
        let registered = CredentialGuard::new(self.credentials.as_ref(), identity);
        self.transport.session_destroy(&mut sock, session).await;
        self.transport.close_sock(sock).await;
        registered.remove();
        self.transport.close_socket(socket).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::MemoryCredentialStore;

    #[test]
    fn test_ephemeral_port_range() {
        assert_eq!(ephemeral_port(0), DYNAMIC_PORT_MIN);
        assert_eq!(ephemeral_port(16383), u16::MAX);
        assert_eq!(ephemeral_port(16384), DYNAMIC_PORT_MIN);
        for random in [1, 77, 4_000_000_000, u32::MAX] {
            assert!(ephemeral_port(random) >= DYNAMIC_PORT_MIN);
        }
    }

    #[test]
    fn test_credential_guard_removes_unless_disarmed() {
        let store = MemoryCredentialStore::new(2);
        let psk = Credential::new(4, CredentialType::Psk, b"key".to_vec());

        store.add(&psk).unwrap();
        drop(CredentialGuard::new(&store, psk.identity()));
        assert!(store.is_empty());

        store.add(&psk).unwrap();
        let identity = CredentialGuard::new(&store, psk.identity()).disarm();
        assert_eq!(identity, psk.identity());
        assert!(store.contains(identity));

        CredentialGuard::new(&store, identity).remove();
        assert!(store.is_empty());
    }

    #[test]
    fn test_local_endpoint_matches_server_family() {
        let v4: SocketAddr = "192.0.2.1:853".parse().unwrap();
        let v6: SocketAddr = "[2001:db8::1]:853".parse().unwrap();

        assert_eq!(local_endpoint(&v4, 50000), "0.0.0.0:50000".parse().unwrap());
        assert_eq!(local_endpoint(&v6, 50001), "[::]:50001".parse().unwrap());
    }
}
