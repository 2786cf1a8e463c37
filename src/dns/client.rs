//! The DNS-over-DTLS client and its shared resolver state
//!
//! A [`DodtlsClient`] owns the one server association, the transaction-id
//! counter and the scratch buffer that stages queries and replies. All of
//! it lives behind a single async mutex, so one connect, disconnect or
//! query runs to completion before the next one starts.

use crate::{
    config::{CacheConfig, Config, CredentialConfig},
    core::{
        Clock, Credential, CredentialIdentity, CredentialStore, DtlsTransport, MessageCodec,
        RandomSource, ResolutionCache,
    },
    dns::{
        DnsError, DodtlsConfig, MemoryCredentialStore, MokaResolutionCache, ThreadRandom,
        TokioClock,
    },
};
use std::{
    net::SocketAddr,
    ops::{Deref, DerefMut},
    sync::Arc,
};
use tokio::sync::{Mutex, MutexGuard};

/// An established session: socket, DTLS sock, DTLS session and the
/// credential registered for it. Exists only when fully set up.
pub(crate) struct ServerSession<T: DtlsTransport> {
    pub(crate) socket: T::Socket,
    pub(crate) sock: T::Sock,
    pub(crate) session: T::Session,
    pub(crate) identity: CredentialIdentity,
}

/// Everything the single lock guards.
pub(crate) struct ServerState<T: DtlsTransport> {
    pub(crate) server: Option<ServerSession<T>>,
    pub(crate) next_id: u16,
    pub(crate) buf: Box<[u8]>,
}

/// Exclusive access to the resolver state that zeroes the scratch buffer
/// before the lock is released, on every exit path.
pub(crate) struct ScratchGuard<'a, T: DtlsTransport> {
    state: MutexGuard<'a, ServerState<T>>,
}

impl<T: DtlsTransport> Deref for ScratchGuard<'_, T> {
    type Target = ServerState<T>;

    fn deref(&self) -> &Self::Target {
        &self.state
    }
}

impl<T: DtlsTransport> DerefMut for ScratchGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.state
    }
}

impl<T: DtlsTransport> Drop for ScratchGuard<'_, T> {
    fn drop(&mut self) {
        // Flush out unencrypted query and reply data.
        self.state.buf.fill(0);
    }
}

/// Resolver client that tunnels DNS queries through one DTLS session.
pub struct DodtlsClient<T: DtlsTransport> {
    pub(crate) transport: T,
    pub(crate) codec: Arc<dyn MessageCodec>,
    pub(crate) credentials: Arc<dyn CredentialStore>,
    pub(crate) cache: Arc<dyn ResolutionCache>,
    pub(crate) random: Arc<dyn RandomSource>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: DodtlsConfig,
    pub(crate) state: Mutex<ServerState<T>>,
}

impl<T: DtlsTransport> DodtlsClient<T> {
    /// Creates a client with the default cache, credential store, random
    /// source and clock.
    pub fn new(transport: T, codec: Arc<dyn MessageCodec>, config: DodtlsConfig) -> Self {
        Self {
            transport,
            codec,
            credentials: Arc::new(MemoryCredentialStore::new(
                CredentialConfig::default().capacity,
            )),
            cache: Arc::new(MokaResolutionCache::new(CacheConfig::default().max_entries)),
            random: Arc::new(ThreadRandom),
            clock: Arc::new(TokioClock::new()),
            state: Mutex::new(ServerState {
                server: None,
                next_id: 0,
                buf: vec![0u8; config.msg_len].into_boxed_slice(),
            }),
            config,
        }
    }

    /// Creates a client sized by the application configuration.
    pub fn from_config(transport: T, codec: Arc<dyn MessageCodec>, config: &Config) -> Self {
        Self::new(transport, codec, config.dodtls.clone())
            .with_cache(Arc::new(MokaResolutionCache::new(config.cache.max_entries)))
            .with_credential_store(Arc::new(MemoryCredentialStore::new(
                config.credentials.capacity,
            )))
    }

    pub fn with_credential_store(mut self, credentials: Arc<dyn CredentialStore>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn ResolutionCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &DodtlsConfig {
        &self.config
    }

    pub(crate) async fn lock_scratch(&self) -> ScratchGuard<'_, T> {
        ScratchGuard {
            state: self.state.lock().await,
        }
    }

    /// Attaches to `server` when given, otherwise detaches from the current
    /// server.
    pub async fn set_server(
        &self,
        server: Option<SocketAddr>,
        credential: &Credential,
    ) -> Result<(), DnsError> {
        match server {
            Some(server) => self.connect(server, credential).await,
            None => self.disconnect().await,
        }
    }

    /// Returns `true` while a session is established.
    pub async fn is_active(&self) -> bool {
        self.state.lock().await.server.is_some()
    }

    /// Remote endpoint of the active session.
    pub async fn get_remote(&self) -> Result<SocketAddr, DnsError> {
        let state = self.state.lock().await;
        state
            .server
            .as_ref()
            .map(|server| self.transport.socket_remote(&server.socket))
            .ok_or(DnsError::NotConnected)
    }

    /// Identity of the credential backing the active session, or
    /// [`CredentialIdentity::EMPTY`] when disconnected.
    pub async fn credential_identity(&self) -> CredentialIdentity {
        self.state
            .lock()
            .await
            .server
            .as_ref()
            .map_or(CredentialIdentity::EMPTY, |server| server.identity)
    }

    /// Checks that the scratch buffer holds no residual data.
    #[cfg(any(test, feature = "test-utils"))]
    pub async fn scratch_is_clear(&self) -> bool {
        self.state.lock().await.buf.iter().all(|&b| b == 0)
    }

    /// Transaction id the next query will use.
    #[cfg(any(test, feature = "test-utils"))]
    pub async fn peek_next_id(&self) -> u16 {
        self.state.lock().await.next_id
    }
}
