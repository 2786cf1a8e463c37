#![allow(dead_code)]
//! Shared setup for the resolver integration tests.

use dodtls::{
    dns::{
        test_utils::{CountingCache, FakeCodec, MockTransport},
        test_utils::SequenceRandom,
        DodtlsConfig, MemoryCredentialStore,
    },
    Credential, CredentialType, DodtlsClient,
};
use std::net::SocketAddr;
use std::sync::Arc;

pub const SERVER: &str = "192.0.2.53:853";

pub fn server() -> SocketAddr {
    SERVER.parse().unwrap()
}

pub fn psk() -> Credential {
    Credential::new(10, CredentialType::Psk, b"client-identity:secret".to_vec())
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// A client wired to fakes the test can inspect.
pub struct Harness {
    pub client: Arc<DodtlsClient<MockTransport>>,
    pub transport: MockTransport,
    pub codec: Arc<FakeCodec>,
    pub cache: Arc<CountingCache>,
    pub credentials: Arc<MemoryCredentialStore>,
}

pub struct HarnessBuilder {
    config: DodtlsConfig,
    credential_capacity: usize,
    random: Vec<u32>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            config: DodtlsConfig::default(),
            credential_capacity: 2,
            random: vec![0],
        }
    }

    pub fn with_config(mut self, config: DodtlsConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.config.retries = retries;
        self
    }

    pub fn with_credential_capacity(mut self, capacity: usize) -> Self {
        self.credential_capacity = capacity;
        self
    }

    /// Values handed out by the random source, in order. The last one repeats.
    pub fn with_random(mut self, values: Vec<u32>) -> Self {
        self.random = values;
        self
    }

    pub fn build(self) -> Harness {
        init_tracing();
        let transport = MockTransport::new();
        let codec = Arc::new(FakeCodec::new());
        let cache = Arc::new(CountingCache::new());
        let credentials = Arc::new(MemoryCredentialStore::new(self.credential_capacity));
        let client = DodtlsClient::new(transport.clone(), codec.clone(), self.config)
            .with_cache(cache.clone())
            .with_credential_store(credentials.clone())
            .with_random(Arc::new(SequenceRandom::new(self.random)));

        Harness {
            client: Arc::new(client),
            transport,
            codec,
            cache,
            credentials,
        }
    }
}

impl Harness {
    pub fn new() -> Self {
        HarnessBuilder::new().build()
    }

    /// Connects to [`SERVER`] and forgets the transport events it produced.
    pub async fn connected(self) -> Self {
        self.client
            .set_server(Some(server()), &psk())
            .await
            .expect("connect should succeed");
        self.transport.clear_events();
        self
    }
}
