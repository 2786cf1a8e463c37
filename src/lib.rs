//! dodtls - DNS over DTLS resolver client
//!
//! Resolves names through a single DTLS session to one resolver server.
//! Session setup (credential registration, handshake with backoff,
//! teardown) and the query retry loop live in [`dns`]; the transport, codec,
//! cache and credential store they drive are described by the traits in
//! [`core`].

pub mod config;
pub mod core;
pub mod dns;

// Re-export core types for convenience
pub use crate::core::*;
pub use crate::dns::{DnsError, DodtlsClient};
