pub mod backoff;
pub mod cache;
pub mod client;
pub mod credentials;
pub mod query;
pub mod runtime;
pub mod session;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub use backoff::HandshakeBackoff;
pub use cache::MokaResolutionCache;
pub use client::DodtlsClient;
pub use credentials::MemoryCredentialStore;
pub use runtime::{ThreadRandom, TokioClock};

/// Size of a DNS message header.
pub const DNS_HEADER_LEN: usize = 12;

/// Shortest reply worth handing to the codec: a header plus one record for a
/// single-character name.
pub const MIN_REPLY_LEN: usize = DNS_HEADER_LEN + 7;

/// Overall budget for establishing a session (RFC 8094, section 3.1).
pub const SESSION_TIMEOUT: Duration = Duration::from_millis(15_000);

/// Receive timeout of the first handshake attempt; doubled after each
/// failure (RFC 6347, section 4.2.4.1).
pub const SESSION_RECV_TIMEOUT: Duration = Duration::from_millis(1_000);

/// Query behaviour of the resolver.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DodtlsConfig {
    /// Number of send/receive cycles per query before giving up.
    pub retries: u32,
    /// Time budget of one send/receive cycle in milliseconds.
    pub timeout_ms: u64,
    /// Size of the scratch buffer holding a query or reply.
    pub msg_len: usize,
}

impl DodtlsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Longest domain name that still fits a query into the scratch buffer
    /// (header plus 4 bytes of question type and class).
    pub fn max_name_len(&self) -> usize {
        self.msg_len.saturating_sub(DNS_HEADER_LEN + 4)
    }
}

impl Default for DodtlsConfig {
    fn default() -> Self {
        Self {
            retries: 2,
            timeout_ms: 1000,
            msg_len: 128,
        }
    }
}

/// Every failure the resolver reports to its callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DnsError {
    #[error("domain name longer than {max} bytes")]
    NameTooLong { max: usize },

    #[error("no DNS-over-DTLS server configured")]
    NoServer,

    #[error("not connected to a DNS-over-DTLS server")]
    NotConnected,

    #[error("credential store exhausted")]
    ResourceExhausted,

    #[error("invalid credential or argument")]
    InvalidInput,

    #[error("operation timed out")]
    Timeout,

    #[error("malformed DNS reply")]
    Malformed,

    #[error("transport failure: {0}")]
    Transport(TransportError),
}

/// Errors reported by a [`crate::core::DtlsTransport`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("address already in use")]
    AddrInUse,

    /// Raised by `recv` once a handshake has progressed. During session
    /// setup this is the success signal.
    #[error("DTLS handshake in progress")]
    HandshakePending,

    #[error("timed out")]
    TimedOut,

    #[error("connection refused")]
    ConnectionRefused,

    #[error("{0}")]
    Other(String),
}

/// Errors reported by a [`crate::core::CredentialStore`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialError {
    #[error("credential already exists")]
    AlreadyExists,

    #[error("no space left for credential")]
    NoSpace,

    #[error("invalid credential")]
    Invalid,

    #[error("unknown credential type")]
    TypeUnknown,

    #[error("credential store failure")]
    Failed,
}

/// Errors reported by a [`crate::core::MessageCodec`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    #[error("malformed message")]
    Malformed,

    #[error("no address of the requested family in reply")]
    NoAddress,

    #[error("message does not fit the buffer")]
    BufferTooSmall,
}

pub fn map_transport_error(err: TransportError) -> DnsError {
    match err {
        TransportError::TimedOut => DnsError::Timeout,
        other => DnsError::Transport(other),
    }
}

pub fn map_credential_error(err: CredentialError) -> DnsError {
    match err {
        CredentialError::NoSpace => DnsError::ResourceExhausted,
        CredentialError::AlreadyExists
        | CredentialError::Invalid
        | CredentialError::TypeUnknown
        | CredentialError::Failed => DnsError::InvalidInput,
    }
}

pub fn map_codec_error(err: CodecError) -> DnsError {
    match err {
        CodecError::Malformed | CodecError::NoAddress => DnsError::Malformed,
        CodecError::BufferTooSmall => DnsError::InvalidInput,
    }
}

/// Interprets the outcome of registering a session credential. A credential
/// that is already registered is good enough.
pub fn credential_registration(result: Result<(), CredentialError>) -> Result<(), DnsError> {
    match result {
        Ok(()) | Err(CredentialError::AlreadyExists) => Ok(()),
        Err(e) => Err(map_credential_error(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_mapping() {
        assert_eq!(map_transport_error(TransportError::TimedOut), DnsError::Timeout);
        assert_eq!(
            map_transport_error(TransportError::ConnectionRefused),
            DnsError::Transport(TransportError::ConnectionRefused)
        );
        assert_eq!(
            map_transport_error(TransportError::HandshakePending),
            DnsError::Transport(TransportError::HandshakePending)
        );
    }

    #[test]
    fn test_credential_mapping() {
        assert_eq!(map_credential_error(CredentialError::NoSpace), DnsError::ResourceExhausted);
        for err in [
            CredentialError::Invalid,
            CredentialError::TypeUnknown,
            CredentialError::Failed,
        ] {
            assert_eq!(map_credential_error(err), DnsError::InvalidInput);
        }
    }

    #[test]
    fn test_credential_registration_absorbs_duplicates() {
        assert_eq!(credential_registration(Ok(())), Ok(()));
        assert_eq!(credential_registration(Err(CredentialError::AlreadyExists)), Ok(()));
        assert_eq!(
            credential_registration(Err(CredentialError::NoSpace)),
            Err(DnsError::ResourceExhausted)
        );
        assert_eq!(
            credential_registration(Err(CredentialError::Invalid)),
            Err(DnsError::InvalidInput)
        );
    }

    #[test]
    fn test_codec_mapping() {
        assert_eq!(map_codec_error(CodecError::Malformed), DnsError::Malformed);
        assert_eq!(map_codec_error(CodecError::NoAddress), DnsError::Malformed);
        assert_eq!(map_codec_error(CodecError::BufferTooSmall), DnsError::InvalidInput);
    }

    #[test]
    fn test_max_name_len() {
        let config = DodtlsConfig::default();
        assert_eq!(config.max_name_len(), 112);
        assert_eq!(config.timeout(), Duration::from_millis(1000));

        let tiny = DodtlsConfig {
            msg_len: 8,
            ..Default::default()
        };
        assert_eq!(tiny.max_name_len(), 0);
    }
}
