//! Name resolution over the active DTLS session.

use crate::{
    core::{AddressFamily, DtlsTransport, Resolved},
    dns::{
        client::{DodtlsClient, ServerState},
        map_codec_error, map_transport_error, DnsError, MIN_REPLY_LEN,
    },
};
use std::time::Duration;
use tracing::{debug, instrument, trace, warn};

impl<T: DtlsTransport> DodtlsClient<T> {
    /// Resolves `domain` to an address of `family`.
    ///
    /// Answers from the resolution cache when possible. Otherwise sends the
    /// query over the active session up to `retries` times and caches the
    /// decoded answer.
    ///
    /// # Returns
    /// * `Ok(Resolved)` with the address and its TTL
    /// * `Err(DnsError::NameTooLong)` without any I/O if `domain` cannot fit a query
    /// * `Err(DnsError::NoServer)` if no session is established
    /// * The error of the last attempt once all retries failed
    #[instrument(skip(self))]
    pub async fn resolve(&self, domain: &str, family: AddressFamily) -> Result<Resolved, DnsError> {
        let result = self.resolve_inner(domain, family).await;
        let status = match &result {
            Ok(_) => "success",
            Err(DnsError::NameTooLong { .. }) => "name_too_long",
            Err(DnsError::NoServer) => "no_server",
            Err(DnsError::Timeout) => "timeout",
            Err(DnsError::Malformed) => "malformed",
            Err(_) => "error",
        };
        metrics::counter!("dodtls_queries_total", "status" => status).increment(1);
        result
    }

    async fn resolve_inner(&self, domain: &str, family: AddressFamily) -> Result<Resolved, DnsError> {
        let max = self.config.max_name_len();
        if domain.len() > max {
            return Err(DnsError::NameTooLong { max });
        }

        if let Some(hit) = self.cache.lookup(domain, family).await {
            trace!(domain, "Answered from resolution cache");
            metrics::counter!("dodtls_cache_hits_total").increment(1);
            return Ok(hit);
        }

        let mut state = self.lock_scratch().await;
        let ServerState {
            server,
            next_id,
            buf,
        } = &mut *state;
        let Some(server) = server.as_mut() else {
            return Err(DnsError::NoServer);
        };

        let id = *next_id;
        *next_id = next_id.wrapping_add(1);

        let timeout = self.config.timeout();
        let mut last_error = DnsError::Timeout;

        for attempt in 1..=self.config.retries {
            let len = self
                .codec
                .encode_query(&mut buf[..], domain, id, family)
                .map_err(map_codec_error)?;

            let start = self.clock.now_ms();
            let sent = self
                .transport
                .send(&mut server.sock, &mut server.session, &buf[..len], timeout)
                .await;
            let send_duration = Duration::from_millis(self.clock.now_ms().saturating_sub(start));
            if send_duration > timeout {
                debug!(domain, attempt, ?send_duration, "Sending query exceeded its timeout");
                return Err(DnsError::Timeout);
            }

            let remaining = timeout - send_duration;
            match sent {
                Ok(n) if n > 0 => {}
                other => {
                    debug!(domain, attempt, result = ?other, "Unable to send query");
                    self.clock.sleep(remaining).await;
                }
            }

            match self
                .transport
                .recv(&mut server.sock, &mut server.session, &mut buf[..], remaining)
                .await
            {
                Ok(n) if n > buf.len() => {
                    warn!(
                        domain,
                        attempt,
                        len = n,
                        capacity = buf.len(),
                        "Transport reported more data than the buffer holds"
                    );
                    last_error = DnsError::Malformed;
                }
                Ok(n) if n >= MIN_REPLY_LEN => match self.codec.decode_reply(&buf[..n], family) {
                    Ok(resolved) => {
                        self.cache.insert(domain, resolved).await;
                        debug!(domain, attempt, addr = %resolved.addr, ttl = resolved.ttl, "Resolved");
                        return Ok(resolved);
                    }
                    Err(e) => {
                        debug!(domain, attempt, error = %e, "Unable to parse reply");
                        last_error = map_codec_error(e);
                    }
                },
                Ok(n) => {
                    debug!(domain, attempt, len = n, "Reply too short");
                    last_error = DnsError::Malformed;
                }
                Err(e) => {
                    debug!(domain, attempt, error = %e, "No reply received");
                    last_error = map_transport_error(e);
                }
            }
        }

        Err(last_error)
    }
}
