// Resolution cache keyed by domain name and address family.

use crate::core::{AddressFamily, ResolutionCache, Resolved};
use async_trait::async_trait;
use moka::{future::Cache, Expiry};
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tracing::trace;

#[derive(Debug, Clone)]
struct CacheEntry {
    addr: IpAddr,
    ttl: Duration,
    expires_at: Instant,
}

/// Expires every entry after the TTL carried in its reply.
struct ReplyTtl;

impl Expiry<(String, AddressFamily), CacheEntry> for ReplyTtl {
    fn expire_after_create(
        &self,
        _key: &(String, AddressFamily),
        value: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &(String, AddressFamily),
        value: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// A bounded, TTL-aware cache of resolved addresses.
pub struct MokaResolutionCache {
    cache: Cache<(String, AddressFamily), CacheEntry>,
}

impl MokaResolutionCache {
    /// Creates a new `MokaResolutionCache`.
    ///
    /// # Arguments
    /// * `max_entries` - The maximum number of entries in the cache.
    pub fn new(max_entries: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .expire_after(ReplyTtl)
            .build();
        Self { cache }
    }

    async fn get_valid(&self, domain: &str, family: AddressFamily) -> Option<Resolved> {
        let entry = self.cache.get(&(domain.to_string(), family)).await?;
        let remaining = entry.expires_at.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return None;
        }
        Some(Resolved {
            addr: entry.addr,
            // Round up so a live entry never reports a zero TTL.
            ttl: remaining.as_millis().div_ceil(1000) as u32,
        })
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

#[async_trait]
impl ResolutionCache for MokaResolutionCache {
    async fn lookup(&self, domain: &str, family: AddressFamily) -> Option<Resolved> {
        let hit = match family {
            AddressFamily::Unspec => match self.get_valid(domain, AddressFamily::Inet).await {
                Some(hit) => Some(hit),
                None => self.get_valid(domain, AddressFamily::Inet6).await,
            },
            family => self.get_valid(domain, family).await,
        };
        trace!(domain, ?family, hit = hit.is_some(), "Resolution cache lookup");
        hit
    }

    async fn insert(&self, domain: &str, resolved: Resolved) {
        // A zero TTL means the answer must not be reused.
        if resolved.ttl == 0 {
            return;
        }
        let ttl = Duration::from_secs(u64::from(resolved.ttl));
        let entry = CacheEntry {
            addr: resolved.addr,
            ttl,
            expires_at: Instant::now() + ttl,
        };
        let family = AddressFamily::of(&resolved.addr);
        self.cache.insert((domain.to_string(), family), entry).await;
    }
}
