//! DNS resolution and caching using hickory-resolver
//!
//! The MX and SMTP stages share one resolver, so the exchanger list fetched by
//! the MX stage is served from cache when the SMTP stage asks again.

use anyhow::Result;
use hickory_resolver::{
    config::{ResolverConfig, ResolverOpts},
    error::{ResolveError, ResolveErrorKind},
    AsyncResolver, TokioAsyncResolver,
};
use std::time::Duration;
use tracing::{debug, info};

/// A mail exchanger for a domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MxHost {
    pub preference: u16,
    pub exchange: String,
}

/// DNS resolver wrapper with optimized configuration
pub struct DnsResolver {
    resolver: TokioAsyncResolver,
}

impl DnsResolver {
    /// Create a new DNS resolver with optimized settings
    ///
    /// # Arguments
    /// * `timeout_ms` - DNS query timeout in milliseconds
    /// * `attempts` - Maximum number of retry attempts
    /// * `cache_size` - Number of entries to cache
    /// * `min_ttl_secs` - Minimum TTL for positive cache entries
    pub fn new(
        timeout_ms: u64,
        attempts: usize,
        cache_size: usize,
        min_ttl_secs: u64,
    ) -> Result<Self> {
        let config = ResolverConfig::cloudflare();

        let mut opts = ResolverOpts::default();
        opts.timeout = Duration::from_millis(timeout_ms);
        opts.attempts = attempts;
        opts.cache_size = cache_size;
        opts.positive_min_ttl = Some(Duration::from_secs(min_ttl_secs));
        opts.negative_min_ttl = Some(Duration::from_secs(30)); // Cache NXDOMAIN for 30s
        opts.positive_max_ttl = Some(Duration::from_secs(3600));

        let resolver = AsyncResolver::tokio(config, opts);

        info!(
            "DNS resolver initialized - timeout: {}ms, attempts: {}, cache_size: {}",
            timeout_ms, attempts, cache_size
        );

        Ok(Self { resolver })
    }

    /// Mail exchangers for a domain, most preferred first
    ///
    /// # Returns
    /// * `Ok(hosts)` - possibly empty when the domain has no MX records, does
    ///   not exist, or publishes a null MX (RFC 7505)
    /// * `Err(_)` when the lookup itself failed (timeout, network, SERVFAIL)
    pub async fn mx_hosts(&self, domain: &str) -> Result<Vec<MxHost>, ResolveError> {
        debug!("Checking MX records for domain: {}", domain);

        let lookup = match self.resolver.mx_lookup(domain).await {
            Ok(lookup) => lookup,
            Err(e) if is_no_records(&e) => {
                debug!("Domain {} has no MX records", domain);
                return Ok(Vec::new());
            }
            Err(e) => {
                debug!("MX record lookup failed for {}: {}", domain, e);
                return Err(e);
            }
        };

        let mut hosts: Vec<MxHost> = lookup
            .iter()
            .map(|mx| MxHost {
                preference: mx.preference(),
                exchange: mx.exchange().to_utf8().trim_end_matches('.').to_string(),
            })
            .filter(|host| !host.exchange.is_empty())
            .collect();
        hosts.sort_by(|a, b| a.preference.cmp(&b.preference).then_with(|| a.exchange.cmp(&b.exchange)));

        debug!("Domain {} has {} MX record(s)", domain, hosts.len());
        Ok(hosts)
    }

    /// Clear the DNS cache
    pub fn clear_cache(&self) {
        self.resolver.clear_cache();
        info!("DNS cache cleared");
    }
}

/// NXDOMAIN and NODATA both surface as `NoRecordsFound`
fn is_no_records(error: &ResolveError) -> bool {
    matches!(error.kind(), ResolveErrorKind::NoRecordsFound { .. })
}
