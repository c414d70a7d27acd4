//! Address resolution behind the endpoint group.
//!
//! Production groups resolve the profile authority through a shared DNS
//! cache; tests and fixed deployments inject a static group. The shared
//! resolver is a lazily initialized module-level singleton, reference
//! counted so it shuts down with the last client referring to it.

use super::Endpoint;
use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
#[error("address resolution failed: {reason}")]
pub struct ResolveError {
    reason: String,
}

impl ResolveError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

/// Source of endpoints for an endpoint group.
#[async_trait]
pub trait AddressResolver: Send + Sync + std::fmt::Debug {
    async fn resolve(&self) -> Result<Vec<Endpoint>, ResolveError>;
}

/// A fixed endpoint list.
#[derive(Debug, Clone)]
pub struct StaticResolver {
    endpoints: Vec<Endpoint>,
}

impl StaticResolver {
    pub fn new(endpoints: Vec<Endpoint>) -> Self {
        Self { endpoints }
    }
}

#[async_trait]
impl AddressResolver for StaticResolver {
    async fn resolve(&self) -> Result<Vec<Endpoint>, ResolveError> {
        Ok(self.endpoints.clone())
    }
}

/// DNS-backed resolver for one authority, sharing the process-wide
/// cache.
#[derive(Debug)]
pub struct DnsResolver {
    host: String,
    port: u16,
    shared: SharedResolverHandle,
}

impl DnsResolver {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port, shared: SharedResolverHandle::acquire() }
    }
}

#[async_trait]
impl AddressResolver for DnsResolver {
    async fn resolve(&self) -> Result<Vec<Endpoint>, ResolveError> {
        let lookup = self
            .shared
            .resolver()
            .lookup_ip(self.host.as_str())
            .await
            .map_err(|err| ResolveError::new(err.to_string()))?;
        let endpoints: Vec<Endpoint> =
            lookup.iter().map(|ip| Endpoint::new(ip.to_string(), self.port)).collect();
        debug!(host = %self.host, count = endpoints.len(), "resolved endpoints");
        Ok(endpoints)
    }
}

// Process-wide DNS cache. TTLs are clamped to [1 s, 30 s] with a 60 s
// negative TTL.
static SHARED_RESOLVER: Mutex<Option<SharedState>> = Mutex::new(None);

struct SharedState {
    resolver: Arc<TokioAsyncResolver>,
    refs: usize,
}

/// Reference-counted handle to the shared resolver; the cache is
/// dropped when the last handle goes away.
pub(crate) struct SharedResolverHandle {
    resolver: Arc<TokioAsyncResolver>,
}

impl std::fmt::Debug for SharedResolverHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedResolverHandle").finish_non_exhaustive()
    }
}

impl SharedResolverHandle {
    pub(crate) fn acquire() -> Self {
        let mut guard =
            SHARED_RESOLVER.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let state = guard.get_or_insert_with(|| SharedState {
            resolver: Arc::new(build_resolver()),
            refs: 0,
        });
        state.refs += 1;
        Self { resolver: Arc::clone(&state.resolver) }
    }

    fn resolver(&self) -> &TokioAsyncResolver {
        &self.resolver
    }
}

impl Drop for SharedResolverHandle {
    fn drop(&mut self) {
        let mut guard =
            SHARED_RESOLVER.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(state) = guard.as_mut() {
            state.refs -= 1;
            if state.refs == 0 {
                *guard = None;
            }
        }
    }
}

fn build_resolver() -> TokioAsyncResolver {
    let mut opts = ResolverOpts::default();
    opts.positive_min_ttl = Some(Duration::from_secs(1));
    opts.positive_max_ttl = Some(Duration::from_secs(30));
    opts.negative_min_ttl = Some(Duration::from_secs(60));
    opts.negative_max_ttl = Some(Duration::from_secs(60));
    match hickory_resolver::system_conf::read_system_conf() {
        Ok((config, _)) => TokioAsyncResolver::tokio(config, opts),
        Err(_) => TokioAsyncResolver::tokio(ResolverConfig::default(), opts),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_resolver_returns_its_list() {
        let endpoints = vec![Endpoint::new("10.0.0.1", 443), Endpoint::new("10.0.0.2", 443)];
        let resolver = StaticResolver::new(endpoints.clone());
        assert_eq!(resolver.resolve().await.unwrap(), endpoints);
    }

    #[test]
    fn shared_resolver_is_refcounted() {
        let first = SharedResolverHandle::acquire();
        let second = SharedResolverHandle::acquire();
        assert!(Arc::ptr_eq(&first.resolver, &second.resolver));
        drop(first);
        drop(second);
        assert!(SHARED_RESOLVER.lock().unwrap().is_none());
        // A fresh acquire rebuilds the cache.
        let third = SharedResolverHandle::acquire();
        drop(third);
    }
}
