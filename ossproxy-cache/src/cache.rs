//! The shared routing cache.
//!
//! Grounded in `k8s/index/src/lookup.rs`'s `Writer`/`Reader` split over an
//! `Arc<parking_lot::RwLock<HashMap<...>>>`, and `src/index_pair.rs`'s
//! apply/delete naming. Unlike the teacher, a single process both writes
//! (ingestion handlers) and reads (request workers) this cache, so one
//! `Cache` type plays both roles behind a single lock per map.

use ossproxy_api::{OSSProxyRouteSpec, OSSProxyUpstreamSpec, ResolvedCredentials, Secret};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Identifies a namespaced Kubernetes object.
pub type ObjectId = (String, String);

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no route configured for host {0:?}")]
    UnknownHost(String),
    #[error("route {0:?}/{1:?} references upstream {2:?}/{3:?} which is not in the cache")]
    UpstreamMissing(String, String, String, String),
    #[error("route {0:?}/{1:?} references a secret that is not in the cache")]
    SecretMissing(String, String),
    #[error("failed to decode upstream credentials: {0}")]
    Credentials(#[from] ossproxy_api::CredentialError),
}

/// A fully resolved (route, upstream, credentials) bundle, ready to drive a
/// signed upstream request.
#[derive(Clone)]
pub struct ResolvedRoute {
    pub route_id: ObjectId,
    pub route: OSSProxyRouteSpec,
    pub upstream: OSSProxyUpstreamSpec,
    pub credentials: ResolvedCredentials,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct CacheStatus {
    pub ready: bool,
    pub synced_once: bool,
    pub route_count: usize,
    pub upstream_count: usize,
    pub secret_count: usize,
    pub last_sync_epoch: i64,
}

struct RouteEntry {
    spec: OSSProxyRouteSpec,
    /// The hosts this route owned as of its last successful apply — kept
    /// independently of `spec.hosts` so a delete event whose payload
    /// arrives with a stripped spec still clears every host it owned.
    hosts: Vec<String>,
}

#[derive(Default)]
struct Inner {
    hosts: HashMap<String, ObjectId>,
    routes: HashMap<ObjectId, RouteEntry>,
    upstreams: HashMap<ObjectId, OSSProxyUpstreamSpec>,
    secrets: HashMap<ObjectId, Secret>,
}

/// The shared routing cache, cloneable and safe to hand to every request
/// worker and every ingestion handler.
#[derive(Clone, Default)]
pub struct Cache {
    inner: Arc<RwLock<Inner>>,
    ready: Arc<AtomicBool>,
    synced_once: Arc<AtomicBool>,
    last_sync_epoch: Arc<AtomicI64>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a route, remapping its hosts in the host index.
    /// Any host that previously belonged to this route but no longer does
    /// is released; any host that collides with a different route is
    /// silently reassigned (the admission webhook is the real enforcement
    /// point — this is the defensive fallback spec.md names).
    pub fn update_route(&self, id: ObjectId, spec: OSSProxyRouteSpec, now_epoch: i64) {
        let mut inner = self.inner.write();

        if let Some(prev) = inner.routes.get(&id) {
            for host in &prev.hosts {
                if inner.hosts.get(host) == Some(&id) {
                    inner.hosts.remove(host);
                }
            }
        }

        for host in &spec.hosts {
            if let Some(owner) = inner.hosts.insert(host.clone(), id.clone()) {
                if owner != id {
                    warn!(%host, old_route = ?owner, new_route = ?id, "host reassigned; admission webhook should have prevented this");
                }
            }
        }

        let hosts = spec.hosts.clone();
        inner.routes.insert(id, RouteEntry { spec, hosts });
        drop(inner);

        self.mark_synced_if_ready(now_epoch);
    }

    pub fn delete_route(&self, id: &ObjectId) {
        let mut inner = self.inner.write();
        if let Some(entry) = inner.routes.remove(id) {
            for host in entry.hosts {
                if inner.hosts.get(&host) == Some(id) {
                    inner.hosts.remove(&host);
                }
            }
        }
    }

    pub fn update_upstream(&self, id: ObjectId, spec: OSSProxyUpstreamSpec) {
        self.inner.write().upstreams.insert(id, spec);
    }

    pub fn delete_upstream(&self, id: &ObjectId) {
        self.inner.write().upstreams.remove(id);
    }

    pub fn update_secret(&self, id: ObjectId, secret: Secret) {
        self.inner.write().secrets.insert(id, secret);
    }

    pub fn delete_secret(&self, id: &ObjectId) {
        self.inner.write().secrets.remove(id);
    }

    /// The hot-path lookup: host -> fully resolved (route, upstream,
    /// credentials). Never returns a torn bundle — a route whose upstream
    /// or secret hasn't arrived yet fails cleanly instead.
    pub fn resolve_route_by_host(&self, host: &str) -> Result<ResolvedRoute, ResolveError> {
        let inner = self.inner.read();

        let route_id = inner
            .hosts
            .get(host)
            .ok_or_else(|| ResolveError::UnknownHost(host.to_string()))?
            .clone();

        let route = &inner
            .routes
            .get(&route_id)
            .expect("host index and route map are kept in sync")
            .spec;

        let upstream_ns = route.upstream_namespace(&route_id.0).to_string();
        let upstream_id = (upstream_ns, route.upstream_ref.name.clone());
        let upstream = inner.upstreams.get(&upstream_id).ok_or_else(|| {
            ResolveError::UpstreamMissing(
                route_id.0.clone(),
                route_id.1.clone(),
                upstream_id.0.clone(),
                upstream_id.1.clone(),
            )
        })?;

        let secret = match (
            upstream.secret_namespace(&upstream_id.0),
            upstream.credentials.secret_ref.as_ref(),
        ) {
            (Some(secret_ns), Some(secret_ref)) => {
                let secret_id = (secret_ns.to_string(), secret_ref.name.clone());
                Some(
                    inner.secrets.get(&secret_id).ok_or_else(|| {
                        ResolveError::SecretMissing(route_id.0.clone(), route_id.1.clone())
                    })?,
                )
            }
            _ => None,
        };

        let credentials = ResolvedCredentials::decode(upstream, secret)?;

        Ok(ResolvedRoute {
            route_id: route_id.clone(),
            route: route.clone(),
            upstream: upstream.clone(),
            credentials,
        })
    }

    /// Monotonic readiness latch: once at least one route has been ingested
    /// successfully, stays `true` forever, even if the route set later
    /// empties out.
    fn mark_synced_if_ready(&self, now_epoch: i64) {
        let inner = self.inner.read();
        if inner.routes.is_empty() {
            return;
        }
        drop(inner);

        self.synced_once.store(true, Ordering::Release);
        self.ready.store(true, Ordering::Release);
        self.last_sync_epoch.store(now_epoch, Ordering::Relaxed);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn status(&self) -> CacheStatus {
        let inner = self.inner.read();
        CacheStatus {
            ready: self.is_ready(),
            synced_once: self.synced_once.load(Ordering::Acquire),
            route_count: inner.routes.len(),
            upstream_count: inner.upstreams.len(),
            secret_count: inner.secrets.len(),
            last_sync_epoch: self.last_sync_epoch.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ossproxy_api::{Provider, UpstreamRef};

    fn route(hosts: &[&str]) -> OSSProxyRouteSpec {
        OSSProxyRouteSpec {
            hosts: hosts.iter().map(|h| h.to_string()).collect(),
            upstream_ref: UpstreamRef {
                name: "up".to_string(),
                namespace: None,
            },
            bucket: "b".to_string(),
            ..Default::default()
        }
    }

    fn upstream_with_inline_creds() -> OSSProxyUpstreamSpec {
        OSSProxyUpstreamSpec {
            provider: Provider::Generic,
            region: "us-east-1".to_string(),
            endpoint: "minio.local".to_string(),
            use_https: false,
            path_style: true,
            credentials: ossproxy_api::Credentials {
                inline: Some(ossproxy_api::InlineCredentials {
                    access_key_id: "AKID".to_string(),
                    secret_access_key: "SECRET".to_string(),
                }),
                secret_ref: None,
            },
            timeout: None,
            retry: None,
        }
    }

    #[test]
    fn readiness_is_monotonic() {
        let cache = Cache::new();
        assert!(!cache.is_ready());

        let id = ("ns".to_string(), "r".to_string());
        cache.update_route(id.clone(), route(&["a.example"]), 1);
        assert!(cache.is_ready());

        cache.delete_route(&id);
        assert!(cache.is_ready(), "readiness must not revert once set");
    }

    #[test]
    fn resolve_fails_cleanly_without_upstream() {
        let cache = Cache::new();
        let id = ("ns".to_string(), "r".to_string());
        cache.update_route(id, route(&["a.example"]), 1);

        let err = cache.resolve_route_by_host("a.example").unwrap_err();
        assert!(matches!(err, ResolveError::UpstreamMissing(..)));
    }

    #[test]
    fn resolve_succeeds_with_inline_credentials() {
        let cache = Cache::new();
        let route_id = ("ns".to_string(), "r".to_string());
        cache.update_route(route_id, route(&["a.example"]), 1);
        cache.update_upstream(("ns".to_string(), "up".to_string()), upstream_with_inline_creds());

        let resolved = cache.resolve_route_by_host("a.example").unwrap();
        assert_eq!(resolved.credentials.access_key_id, "AKID");
    }

    #[test]
    fn deleting_route_releases_its_hosts_even_without_spec() {
        let cache = Cache::new();
        let id = ("ns".to_string(), "r".to_string());
        cache.update_route(id.clone(), route(&["a.example", "b.example"]), 1);
        cache.delete_route(&id);

        let err = cache.resolve_route_by_host("a.example").unwrap_err();
        assert!(matches!(err, ResolveError::UnknownHost(_)));
    }

    #[test]
    fn unknown_host_is_not_found() {
        let cache = Cache::new();
        let err = cache.resolve_route_by_host("nope.example").unwrap_err();
        assert!(matches!(err, ResolveError::UnknownHost(_)));
    }
}
