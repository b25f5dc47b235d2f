//! Drives the two Route/Upstream watches and the secret cascade, pushing
//! every observed change to the Proxy's ingestion API. Grounded in
//! `k8s/index/src/lib.rs`'s single indexing task and `tokio::select!` loop,
//! adapted from in-process indexing to pushing over the loopback API.

use crate::index_metrics::RouteIndexMetrics;
use crate::ingestion_client::IngestionClient;
use crate::route_index::RouteHostIndex;
use crate::watch::Watch;
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::{watcher, watcher::Event};
use kube::{Api, Client, ResourceExt};
use ossproxy_api::{OSSProxyRoute, OSSProxyUpstream};
use tracing::{debug, info, warn};

pub struct Reflector {
    client: Client,
    ingestion: IngestionClient,
    routes: RouteHostIndex,
    route_metrics: RouteIndexMetrics,
}

impl Reflector {
    pub fn new(
        client: Client,
        ingestion: IngestionClient,
        routes: RouteHostIndex,
        route_metrics: RouteIndexMetrics,
    ) -> Self {
        Self {
            client,
            ingestion,
            routes,
            route_metrics,
        }
    }

    /// Lists all Routes and Upstreams (and their referenced Secrets),
    /// pushing each to the Proxy. Failure here is fatal to startup: the
    /// Proxy must never become ready having missed the initial sync.
    pub async fn initial_sync(&self) -> anyhow::Result<()> {
        let routes: Api<OSSProxyRoute> = Api::all(self.client.clone());
        for route in routes.list(&Default::default()).await?.items {
            self.push_route_update(&route).await;
        }

        let upstreams: Api<OSSProxyUpstream> = Api::all(self.client.clone());
        for upstream in upstreams.list(&Default::default()).await?.items {
            self.push_upstream_update(&upstream).await;
        }

        info!("initial sync complete");
        Ok(())
    }

    /// Runs both watch loops forever. Each backs off independently on
    /// transport errors; one watch failing never stops the other.
    pub async fn run(self) -> anyhow::Result<()> {
        let routes: Api<OSSProxyRoute> = Api::all(self.client.clone());
        let upstreams: Api<OSSProxyUpstream> = Api::all(self.client.clone());

        let mut route_watch: Watch<OSSProxyRoute> =
            watcher::watcher(routes, watcher::Config::default()).into();
        let mut upstream_watch: Watch<OSSProxyUpstream> =
            watcher::watcher(upstreams, watcher::Config::default()).into();

        loop {
            tokio::select! {
                ev = route_watch.recv() => self.handle_route_event(ev).await,
                ev = upstream_watch.recv() => self.handle_upstream_event(ev).await,
            }
        }
    }

    async fn handle_route_event(&self, ev: Event<OSSProxyRoute>) {
        match ev {
            Event::Applied(route) => self.push_route_update(&route).await,
            Event::Deleted(route) => self.push_route_delete(&route).await,
            Event::Restarted(routes) => {
                self.route_metrics.observe_reset();
                for route in routes {
                    self.push_route_update(&route).await;
                }
            }
        }
    }

    async fn handle_upstream_event(&self, ev: Event<OSSProxyUpstream>) {
        match ev {
            Event::Applied(upstream) => self.push_upstream_update(&upstream).await,
            Event::Deleted(upstream) => self.push_upstream_delete(&upstream).await,
            Event::Restarted(upstreams) => {
                for upstream in upstreams {
                    self.push_upstream_update(&upstream).await;
                }
            }
        }
    }

    async fn push_route_update(&self, route: &OSSProxyRoute) {
        let ns = route.namespace().unwrap_or_default();
        let name = route.name_any();
        self.routes.apply((ns.clone(), name.clone()), &route.spec);
        self.route_metrics
            .observe_apply(&ns, self.routes.route_count(&ns));

        if let Err(error) = self.ingestion.update_route(&ns, &name, &route.spec).await {
            warn!(%error, %ns, %name, "failed to push route update");
        } else {
            debug!(%ns, %name, "pushed route update");
        }
    }

    async fn push_route_delete(&self, route: &OSSProxyRoute) {
        let ns = route.namespace().unwrap_or_default();
        let name = route.name_any();
        self.routes.remove(&(ns.clone(), name.clone()));
        self.route_metrics
            .observe_delete(&ns, self.routes.route_count(&ns));

        if let Err(error) = self.ingestion.delete_route(&ns, &name).await {
            warn!(%error, %ns, %name, "failed to push route delete");
        }
    }

    async fn push_upstream_update(&self, upstream: &OSSProxyUpstream) {
        let ns = upstream.namespace().unwrap_or_default();
        let name = upstream.name_any();

        if let Err(error) = self
            .ingestion
            .update_upstream(&ns, &name, &upstream.spec)
            .await
        {
            warn!(%error, %ns, %name, "failed to push upstream update");
            return;
        }
        debug!(%ns, %name, "pushed upstream update");

        self.cascade_secret(&ns, &upstream.spec).await;
    }

    async fn push_upstream_delete(&self, upstream: &OSSProxyUpstream) {
        let ns = upstream.namespace().unwrap_or_default();
        let name = upstream.name_any();
        if let Err(error) = self.ingestion.delete_upstream(&ns, &name).await {
            warn!(%error, %ns, %name, "failed to push upstream delete");
        }
    }

    /// Re-resolves and pushes the Secret an Upstream's `credentials.secretRef`
    /// points at, defaulting its namespace to the Upstream's own.
    async fn cascade_secret(&self, upstream_ns: &str, upstream: &ossproxy_api::OSSProxyUpstreamSpec) {
        let Some(secret_ref) = &upstream.credentials.secret_ref else {
            return;
        };
        let secret_ns = upstream
            .secret_namespace(upstream_ns)
            .expect("secret_ref is set, so secret_namespace resolves");

        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), secret_ns);
        match secrets.get(&secret_ref.name).await {
            Ok(secret) => {
                if let Err(error) = self
                    .ingestion
                    .update_secret(secret_ns, &secret_ref.name, &secret)
                    .await
                {
                    warn!(%error, ns = %secret_ns, name = %secret_ref.name, "failed to push secret update");
                }
            }
            Err(error) => {
                warn!(%error, ns = %secret_ns, name = %secret_ref.name, "failed to resolve referenced secret");
            }
        }
    }
}
