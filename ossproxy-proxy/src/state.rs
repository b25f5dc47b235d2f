//! Shared process state handed to every request worker: the routing cache,
//! the metrics store, and a small pool of `reqwest::Client`s keyed by
//! connect timeout (a `Client` bakes in its connect timeout at build time,
//! so one request-worker-wide client can't serve every `Upstream`'s
//! configured timeout).

use ossproxy_cache::{Cache, MetricsRegistry};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct ProxyState {
    pub cache: Cache,
    pub metrics: MetricsRegistry,
    clients: Arc<RwLock<HashMap<Duration, reqwest::Client>>>,
}

impl ProxyState {
    pub fn new(cache: Cache, metrics: MetricsRegistry) -> Self {
        Self {
            cache,
            metrics,
            clients: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn client_for(&self, connect_timeout: Duration) -> reqwest::Client {
        if let Some(client) = self.clients.read().get(&connect_timeout) {
            return client.clone();
        }

        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .expect("reqwest client configuration is always valid");

        self.clients
            .write()
            .entry(connect_timeout)
            .or_insert(client)
            .clone()
    }
}
