//! Push client for the Proxy's loopback ingestion API.
//!
//! Generalizes `src/admission.rs`'s `Error` enum idiom (a small
//! `thiserror`-derived set of transport/encode failures) to an outbound
//! client instead of an inbound service.

use k8s_openapi::api::core::v1::Secret;
use ossproxy_api::{OSSProxyRouteSpec, OSSProxyUpstreamSpec};
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum PushError {
    #[error("request to proxy ingestion API failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("proxy ingestion API returned {0}")]
    Status(reqwest::StatusCode),
}

#[derive(Clone)]
pub struct IngestionClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Serialize)]
struct Update<'a, T> {
    namespace: &'a str,
    name: &'a str,
    spec: &'a T,
}

#[derive(Serialize)]
struct Delete<'a> {
    namespace: &'a str,
    name: &'a str,
}

impl IngestionClient {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            api_key,
        }
    }

    pub async fn update_route(
        &self,
        ns: &str,
        name: &str,
        spec: &OSSProxyRouteSpec,
    ) -> Result<(), PushError> {
        self.post("/api/routes/update", &Update { namespace: ns, name, spec })
            .await
    }

    pub async fn delete_route(&self, ns: &str, name: &str) -> Result<(), PushError> {
        self.post("/api/routes/delete", &Delete { namespace: ns, name })
            .await
    }

    pub async fn update_upstream(
        &self,
        ns: &str,
        name: &str,
        spec: &OSSProxyUpstreamSpec,
    ) -> Result<(), PushError> {
        self.post(
            "/api/upstreams/update",
            &Update { namespace: ns, name, spec },
        )
        .await
    }

    pub async fn delete_upstream(&self, ns: &str, name: &str) -> Result<(), PushError> {
        self.post("/api/upstreams/delete", &Delete { namespace: ns, name })
            .await
    }

    pub async fn update_secret(&self, ns: &str, name: &str, secret: &Secret) -> Result<(), PushError> {
        self.post(
            "/api/secrets/update",
            &Update { namespace: ns, name, spec: secret },
        )
        .await
    }

    pub async fn delete_secret(&self, ns: &str, name: &str) -> Result<(), PushError> {
        self.post("/api/secrets/delete", &Delete { namespace: ns, name })
            .await
    }

    async fn post<T: Serialize>(&self, path: &str, body: &T) -> Result<(), PushError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http
            .post(&url)
            .header("X-API-Key", &self.api_key)
            .json(body)
            .send()
            .await?;

        if !resp.status().is_success() {
            warn!(%url, status = %resp.status(), "ingestion push rejected");
            return Err(PushError::Status(resp.status()));
        }

        Ok(())
    }
}
