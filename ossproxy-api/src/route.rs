use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Declares that a set of hosts should be served from a bucket/prefix on an
/// `OSSProxyUpstream`.
#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "ossfe.imvictor.tech",
    version = "v1",
    kind = "OSSProxyRoute",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct OSSProxyRouteSpec {
    /// DNS names this route answers for. Must be non-empty and globally
    /// unique across all routes (enforced by the admission webhook).
    pub hosts: Vec<String>,

    pub upstream_ref: UpstreamRef,

    pub bucket: String,

    /// Object-key prefix prepended to every request path.
    pub prefix: Option<String>,

    /// Object served for `/` and for the SPA fallback. Defaults to `index.html`.
    pub index_file: Option<String>,

    /// When true, any 404 from the bucket falls back to `indexFile`.
    #[serde(default)]
    pub spa_app: bool,

    /// Maps a 3-digit status code to an object-key suffix served in its place.
    pub error_pages: Option<BTreeMap<String, String>>,

    pub cache: Option<CachePolicy>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamRef {
    pub name: String,
    pub namespace: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CachePolicy {
    pub enabled: Option<bool>,
    pub max_age: Option<u32>,
    pub html_max_age: Option<u32>,
    pub static_max_age: Option<u32>,
}

impl CachePolicy {
    pub const DEFAULT_MAX_AGE: u32 = 3600;
    pub const DEFAULT_HTML_MAX_AGE: u32 = 300;
    pub const DEFAULT_STATIC_MAX_AGE: u32 = 86400;

    pub fn enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    pub fn max_age(&self) -> u32 {
        self.max_age.unwrap_or(Self::DEFAULT_MAX_AGE)
    }

    pub fn html_max_age(&self) -> u32 {
        self.html_max_age.unwrap_or(Self::DEFAULT_HTML_MAX_AGE)
    }

    pub fn static_max_age(&self) -> u32 {
        self.static_max_age.unwrap_or(Self::DEFAULT_STATIC_MAX_AGE)
    }
}

impl OSSProxyRouteSpec {
    pub fn index_file(&self) -> &str {
        self.index_file.as_deref().unwrap_or("index.html")
    }

    pub fn prefix(&self) -> &str {
        self.prefix.as_deref().unwrap_or("")
    }

    pub fn cache(&self) -> CachePolicy {
        self.cache.clone().unwrap_or_default()
    }

    pub fn upstream_namespace<'a>(&'a self, route_namespace: &'a str) -> &'a str {
        self.upstream_ref
            .namespace
            .as_deref()
            .unwrap_or(route_namespace)
    }
}
