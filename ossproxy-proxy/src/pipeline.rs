//! The request-serving pipeline: readiness gate, host resolution,
//! object-key synthesis, SigV4-signed upstream dispatch, and response
//! disposition. Mirrors the `AdmissionService::call`/`admin::handle_ready`
//! shape of small, explicit match-driven handlers the teacher uses, scaled
//! up to the full asset-proxying algorithm spec.md describes.

use crate::state::ProxyState;
use chrono::Utc;
use ossproxy_api::{CachePolicy, OSSProxyRouteSpec, OSSProxyUpstreamSpec};
use ossproxy_cache::ResolveError;
use ossproxy_signer::{sign, Credentials, SignInput};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("cache is not yet ready")]
    NotReady,
    #[error("no route configured for host {0:?}")]
    UnknownHost(String),
    #[error("route is misconfigured: {0}")]
    UpstreamMisconfigured(#[from] ResolveError),
    #[error("failed to reach upstream: {0}")]
    UpstreamTransport(#[from] reqwest::Error),
}

impl PipelineError {
    pub fn status(&self) -> u16 {
        match self {
            Self::NotReady => 503,
            Self::UnknownHost(_) => 404,
            Self::UpstreamMisconfigured(_) => 500,
            Self::UpstreamTransport(_) => 500,
        }
    }

    fn into_response(self) -> ProxiedResponse {
        let status = self.status();
        ProxiedResponse::diagnostic(status, format!("{self}\n"))
    }
}

pub struct ProxiedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ProxiedResponse {
    fn diagnostic(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            headers: vec![("content-type".to_string(), "text/plain".to_string())],
            body: message.into().into_bytes(),
        }
    }

    /// Sets `name` to `value`, replacing any existing header of that name
    /// (case-insensitively). Used to force the SPA-fallback/error-page
    /// `Content-Type` regardless of what the upstream object store sent.
    fn set_header(&mut self, name: &str, value: &str) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.to_string()));
    }
}

/// Headers that must never be forwarded verbatim from the upstream object
/// store response to the client.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

enum ObjectClass {
    Html,
    Static,
    Default,
}

/// Classifies a successful response per spec.md §4.4: upstream
/// `Content-Type` wins when it says `text/html`; otherwise the request path
/// extension decides between the static and default buckets.
fn classify(content_type: Option<&str>, object_key: &str) -> ObjectClass {
    if content_type.is_some_and(content_type_is_html) {
        return ObjectClass::Html;
    }

    const STATIC_EXTENSIONS: &[&str] = &[
        "js", "css", "png", "jpg", "jpeg", "gif", "ico", "svg", "woff", "woff2", "ttf", "eot",
    ];
    let ext = object_key.rsplit('.').next().unwrap_or("");
    if STATIC_EXTENSIONS.contains(&ext) {
        ObjectClass::Static
    } else {
        ObjectClass::Default
    }
}

fn content_type_is_html(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .eq_ignore_ascii_case("text/html")
}

fn cache_control_for(policy: &CachePolicy, class: ObjectClass) -> Option<String> {
    if !policy.enabled() {
        return None;
    }
    let max_age = match class {
        ObjectClass::Html => policy.html_max_age(),
        ObjectClass::Static => policy.static_max_age(),
        ObjectClass::Default => policy.max_age(),
    };
    Some(format!("public, max-age={max_age}"))
}

/// Splits a request path into the bucket object key (without leading `/`)
/// it synthesizes to, applying the `/` -> index-file rewrite.
fn object_key_for_path(route: &OSSProxyRouteSpec, raw_path: &str) -> String {
    let path = if raw_path == "/" {
        format!("/{}", route.index_file())
    } else {
        raw_path.to_string()
    };
    format!("{}{}", route.prefix(), path.trim_start_matches('/'))
}

/// Builds the `(host, absolute-path)` pair for the upstream request.
fn upstream_host_and_path(
    upstream: &OSSProxyUpstreamSpec,
    bucket: &str,
    object_key: &str,
) -> (String, String) {
    if upstream.path_style {
        (upstream.endpoint.clone(), format!("/{bucket}/{object_key}"))
    } else {
        (
            format!("{bucket}.{}", upstream.endpoint),
            format!("/{object_key}"),
        )
    }
}

async fn fetch_object(
    state: &ProxyState,
    upstream: &OSSProxyUpstreamSpec,
    creds: &ossproxy_api::ResolvedCredentials,
    bucket: &str,
    object_key: &str,
    query: &str,
) -> Result<reqwest::Response, reqwest::Error> {
    let (host, path) = upstream_host_and_path(upstream, bucket, object_key);
    let signed = sign(SignInput {
        credentials: &Credentials {
            access_key_id: creds.access_key_id.clone(),
            secret_access_key: creds.secret_access_key.clone(),
        },
        region: &upstream.region,
        host: &host,
        path: &path,
        query,
        timestamp: Utc::now(),
    });

    let mut url = format!("{}://{host}{path}", upstream.scheme());
    if !query.is_empty() {
        url.push('?');
        url.push_str(query);
    }

    let client = state.client_for(upstream.connect_timeout());
    client
        .get(&url)
        .header("host", host)
        .header("x-amz-date", signed.x_amz_date)
        .header("x-amz-content-sha256", signed.x_amz_content_sha256)
        .header("authorization", signed.authorization)
        .send()
        .await
}

/// Consumes an upstream response into a `ProxiedResponse`, stripping
/// hop-by-hop headers and overriding `Cache-Control` per `cache_control`
/// (or dropping it entirely when `cache_control` is `None` but the
/// upstream set one, so a disabled cache policy actually disables caching).
async fn collect_response(
    status: u16,
    resp: reqwest::Response,
    cache_control: Option<String>,
) -> Result<ProxiedResponse, reqwest::Error> {
    let mut headers: Vec<(String, String)> = resp
        .headers()
        .iter()
        .filter(|(name, _)| !HOP_BY_HOP.contains(&name.as_str().to_ascii_lowercase().as_str()))
        .filter(|(name, _)| !name.as_str().eq_ignore_ascii_case("cache-control"))
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    if let Some(cc) = cache_control {
        headers.push(("cache-control".to_string(), cc));
    }

    let body = resp.bytes().await?.to_vec();
    Ok(ProxiedResponse {
        status,
        headers,
        body,
    })
}

/// Runs the full pipeline for one client request.
pub async fn handle(
    state: &ProxyState,
    host: &str,
    raw_path: &str,
    query: &str,
) -> ProxiedResponse {
    if !state.cache.is_ready() {
        return PipelineError::NotReady.into_response();
    }

    let resolved = match state.cache.resolve_route_by_host(host) {
        Ok(resolved) => resolved,
        Err(ResolveError::UnknownHost(host)) => return PipelineError::UnknownHost(host).into_response(),
        Err(error) => {
            warn!(%error, %host, "route misconfigured");
            return PipelineError::UpstreamMisconfigured(error).into_response();
        }
    };

    let started = Instant::now();
    let policy = resolved.route.cache();
    let object_key = object_key_for_path(&resolved.route, raw_path);

    let outcome = fetch_object(
        state,
        &resolved.upstream,
        &resolved.credentials,
        &resolved.route.bucket,
        &object_key,
        query,
    )
    .await;

    let response = match outcome {
        Ok(resp) => {
            dispatch_response(
                state,
                &resolved.route,
                &resolved.upstream,
                &resolved.credentials,
                &policy,
                &object_key,
                resp,
                query,
            )
            .await
        }
        Err(error) => {
            warn!(%error, %host, "upstream transport error");
            PipelineError::UpstreamTransport(error).into_response()
        }
    };

    let latency_ms = started.elapsed().as_millis().min(u64::MAX as u128) as u64;
    let is_error = response.status >= 500;
    state.metrics.record_request(
        &resolved.route_id.0,
        &resolved.route_id.1,
        resolved
            .route
            .upstream_namespace(&resolved.route_id.0)
            .to_string()
            .as_str(),
        &resolved.route.upstream_ref.name,
        Utc::now().timestamp(),
        is_error,
        latency_ms,
    );
    debug!(%host, status = response.status, latency_ms, "request served");

    response
}

async fn dispatch_response(
    state: &ProxyState,
    route: &OSSProxyRouteSpec,
    upstream: &OSSProxyUpstreamSpec,
    creds: &ossproxy_api::ResolvedCredentials,
    policy: &CachePolicy,
    object_key: &str,
    resp: reqwest::Response,
    query: &str,
) -> ProxiedResponse {
    let status = resp.status();

    if status.is_success() {
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let cc = cache_control_for(policy, classify(content_type.as_deref(), object_key));
        return collect_response(status.as_u16(), resp, cc)
            .await
            .unwrap_or_else(|error| {
                warn!(%error, "failed reading upstream response body");
                ProxiedResponse::diagnostic(500, "failed reading upstream response\n")
            });
    }

    if status.as_u16() == 404 {
        if route.spa_app {
            let index_key = format!("{}{}", route.prefix(), route.index_file());
            if let Some(fallback) =
                fetch_and_collect(state, upstream, creds, &route.bucket, &index_key, query, 200, policy).await
            {
                return fallback;
            }
        }

        if let Some(error_pages) = &route.error_pages {
            if let Some(suffix) = error_pages.get("404") {
                let key = format!("{}{}", route.prefix(), suffix);
                if let Some(fallback) =
                    fetch_and_collect(state, upstream, creds, &route.bucket, &key, query, 404, policy).await
                {
                    return fallback;
                }
            }
        }

        return ProxiedResponse::diagnostic(404, "object not found\n");
    }

    ProxiedResponse::diagnostic(
        status.as_u16(),
        format!("upstream object store returned {status}\n"),
    )
}

/// Fetches a fallback object (SPA index or configured error page) and, if
/// it resolves successfully, returns it dressed up with `status` and the
/// HTML cache-control class. Returns `None` on any failure so the caller
/// falls through to the plain 404.
async fn fetch_and_collect(
    state: &ProxyState,
    upstream: &OSSProxyUpstreamSpec,
    creds: &ossproxy_api::ResolvedCredentials,
    bucket: &str,
    object_key: &str,
    query: &str,
    status: u16,
    policy: &CachePolicy,
) -> Option<ProxiedResponse> {
    let resp = fetch_object(state, upstream, creds, bucket, object_key, query)
        .await
        .ok()?;
    if !resp.status().is_success() {
        return None;
    }
    let cc = cache_control_for(policy, ObjectClass::Html);
    let mut collected = collect_response(status, resp, cc).await.ok()?;
    collected.set_header("content-type", "text/html; charset=utf-8");
    Some(collected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ossproxy_api::UpstreamRef;

    fn route(prefix: Option<&str>, index: Option<&str>) -> OSSProxyRouteSpec {
        OSSProxyRouteSpec {
            hosts: vec!["a.example".to_string()],
            upstream_ref: UpstreamRef {
                name: "up".to_string(),
                namespace: None,
            },
            bucket: "assets".to_string(),
            prefix: prefix.map(|p| p.to_string()),
            index_file: index.map(|i| i.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn root_path_rewrites_to_index_file() {
        let route = route(None, None);
        assert_eq!(object_key_for_path(&route, "/"), "index.html");
    }

    #[test]
    fn prefix_is_prepended() {
        let route = route(Some("site/"), None);
        assert_eq!(object_key_for_path(&route, "/app.js"), "site/app.js");
    }

    #[test]
    fn custom_index_file_is_honored() {
        let route = route(None, Some("home.html"));
        assert_eq!(object_key_for_path(&route, "/"), "home.html");
    }

    #[test]
    fn path_style_places_bucket_in_uri() {
        let upstream = OSSProxyUpstreamSpec {
            path_style: true,
            endpoint: "minio.local".to_string(),
            ..Default::default()
        };
        let (host, path) = upstream_host_and_path(&upstream, "assets", "app.js");
        assert_eq!(host, "minio.local");
        assert_eq!(path, "/assets/app.js");
    }

    #[test]
    fn virtual_host_style_places_bucket_in_host() {
        let upstream = OSSProxyUpstreamSpec {
            path_style: false,
            endpoint: "s3.amazonaws.com".to_string(),
            ..Default::default()
        };
        let (host, path) = upstream_host_and_path(&upstream, "assets", "app.js");
        assert_eq!(host, "assets.s3.amazonaws.com");
        assert_eq!(path, "/app.js");
    }

    #[test]
    fn html_objects_use_html_max_age() {
        let policy = CachePolicy {
            html_max_age: Some(42),
            ..Default::default()
        };
        assert_eq!(
            cache_control_for(&policy, ObjectClass::Html),
            Some("public, max-age=42".to_string())
        );
    }

    #[test]
    fn disabled_policy_sets_no_cache_control() {
        let policy = CachePolicy {
            enabled: Some(false),
            ..Default::default()
        };
        assert_eq!(cache_control_for(&policy, ObjectClass::Static), None);
    }

    #[test]
    fn static_extension_is_classified_static() {
        assert!(matches!(classify(None, "app.js"), ObjectClass::Static));
        assert!(matches!(classify(None, "data"), ObjectClass::Default));
    }

    #[test]
    fn content_type_wins_over_extension() {
        assert!(matches!(
            classify(Some("text/html; charset=utf-8"), "app.js"),
            ObjectClass::Html
        ));
        assert!(matches!(
            classify(Some("application/octet-stream"), "app.js"),
            ObjectClass::Static
        ));
    }
}
