//! End-to-end exercises of the request-serving pipeline against a mock
//! object store, covering the literal scenarios from spec.md §8 (S1-S3).
//! Grounded in `wiremock`'s `MockServer`/`Mock::given` idiom as used in
//! `other_examples`' reverse-proxy-style integration tests.

use ossproxy_api::{
    Credentials, InlineCredentials, OSSProxyRouteSpec, OSSProxyUpstreamSpec, Provider, UpstreamRef,
};
use ossproxy_cache::{Cache, MetricsRegistry};
use ossproxy_proxy::pipeline;
use ossproxy_proxy::state::ProxyState;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn upstream(endpoint: String) -> OSSProxyUpstreamSpec {
    OSSProxyUpstreamSpec {
        provider: Provider::Minio,
        region: "us-east-1".to_string(),
        endpoint,
        use_https: false,
        path_style: true,
        credentials: Credentials {
            inline: Some(InlineCredentials {
                access_key_id: "AKID".to_string(),
                secret_access_key: "SECRET".to_string(),
            }),
            secret_ref: None,
        },
        timeout: None,
        retry: None,
    }
}

fn route(spa_app: bool, error_pages: Option<&[(&str, &str)]>) -> OSSProxyRouteSpec {
    OSSProxyRouteSpec {
        hosts: vec!["app.example.com".to_string()],
        upstream_ref: UpstreamRef {
            name: "up".to_string(),
            namespace: None,
        },
        bucket: "b".to_string(),
        prefix: None,
        index_file: None,
        spa_app,
        error_pages: error_pages.map(|pairs| {
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        }),
        cache: None,
    }
}

async fn state_with(upstream: OSSProxyUpstreamSpec, route: OSSProxyRouteSpec) -> ProxyState {
    let cache = Cache::new();
    cache.update_upstream(("ns".to_string(), "up".to_string()), upstream);
    cache.update_route(("ns".to_string(), "r".to_string()), route, 1);
    ProxyState::new(cache, MetricsRegistry::new())
}

fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

#[tokio::test]
async fn s1_root_request_is_served_from_index() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/b/index.html"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html>home</html>")
                .insert_header("content-type", "text/html"),
        )
        .mount(&server)
        .await;

    let state = state_with(upstream(server.address().to_string()), route(true, None)).await;

    let resp = pipeline::handle(&state, "app.example.com", "/", "").await;

    assert_eq!(resp.status, 200);
    assert_eq!(header(&resp.headers, "cache-control"), Some("public, max-age=300"));
    assert_eq!(resp.body, b"<html>home</html>");
}

#[tokio::test]
async fn s2_spa_fallback_serves_index_on_404() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/b/unknown/path"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b/index.html"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html>spa</html>")
                .insert_header("content-type", "text/html"),
        )
        .mount(&server)
        .await;

    let state = state_with(upstream(server.address().to_string()), route(true, None)).await;

    let resp = pipeline::handle(&state, "app.example.com", "/unknown/path", "").await;

    assert_eq!(resp.status, 200);
    assert_eq!(
        header(&resp.headers, "content-type"),
        Some("text/html; charset=utf-8")
    );
    assert_eq!(resp.body, b"<html>spa</html>");
    assert_eq!(header(&resp.headers, "cache-control"), Some("public, max-age=300"));
}

#[tokio::test]
async fn s3_custom_error_page_is_served_on_404_without_spa() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/b/unknown/path"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b/404.html"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html>not found</html>")
                .insert_header("content-type", "text/html"),
        )
        .mount(&server)
        .await;

    let state = state_with(
        upstream(server.address().to_string()),
        route(false, Some(&[("404", "404.html")])),
    )
    .await;

    let resp = pipeline::handle(&state, "app.example.com", "/unknown/path", "").await;

    assert_eq!(resp.status, 404);
    assert_eq!(
        header(&resp.headers, "content-type"),
        Some("text/html; charset=utf-8")
    );
    assert_eq!(resp.body, b"<html>not found</html>");
}

#[tokio::test]
async fn unknown_host_yields_plain_404() {
    let cache = Cache::new();
    cache.update_route(
        ("ns".to_string(), "r".to_string()),
        route(false, None),
        1,
    );
    let state = ProxyState::new(cache, MetricsRegistry::new());

    let resp = pipeline::handle(&state, "nope.example.com", "/", "").await;

    assert_eq!(resp.status, 404);
    assert!(String::from_utf8_lossy(&resp.body).contains("nope.example.com"));
}
