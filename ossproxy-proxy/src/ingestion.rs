//! Loopback API the Watcher pushes cluster-state updates to. Generalizes
//! `src/admission.rs`'s `Service<Request<Body>>` wiring (path match, JSON
//! body parse, small `thiserror`-derived failure enum) to the six
//! update/delete endpoints instead of a single admission review.

use crate::state::ProxyState;
use futures::future;
use hyper::{Body, Method, Request, Response, StatusCode};
use ossproxy_api::{OSSProxyRouteSpec, OSSProxyUpstreamSpec, Secret};
use serde::Deserialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::task;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Clone)]
pub struct IngestionService {
    state: ProxyState,
    api_key: String,
}

impl IngestionService {
    pub fn new(state: ProxyState, api_key: String) -> Self {
        Self { state, api_key }
    }
}

impl hyper::service::Service<Request<Body>> for IngestionService {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = future::BoxFuture<'static, Result<Response<Body>, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut task::Context<'_>) -> task::Poll<Result<(), Infallible>> {
        task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let state = self.state.clone();
        let api_key = self.api_key.clone();
        Box::pin(async move { Ok(route(&state, &api_key, req).await) })
    }
}

#[derive(Debug, Error)]
enum IngestError {
    #[error("missing or incorrect X-API-Key header")]
    Unauthorized,
    #[error("failed to read request body: {0}")]
    Body(#[from] hyper::Error),
    #[error("malformed JSON payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("no such ingestion endpoint")]
    NotFound,
}

impl IngestError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Body(_) | Self::Malformed(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
        }
    }
}

#[derive(Deserialize)]
struct Update<T> {
    namespace: String,
    name: String,
    spec: T,
}

#[derive(Deserialize)]
struct Delete {
    namespace: String,
    name: String,
}

async fn route(state: &ProxyState, api_key: &str, req: Request<Body>) -> Response<Body> {
    if req.method() != Method::POST {
        return plain(StatusCode::METHOD_NOT_ALLOWED, "only POST is supported\n");
    }

    let path = req.uri().path().to_string();
    let authorized = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == api_key)
        .unwrap_or(false);

    let outcome = if !authorized {
        Err(IngestError::Unauthorized)
    } else {
        dispatch(state, &path, req).await
    };

    match outcome {
        Ok(()) => plain(StatusCode::OK, "ok\n"),
        Err(error) => {
            warn!(%path, %error, "ingestion request rejected");
            plain(error.status(), &format!("{error}\n"))
        }
    }
}

async fn dispatch(state: &ProxyState, path: &str, req: Request<Body>) -> Result<(), IngestError> {
    match path {
        "/api/routes/update" => {
            let body: Update<OSSProxyRouteSpec> = body_json(req).await?;
            let id = (body.namespace, body.name);
            let now = now_unix_secs();
            info!(namespace = %id.0, name = %id.1, "ingested route update");
            state.cache.update_route(id, body.spec, now);
        }
        "/api/routes/delete" => {
            let body: Delete = body_json(req).await?;
            info!(namespace = %body.namespace, name = %body.name, "ingested route delete");
            state.cache.delete_route(&(body.namespace, body.name));
        }
        "/api/upstreams/update" => {
            let body: Update<OSSProxyUpstreamSpec> = body_json(req).await?;
            info!(namespace = %body.namespace, name = %body.name, "ingested upstream update");
            state.cache.update_upstream((body.namespace, body.name), body.spec);
        }
        "/api/upstreams/delete" => {
            let body: Delete = body_json(req).await?;
            info!(namespace = %body.namespace, name = %body.name, "ingested upstream delete");
            state.cache.delete_upstream(&(body.namespace, body.name));
        }
        "/api/secrets/update" => {
            let body: Update<Secret> = body_json(req).await?;
            info!(namespace = %body.namespace, name = %body.name, "ingested secret update");
            state.cache.update_secret((body.namespace, body.name), body.spec);
        }
        "/api/secrets/delete" => {
            let body: Delete = body_json(req).await?;
            info!(namespace = %body.namespace, name = %body.name, "ingested secret delete");
            state.cache.delete_secret(&(body.namespace, body.name));
        }
        _ => return Err(IngestError::NotFound),
    }
    Ok(())
}

async fn body_json<T: for<'de> Deserialize<'de>>(req: Request<Body>) -> Result<T, IngestError> {
    let bytes = hyper::body::to_bytes(req.into_body()).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn now_unix_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn plain(status: StatusCode, body: &str) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "text/plain")
        .body(Body::from(body.to_string()))
        .expect("static response must be valid")
}

pub async fn serve(addr: SocketAddr, state: ProxyState, api_key: String) -> Result<(), hyper::Error> {
    let server =
        hyper::Server::bind(&addr).serve(hyper::service::make_service_fn(move |_conn| {
            let service = IngestionService::new(state.clone(), api_key.clone());
            future::ok::<_, Infallible>(service)
        }));
    let addr = server.local_addr();
    info!(%addr, "ingestion API listening");
    server.await
}
