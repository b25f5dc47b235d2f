//! `/health` and `/metrics` listener. Grounded directly in the teacher's
//! `src/admin.rs`: same `make_service_fn`/path-match shape, generalized
//! from a single `watch::Receiver<bool>` readiness flag to the cache's own
//! readiness latch, plus a `/metrics` route the teacher's admin server
//! doesn't carry.

use crate::state::ProxyState;
use futures::future;
use hyper::{Body, Request, Response};
use std::net::SocketAddr;
use tracing::{info, instrument};

#[instrument(skip(state))]
pub async fn serve(addr: SocketAddr, state: ProxyState) -> Result<(), hyper::Error> {
    let server =
        hyper::server::Server::bind(&addr).serve(hyper::service::make_service_fn(move |_conn| {
            let state = state.clone();
            future::ok::<_, hyper::Error>(hyper::service::service_fn(
                move |req: Request<Body>| {
                    let state = state.clone();
                    future::ok::<_, hyper::Error>(match req.uri().path() {
                        "/health" => handle_health(&state, &req),
                        "/metrics" => handle_metrics(&state, &req),
                        _ => Response::builder()
                            .status(hyper::StatusCode::NOT_FOUND)
                            .body(Body::default())
                            .unwrap(),
                    })
                },
            ))
        }));
    let addr = server.local_addr();
    info!(%addr, "admin server listening");
    server.await
}

fn handle_health(state: &ProxyState, req: &Request<Body>) -> Response<Body> {
    match *req.method() {
        hyper::Method::GET | hyper::Method::HEAD => {
            let status = state.cache.status();
            let body = format!(
                "{}\nroutes={} upstreams={} secrets={} synced_once={} last_sync_epoch={}\n",
                if status.ready { "ready" } else { "not ready" },
                status.route_count,
                status.upstream_count,
                status.secret_count,
                status.synced_once,
                status.last_sync_epoch,
            );
            let code = if status.ready {
                hyper::StatusCode::OK
            } else {
                hyper::StatusCode::SERVICE_UNAVAILABLE
            };
            Response::builder()
                .status(code)
                .header(hyper::header::CONTENT_TYPE, "text/plain")
                .body(body.into())
                .unwrap()
        }
        _ => Response::builder()
            .status(hyper::StatusCode::METHOD_NOT_ALLOWED)
            .body(Body::default())
            .unwrap(),
    }
}

fn handle_metrics(state: &ProxyState, req: &Request<Body>) -> Response<Body> {
    match *req.method() {
        hyper::Method::GET => {
            state.metrics.set_cache_status(&state.cache.status());
            let text = state.metrics.encode_prometheus(now_unix_secs());
            Response::builder()
                .status(hyper::StatusCode::OK)
                .header(hyper::header::CONTENT_TYPE, "text/plain; version=0.0.4")
                .body(text.into())
                .unwrap()
        }
        _ => Response::builder()
            .status(hyper::StatusCode::METHOD_NOT_ALLOWED)
            .body(Body::default())
            .unwrap(),
    }
}

fn now_unix_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
