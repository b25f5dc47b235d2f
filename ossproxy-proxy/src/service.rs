//! The public-facing `hyper::service::Service` that serves proxied asset
//! requests. Shaped like `src/admin.rs`'s `make_service_fn`/`service_fn`
//! wiring, generalized to the full pipeline and instrumented per request
//! the way `AdmissionService::call` logs its inbound/outbound review.

use crate::pipeline::{self, ProxiedResponse};
use crate::state::ProxyState;
use futures::future;
use hyper::{Body, Request, Response};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::task;
use tracing::{info, instrument};

#[derive(Clone)]
pub struct ProxyService {
    state: ProxyState,
}

impl ProxyService {
    pub fn new(state: ProxyState) -> Self {
        Self { state }
    }
}

impl hyper::service::Service<Request<Body>> for ProxyService {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = future::BoxFuture<'static, Result<Response<Body>, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut task::Context<'_>) -> task::Poll<Result<(), Infallible>> {
        task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let state = self.state.clone();
        Box::pin(async move { Ok(handle(&state, req).await) })
    }
}

#[instrument(skip(state, req), fields(host))]
async fn handle(state: &ProxyState, req: Request<Body>) -> Response<Body> {
    if req.method() != hyper::Method::GET && req.method() != hyper::Method::HEAD {
        return plain_response(405, "only GET is supported\n");
    }

    let host = request_host(&req);
    tracing::Span::current().record("host", &tracing::field::display(&host));

    let path = req.uri().path().to_string();
    let query = req.uri().query().unwrap_or("").to_string();

    let proxied = pipeline::handle(state, &host, &path, &query).await;
    to_hyper_response(proxied)
}

fn request_host(req: &Request<Body>) -> String {
    req.headers()
        .get(hyper::header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(|h| h.split(':').next().unwrap_or(h).to_string())
        .or_else(|| req.uri().host().map(ToString::to_string))
        .unwrap_or_default()
}

fn to_hyper_response(proxied: ProxiedResponse) -> Response<Body> {
    let mut builder = Response::builder().status(proxied.status);
    for (name, value) in &proxied.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
        .body(Body::from(proxied.body))
        .unwrap_or_else(|_| Response::new(Body::from("internal error building response\n")))
}

fn plain_response(status: u16, body: &'static str) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "text/plain")
        .body(Body::from(body))
        .expect("static response must be valid")
}

#[instrument(skip(state))]
pub async fn serve(addr: SocketAddr, state: ProxyState) -> Result<(), hyper::Error> {
    let server =
        hyper::Server::bind(&addr).serve(hyper::service::make_service_fn(move |_conn| {
            let service = ProxyService::new(state.clone());
            future::ok::<_, Infallible>(service)
        }));
    let addr = server.local_addr();
    info!(%addr, "proxy listening");
    server.await
}
