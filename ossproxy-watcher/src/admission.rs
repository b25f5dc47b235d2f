//! The validating admission webhook for `OSSProxyRoute`. Mirrors
//! `src/admission.rs`'s `AdmissionService`/`is_kind`/`admit_kind` dispatch
//! skeleton, collapsed to the single kind this system validates.

use crate::route_index::RouteHostIndex;
use anyhow::{anyhow, bail, Result};
use futures::future;
use hyper::{body::Buf, http, Body, Request, Response};
use kube::core::DynamicObject;
use kube::Resource;
use ossproxy_api::OSSProxyRoute;
use std::collections::HashSet;
use std::task;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct AdmissionService {
    pub routes: RouteHostIndex,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read request body: {0}")]
    Request(#[from] hyper::Error),
    #[error("failed to encode json response: {0}")]
    Json(#[from] serde_json::Error),
}

type Review = kube::core::admission::AdmissionReview<DynamicObject>;
type AdmissionRequest = kube::core::admission::AdmissionRequest<DynamicObject>;
type AdmissionResponse = kube::core::admission::AdmissionResponse;

impl hyper::service::Service<Request<Body>> for AdmissionService {
    type Response = Response<Body>;
    type Error = Error;
    type Future = future::BoxFuture<'static, Result<Response<Body>, Error>>;

    fn poll_ready(&mut self, _cx: &mut task::Context<'_>) -> task::Poll<Result<(), Error>> {
        task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        if req.uri().path() == "/health" {
            return Box::pin(future::ok(
                Response::builder()
                    .status(http::StatusCode::OK)
                    .body(Body::from("ok\n"))
                    .expect("health response must be valid"),
            ));
        }

        if req.method() != http::Method::POST || req.uri().path() != "/validate" {
            return Box::pin(future::ok(
                Response::builder()
                    .status(http::StatusCode::NOT_FOUND)
                    .body(Body::empty())
                    .expect("not found response must be valid"),
            ));
        }

        let routes = self.routes.clone();
        Box::pin(async move {
            let bytes = hyper::body::aggregate(req.into_body()).await?;
            let review: Review = match serde_json::from_reader(bytes.reader()) {
                Ok(review) => review,
                Err(error) => {
                    warn!(%error, "failed to parse admission request body");
                    return json_response(AdmissionResponse::invalid(error).into_review());
                }
            };

            let rsp = review
                .try_into()
                .map_err(anyhow::Error::from)
                .and_then(|req| {
                    debug!(?req);
                    admit(req, &routes)
                })
                .unwrap_or_else(|error| {
                    warn!(%error, "denied admission");
                    AdmissionResponse::invalid(error)
                });

            debug!(?rsp);
            json_response(rsp.into_review())
        })
    }
}

fn json_response(rsp: kube::core::admission::AdmissionReview<DynamicObject>) -> Result<Response<Body>, Error> {
    let bytes = serde_json::to_vec(&rsp)?;
    Ok(Response::builder()
        .status(http::StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(bytes))
        .expect("admission review response must be valid"))
}

fn admit(req: AdmissionRequest, routes: &RouteHostIndex) -> Result<AdmissionResponse> {
    if !is_kind::<OSSProxyRoute>(&req) {
        return Ok(AdmissionResponse::from(&req));
    }

    let rsp = AdmissionResponse::from(&req);
    let ns = req
        .namespace
        .clone()
        .ok_or_else(|| anyhow!("admission request missing namespace"))?;
    let name = req.name.clone();

    let obj = req
        .object
        .ok_or_else(|| anyhow!("admission request missing 'object'"))?;
    let spec_value = obj
        .data
        .get("spec")
        .cloned()
        .ok_or_else(|| anyhow!("admission request missing 'spec'"))?;
    let spec: ossproxy_api::OSSProxyRouteSpec = serde_json::from_value(spec_value)?;

    match validate(&ns, &name, &spec, routes) {
        Ok(()) => Ok(rsp),
        Err(error) => {
            info!(%error, %ns, %name, "route denied");
            Ok(rsp.deny(error))
        }
    }
}

fn validate(
    ns: &str,
    name: &str,
    spec: &ossproxy_api::OSSProxyRouteSpec,
    routes: &RouteHostIndex,
) -> Result<()> {
    if spec.hosts.is_empty() {
        bail!("spec.hosts must not be empty");
    }

    let mut seen = HashSet::new();
    for host in &spec.hosts {
        if !seen.insert(host) {
            bail!("spec.hosts lists {host:?} more than once");
        }
    }

    let id = (ns.to_string(), name.to_string());
    if let Some((host, (owner_ns, owner_name))) = routes.first_conflict(&spec.hosts, &id) {
        bail!("host {host:?} is already claimed by route {owner_name}/{owner_ns}");
    }

    Ok(())
}

fn is_kind<T>(req: &AdmissionRequest) -> bool
where
    T: Resource,
    T::DynamicType: Default,
{
    let dt = Default::default();
    *req.kind.group == *T::group(&dt) && *req.kind.kind == *T::kind(&dt)
}
