//! An in-process host->route index, kept current by the reflector's Route
//! watch and consulted synchronously by the admission webhook. Playing the
//! same role as the teacher's `Index`/`SharedIndex` consulted from
//! `src/admission.rs`'s `ServerSpec::validate`, generalized from namespaced
//! server/port collisions to cluster-wide host collisions.

use ossproxy_api::OSSProxyRouteSpec;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub type ObjectId = (String, String);

#[derive(Clone, Default)]
pub struct RouteHostIndex {
    hosts: Arc<RwLock<HashMap<String, ObjectId>>>,
}

impl RouteHostIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&self, id: ObjectId, spec: &OSSProxyRouteSpec) {
        let mut hosts = self.hosts.write();
        hosts.retain(|_, owner| *owner != id);
        for host in &spec.hosts {
            hosts.insert(host.clone(), id.clone());
        }
    }

    pub fn remove(&self, id: &ObjectId) {
        self.hosts.write().retain(|_, owner| owner != id);
    }

    /// Number of distinct routes in `namespace` that currently own at
    /// least one host.
    pub fn route_count(&self, namespace: &str) -> usize {
        self.hosts
            .read()
            .values()
            .filter(|(ns, _)| ns == namespace)
            .collect::<HashSet<_>>()
            .len()
    }

    /// Returns the first host in `candidate_hosts` that already belongs to
    /// a route other than `excluding`, together with that route's id, if
    /// any.
    pub fn first_conflict(
        &self,
        candidate_hosts: &[String],
        excluding: &ObjectId,
    ) -> Option<(String, ObjectId)> {
        let hosts = self.hosts.read();
        candidate_hosts.iter().find_map(|h| {
            let owner = hosts.get(h)?;
            (owner != excluding).then(|| (h.clone(), owner.clone()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(hosts: &[&str]) -> OSSProxyRouteSpec {
        OSSProxyRouteSpec {
            hosts: hosts.iter().map(|h| h.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn detects_cross_route_conflict() {
        let index = RouteHostIndex::new();
        let a = ("ns".to_string(), "a".to_string());
        let b = ("ns".to_string(), "b".to_string());
        index.apply(a.clone(), &spec(&["shared.example"]));

        let conflict = index.first_conflict(&["shared.example".to_string()], &b);
        assert_eq!(conflict, Some(("shared.example".to_string(), a)));
    }

    #[test]
    fn excludes_self_on_update() {
        let index = RouteHostIndex::new();
        let a = ("ns".to_string(), "a".to_string());
        index.apply(a.clone(), &spec(&["a.example"]));

        let conflict = index.first_conflict(&["a.example".to_string()], &a);
        assert_eq!(conflict, None);
    }
}
