//! `index_size`/`index_applies`/`index_deletes`/`index_resets` counters for
//! the route host index, lifted from `k8s/index/src/metrics.rs`'s
//! `IndexMetrics`/`NamespacedIndexLabels`. This reflector drives its own
//! watch loop rather than `kubert::index`, so the wiring into
//! `RouteHostIndex` is direct instead of going through
//! `kubert::index::IndexNamespacedResource`, but the label shape and
//! apply/delete/reset counters are unchanged.

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

const KIND: &str = "route";

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct NamespacedIndexLabels {
    namespace: String,
    kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct IndexLabels {
    kind: String,
}

#[derive(Clone)]
pub struct RouteIndexMetrics {
    index_size: Family<NamespacedIndexLabels, Gauge>,
    index_applies: Family<NamespacedIndexLabels, Counter>,
    index_deletes: Family<NamespacedIndexLabels, Counter>,
    index_resets: Family<IndexLabels, Counter>,
}

impl RouteIndexMetrics {
    pub fn register(registry: &mut Registry) -> Self {
        let index_size = Family::default();
        registry.register(
            "index_size",
            "Gauge of the number of routes in the index",
            index_size.clone(),
        );

        let index_applies = Family::default();
        registry.register(
            "index_applies",
            "Count of applies to the index",
            index_applies.clone(),
        );

        let index_deletes = Family::default();
        registry.register(
            "index_deletes",
            "Count of deletes to the index",
            index_deletes.clone(),
        );

        let index_resets = Family::default();
        registry.register(
            "index_resets",
            "Count of resets to the index",
            index_resets.clone(),
        );

        Self {
            index_size,
            index_applies,
            index_deletes,
            index_resets,
        }
    }

    fn labels(namespace: &str) -> NamespacedIndexLabels {
        NamespacedIndexLabels {
            namespace: namespace.to_string(),
            kind: KIND.to_string(),
        }
    }

    pub fn observe_apply(&self, namespace: &str, size: usize) {
        let labels = Self::labels(namespace);
        self.index_applies.get_or_create(&labels).inc();
        self.index_size.get_or_create(&labels).set(size as i64);
    }

    pub fn observe_delete(&self, namespace: &str, size: usize) {
        let labels = Self::labels(namespace);
        self.index_deletes.get_or_create(&labels).inc();
        self.index_size.get_or_create(&labels).set(size as i64);
    }

    pub fn observe_reset(&self) {
        self.index_resets
            .get_or_create(&IndexLabels {
                kind: KIND.to_string(),
            })
            .inc();
    }
}
