//! Per-route/per-upstream request metrics.
//!
//! Grounded in the `Family<Labels, Counter/Gauge>` registration idiom from
//! `k8s/index/src/metrics.rs`'s `IndexMetrics`: every series this module
//! exposes is a real `prometheus_client` `Family`, registered once into a
//! `Registry` owned by this struct and rendered through
//! `prometheus_client::encoding::text::encode`. The windowed request/error
//! rates and the latency percentiles are derived values the crate has no
//! built-in metric type for (they depend on a rolling time window and a
//! cumulative count over the logarithmic bucket histogram spec.md
//! describes), so they're recomputed from this module's own ring buffer
//! and bucket counters and pushed into plain `Gauge` families just before
//! each encode, the same "refresh then render" shape `IndexMetrics` itself
//! uses for `index_size` on every apply/delete.

use crate::cache::CacheStatus;
use parking_lot::{Mutex, RwLock};
use prometheus_client::encoding::{text::encode, EncodeLabelSet};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

const BUCKET_SECONDS: i64 = 5;
const RING_BUCKETS: usize = 15 * 60 / BUCKET_SECONDS as usize;
const LATENCY_BUCKETS: usize = 200;
const QUANTILES: [(&str, f64); 6] = [
    ("0.25", 0.25),
    ("0.5", 0.5),
    ("0.75", 0.75),
    ("0.95", 0.95),
    ("0.98", 0.98),
    ("0.99", 0.99),
];
const WINDOWS: [(&str, i64); 3] = [("1m", 60), ("5m", 300), ("15m", 900)];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Route,
    Upstream,
}

impl ResourceKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Route => "route",
            Self::Upstream => "upstream",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ResourceLabels {
    kind: String,
    namespace: String,
    name: String,
}

impl From<&ResourceKey> for ResourceLabels {
    fn from(key: &ResourceKey) -> Self {
        Self {
            kind: key.kind.as_str().to_string(),
            namespace: key.namespace.clone(),
            name: key.name.clone(),
        }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct LeLabels {
    kind: String,
    namespace: String,
    name: String,
    le: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct WindowLabels {
    kind: String,
    namespace: String,
    name: String,
    window: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct QuantileLabels {
    kind: String,
    namespace: String,
    name: String,
    quantile: String,
}

#[derive(Clone, Copy, Default)]
struct RingSlot {
    epoch_bucket: i64,
    requests: u64,
    errors: u64,
}

/// Per-resource state that has no direct `prometheus_client` metric type:
/// the rolling request/error window and the running latency sum/min/max
/// needed to compute the mean.
struct State {
    ring: [RingSlot; RING_BUCKETS],
    latency_count: u64,
    latency_sum_ms: u64,
    latency_min_ms: u64,
    latency_max_ms: u64,
}

impl Default for State {
    fn default() -> Self {
        Self {
            ring: [RingSlot::default(); RING_BUCKETS],
            latency_count: 0,
            latency_sum_ms: 0,
            latency_min_ms: u64::MAX,
            latency_max_ms: 0,
        }
    }
}

fn bucket_index(ms: u64) -> usize {
    let ms = ms.max(1) as f64;
    let idx = (10.0 * ms.log2()).floor() as i64;
    idx.clamp(0, LATENCY_BUCKETS as i64 - 1) as usize
}

/// Upper-bound latency, in milliseconds, a bucket index represents.
fn bucket_upper_ms(index: usize) -> f64 {
    2f64.powf((index + 1) as f64 / 10.0)
}

/// The `le` label value for a bucket index. Must format identically at
/// record time (when the bucket counter is incremented) and at encode
/// time (when percentiles are recomputed by reading it back), so it's a
/// free function rather than inlined at either call site.
fn le_label(index: usize) -> String {
    format!("{:.4}", bucket_upper_ms(index))
}

impl State {
    fn record(&mut self, now_unix_secs: i64, is_error: bool, latency_ms: u64) {
        let bucket = now_unix_secs / BUCKET_SECONDS;
        let idx = bucket.rem_euclid(RING_BUCKETS as i64) as usize;
        let slot = &mut self.ring[idx];
        if slot.epoch_bucket != bucket {
            *slot = RingSlot {
                epoch_bucket: bucket,
                requests: 0,
                errors: 0,
            };
        }
        slot.requests += 1;
        if is_error {
            slot.errors += 1;
        }

        self.latency_count += 1;
        self.latency_sum_ms += latency_ms;
        self.latency_min_ms = self.latency_min_ms.min(latency_ms);
        self.latency_max_ms = self.latency_max_ms.max(latency_ms);
    }

    fn window_sum(&self, now_unix_secs: i64, window_secs: i64) -> (u64, u64) {
        let now_bucket = now_unix_secs / BUCKET_SECONDS;
        let window_buckets = window_secs / BUCKET_SECONDS;
        let mut requests = 0u64;
        let mut errors = 0u64;
        for i in 0..window_buckets {
            let bucket = now_bucket - i;
            let idx = bucket.rem_euclid(RING_BUCKETS as i64) as usize;
            let slot = &self.ring[idx];
            if slot.epoch_bucket == bucket {
                requests += slot.requests;
                errors += slot.errors;
            }
        }
        (requests, errors)
    }

    fn mean_ms(&self) -> f64 {
        if self.latency_count == 0 {
            0.0
        } else {
            self.latency_sum_ms as f64 / self.latency_count as f64
        }
    }
}

/// A request-metrics record for a single (kind, namespace, name).
#[derive(Clone, Default)]
struct ResourceMetrics {
    state: Arc<Mutex<State>>,
}

/// The process-wide metrics store. Every series is a real
/// `prometheus_client` `Family`, registered once in [`MetricsRegistry::new`]
/// and read back at encode time through `Family::get_or_create`.
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Arc<Registry>,
    by_key: Arc<RwLock<HashMap<ResourceKey, ResourceMetrics>>>,

    requests_total: Family<ResourceLabels, Counter>,
    errors_total: Family<ResourceLabels, Counter>,
    latency_buckets: Family<LeLabels, Counter>,
    latency_min_ms: Family<ResourceLabels, Gauge<f64, AtomicU64>>,
    latency_mean_ms: Family<ResourceLabels, Gauge<f64, AtomicU64>>,
    latency_max_ms: Family<ResourceLabels, Gauge<f64, AtomicU64>>,
    requests_per_minute: Family<WindowLabels, Gauge<f64, AtomicU64>>,
    errors_per_minute: Family<WindowLabels, Gauge<f64, AtomicU64>>,
    error_percentage: Family<WindowLabels, Gauge<f64, AtomicU64>>,
    quantiles: Family<QuantileLabels, Gauge<f64, AtomicU64>>,

    cache_ready: Gauge,
    cache_routes: Gauge,
    cache_upstreams: Gauge,
    cache_secrets: Gauge,
    cache_last_sync_epoch: Gauge,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let requests_total = Family::default();
        registry.register(
            "ossproxy_requests_total",
            "Total requests handled.",
            requests_total.clone(),
        );

        let errors_total = Family::default();
        registry.register(
            "ossproxy_errors_total",
            "Total requests that resulted in an error response.",
            errors_total.clone(),
        );

        let latency_buckets = Family::default();
        registry.register(
            "ossproxy_request_duration_ms_bucket",
            "Non-cumulative lifetime count of requests whose latency fell in a logarithmic bucket.",
            latency_buckets.clone(),
        );

        let latency_min_ms = Family::default();
        registry.register(
            "ossproxy_request_duration_ms_min",
            "Lifetime minimum latency.",
            latency_min_ms.clone(),
        );

        let latency_mean_ms = Family::default();
        registry.register(
            "ossproxy_request_duration_ms_mean",
            "Lifetime mean latency.",
            latency_mean_ms.clone(),
        );

        let latency_max_ms = Family::default();
        registry.register(
            "ossproxy_request_duration_ms_max",
            "Lifetime maximum latency.",
            latency_max_ms.clone(),
        );

        let requests_per_minute = Family::default();
        registry.register(
            "ossproxy_requests_per_minute",
            "Windowed request rate.",
            requests_per_minute.clone(),
        );

        let errors_per_minute = Family::default();
        registry.register(
            "ossproxy_errors_per_minute",
            "Windowed error rate.",
            errors_per_minute.clone(),
        );

        let error_percentage = Family::default();
        registry.register(
            "ossproxy_error_percentage",
            "Windowed error percentage.",
            error_percentage.clone(),
        );

        let quantiles = Family::default();
        registry.register(
            "ossproxy_request_duration_ms",
            "Latency percentiles, derived from the logarithmic bucket histogram by cumulative counting.",
            quantiles.clone(),
        );

        let cache_ready = Gauge::default();
        registry.register(
            "ossproxy_cache_ready",
            "Whether the routing cache has completed its initial sync.",
            cache_ready.clone(),
        );

        let cache_routes = Gauge::default();
        registry.register(
            "ossproxy_cache_routes",
            "Number of routes currently held in the routing cache.",
            cache_routes.clone(),
        );

        let cache_upstreams = Gauge::default();
        registry.register(
            "ossproxy_cache_upstreams",
            "Number of upstreams currently held in the routing cache.",
            cache_upstreams.clone(),
        );

        let cache_secrets = Gauge::default();
        registry.register(
            "ossproxy_cache_secrets",
            "Number of secrets currently held in the routing cache.",
            cache_secrets.clone(),
        );

        let cache_last_sync_epoch = Gauge::default();
        registry.register(
            "ossproxy_cache_last_sync_epoch",
            "Unix timestamp of the last successful routing cache sync.",
            cache_last_sync_epoch.clone(),
        );

        Self {
            registry: Arc::new(registry),
            by_key: Arc::new(RwLock::new(HashMap::new())),
            requests_total,
            errors_total,
            latency_buckets,
            latency_min_ms,
            latency_mean_ms,
            latency_max_ms,
            requests_per_minute,
            errors_per_minute,
            error_percentage,
            quantiles,
            cache_ready,
            cache_routes,
            cache_upstreams,
            cache_secrets,
            cache_last_sync_epoch,
        }
    }

    fn get_or_create(&self, key: ResourceKey) -> ResourceMetrics {
        if let Some(m) = self.by_key.read().get(&key) {
            return m.clone();
        }
        self.by_key.write().entry(key).or_default().clone()
    }

    fn record_one(&self, key: ResourceKey, now_unix_secs: i64, is_error: bool, latency_ms: u64) {
        let metrics = self.get_or_create(key.clone());
        metrics.state.lock().record(now_unix_secs, is_error, latency_ms);

        let labels = ResourceLabels::from(&key);
        self.requests_total.get_or_create(&labels).inc();
        if is_error {
            self.errors_total.get_or_create(&labels).inc();
        }

        let idx = bucket_index(latency_ms);
        self.latency_buckets
            .get_or_create(&LeLabels {
                kind: labels.kind.clone(),
                namespace: labels.namespace.clone(),
                name: labels.name.clone(),
                le: le_label(idx),
            })
            .inc();

        let state = metrics.state.lock();
        self.latency_min_ms
            .get_or_create(&labels)
            .set(state.latency_min_ms as f64);
        self.latency_max_ms
            .get_or_create(&labels)
            .set(state.latency_max_ms as f64);
        self.latency_mean_ms.get_or_create(&labels).set(state.mean_ms());
    }

    /// Records one request against both its route and upstream records.
    pub fn record_request(
        &self,
        route_namespace: &str,
        route_name: &str,
        upstream_namespace: &str,
        upstream_name: &str,
        now_unix_secs: i64,
        is_error: bool,
        latency_ms: u64,
    ) {
        self.record_one(
            ResourceKey {
                kind: ResourceKind::Route,
                namespace: route_namespace.to_string(),
                name: route_name.to_string(),
            },
            now_unix_secs,
            is_error,
            latency_ms,
        );

        self.record_one(
            ResourceKey {
                kind: ResourceKind::Upstream,
                namespace: upstream_namespace.to_string(),
                name: upstream_name.to_string(),
            },
            now_unix_secs,
            is_error,
            latency_ms,
        );
    }

    /// Lifetime count of requests whose latency fell in bucket `index`,
    /// read back from the counter incremented by [`Self::record_one`].
    fn bucket_count(&self, key: &ResourceKey, index: usize) -> u64 {
        let labels = ResourceLabels::from(key);
        self.latency_buckets
            .get_or_create(&LeLabels {
                kind: labels.kind,
                namespace: labels.namespace,
                name: labels.name,
                le: le_label(index),
            })
            .get()
    }

    fn percentile_ms(&self, key: &ResourceKey, total: u64, fraction: f64) -> f64 {
        if total == 0 {
            return 0.0;
        }
        let target = (fraction * total as f64).ceil() as u64;
        let mut cumulative = 0u64;
        for i in 0..LATENCY_BUCKETS {
            cumulative += self.bucket_count(key, i);
            if cumulative >= target.max(1) {
                return bucket_upper_ms(i);
            }
        }
        bucket_upper_ms(LATENCY_BUCKETS - 1)
    }

    /// Sets the cache-derived gauges consulted by `/health` and
    /// `/metrics`, per spec.md §4.2's requirement that `Status()` feeds
    /// both surfaces.
    pub fn set_cache_status(&self, status: &CacheStatus) {
        self.cache_ready.set(status.ready as i64);
        self.cache_routes.set(status.route_count as i64);
        self.cache_upstreams.set(status.upstream_count as i64);
        self.cache_secrets.set(status.secret_count as i64);
        self.cache_last_sync_epoch.set(status.last_sync_epoch);
    }

    /// Refreshes every derived gauge (windowed rates, percentiles) from
    /// the current ring/bucket state and renders the whole registry as
    /// Prometheus text exposition format.
    pub fn encode_prometheus(&self, now_unix_secs: i64) -> String {
        for (key, metrics) in self.by_key.read().iter() {
            let state = metrics.state.lock();
            let labels = ResourceLabels::from(key);

            for (window, secs) in WINDOWS {
                let (requests, errors) = state.window_sum(now_unix_secs, secs);
                let minutes = secs as f64 / 60.0;
                let error_pct = if requests == 0 {
                    0.0
                } else {
                    100.0 * errors as f64 / requests as f64
                };

                let wl = WindowLabels {
                    kind: labels.kind.clone(),
                    namespace: labels.namespace.clone(),
                    name: labels.name.clone(),
                    window: window.to_string(),
                };
                self.requests_per_minute
                    .get_or_create(&wl)
                    .set(requests as f64 / minutes);
                self.errors_per_minute
                    .get_or_create(&wl)
                    .set(errors as f64 / minutes);
                self.error_percentage.get_or_create(&wl).set(error_pct);
            }

            for (quantile, fraction) in QUANTILES {
                let p = self.percentile_ms(key, state.latency_count, fraction);
                self.quantiles
                    .get_or_create(&QuantileLabels {
                        kind: labels.kind.clone(),
                        namespace: labels.namespace.clone(),
                        name: labels.name.clone(),
                        quantile: quantile.to_string(),
                    })
                    .set(p);
            }
        }

        let mut out = String::new();
        encode(&mut out, &self.registry).expect("encoding to a String never fails");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_index_is_monotonic_and_capped() {
        assert!(bucket_index(1) <= bucket_index(10));
        assert!(bucket_index(10) <= bucket_index(1000));
        assert_eq!(bucket_index(u64::MAX), LATENCY_BUCKETS - 1);
    }

    #[test]
    fn percentiles_reflect_recorded_latencies() {
        let registry = MetricsRegistry::new();
        for ms in [10, 20, 30, 40, 100] {
            registry.record_request("ns", "r", "ns", "u", 1_700_000_000, false, ms);
        }
        let text = registry.encode_prometheus(1_700_000_000);
        assert!(text.contains("quantile=\"0.5\""));
        assert!(text.contains("ossproxy_requests_total{kind=\"route\",namespace=\"ns\",name=\"r\"} 5"));
    }

    #[test]
    fn error_percentage_reflects_error_ratio() {
        let registry = MetricsRegistry::new();
        registry.record_request("ns", "r", "ns", "u", 100, true, 5);
        registry.record_request("ns", "r", "ns", "u", 100, false, 5);
        let text = registry.encode_prometheus(100);
        assert!(text.contains("ossproxy_error_percentage"));
    }

    #[test]
    fn cache_status_gauges_are_rendered() {
        let registry = MetricsRegistry::new();
        registry.set_cache_status(&CacheStatus {
            ready: true,
            synced_once: true,
            route_count: 3,
            upstream_count: 2,
            secret_count: 1,
            last_sync_epoch: 1_700_000_000,
        });
        let text = registry.encode_prometheus(1_700_000_000);
        assert!(text.contains("ossproxy_cache_ready 1"));
        assert!(text.contains("ossproxy_cache_routes 3"));
    }
}
