#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod cache;
mod metrics;

pub use cache::{Cache, CacheStatus, ObjectId, ResolveError, ResolvedRoute};
pub use metrics::{MetricsRegistry, ResourceKey, ResourceKind};
