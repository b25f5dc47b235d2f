use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

/// Generalized from `policy-controller`'s `src/cli.rs`: flattens
/// `kubert`'s client/server/admin arg groups and adds the flags this
/// reflector needs that the policy controller doesn't (the ingestion API
/// base URL and the shared API-key file).
#[derive(Debug, Parser)]
#[clap(name = "ossproxy-watcher", about = "OSS-FE proxy cluster-state reflector")]
pub struct Args {
    #[clap(long, default_value = "info,warn", env = "LOG_LEVEL")]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    server: kubert::ServerArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Disables the admission webhook server.
    #[clap(long, env = "WEBHOOK_ENABLED", default_value_t = true)]
    webhook_enabled: bool,

    /// Base URL of the Proxy's loopback ingestion API, e.g.
    /// `http://127.0.0.1:9090`.
    #[clap(long, default_value = "http://127.0.0.1:9090", env = "INGESTION_API_URL")]
    pub ingestion_api_url: String,

    /// Path to the 32-byte shared API key both processes use to
    /// authenticate the ingestion API. Generated at startup if absent.
    #[clap(long, default_value = "/var/run/ossproxy/api-key", env = "API_KEY_FILE")]
    pub api_key_file: PathBuf,
}

impl Args {
    /// Returns a [`kubert::Runtime`] configured by the CLI arguments, along
    /// with the route-index metrics registered into its admin server's
    /// Prometheus registry. The webhook server is omitted when disabled,
    /// the same toggle the teacher uses for its admission controller.
    pub async fn runtime(
        &self,
    ) -> Result<(
        kubert::Runtime<Option<kubert::server::Bound>>,
        crate::index_metrics::RouteIndexMetrics,
    )> {
        let server = if self.webhook_enabled {
            Some(self.server.clone())
        } else {
            None
        };

        let mut prom = prometheus_client::registry::Registry::default();
        let route_metrics = crate::index_metrics::RouteIndexMetrics::register(&mut prom);

        let runtime = kubert::Runtime::builder()
            .with_log(self.log_level.clone(), self.log_format.clone())
            .with_admin(self.admin.clone().into_builder().with_prometheus(prom))
            .with_client(self.client.clone())
            .with_optional_server(server)
            .build()
            .await?;

        Ok((runtime, route_metrics))
    }
}
