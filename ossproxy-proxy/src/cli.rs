use clap::Parser;
use std::{net::SocketAddr, path::PathBuf};

/// Mirrors `ossproxy-watcher`'s `Args` shape (`src/cli.rs`-style flattened
/// `kubert` logging flags), generalized with this binary's three listeners
/// instead of one.
#[derive(Debug, Parser)]
#[clap(name = "ossproxy-proxy", about = "OSS-FE proxy request-serving pipeline")]
pub struct Args {
    #[clap(long, default_value = "info,warn", env = "LOG_LEVEL")]
    pub log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    pub log_format: kubert::LogFormat,

    /// Public-facing listener serving proxied asset requests.
    #[clap(long, default_value = "0.0.0.0:8080", env = "PROXY_ADDR")]
    pub proxy_addr: SocketAddr,

    /// `/health` and `/metrics` listener.
    #[clap(long, default_value = "0.0.0.0:9980", env = "ADMIN_ADDR")]
    pub admin_addr: SocketAddr,

    /// Loopback listener the Watcher pushes cluster-state updates to.
    #[clap(long, default_value = "127.0.0.1:9090", env = "INGESTION_ADDR")]
    pub ingestion_addr: SocketAddr,

    #[clap(long, default_value = "/var/run/ossproxy/api-key", env = "API_KEY_FILE")]
    pub api_key_file: PathBuf,
}
