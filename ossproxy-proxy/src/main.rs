#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

use anyhow::Context;
use clap::Parser;
use ossproxy_cache::{Cache, MetricsRegistry};
use ossproxy_proxy::{admin, apikey, cli, ingestion, service, state::ProxyState};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();
    args.log_format.try_init(args.log_level.clone())?;

    let api_key = apikey::load_or_create(&args.api_key_file).context("failed to load API key")?;
    let state = ProxyState::new(Cache::new(), MetricsRegistry::new());

    // None of the three servers below take a shutdown watch; a signal just
    // ends the select and lets main return, dropping their tasks.
    let (shutdown_tx, _shutdown_rx) = kubert::shutdown::sigint_or_sigterm()?;

    let proxy_task = tokio::spawn(service::serve(args.proxy_addr, state.clone()));
    let admin_task = tokio::spawn(admin::serve(args.admin_addr, state.clone()));
    let ingestion_task = tokio::spawn(ingestion::serve(args.ingestion_addr, state, api_key));

    info!(
        proxy_addr = %args.proxy_addr,
        admin_addr = %args.admin_addr,
        ingestion_addr = %args.ingestion_addr,
        "ossproxy-proxy starting"
    );

    tokio::select! {
        result = proxy_task => report(result, "proxy server"),
        result = admin_task => report(result, "admin server"),
        result = ingestion_task => report(result, "ingestion server"),
        _ = shutdown_tx.signaled() => info!("received shutdown signal"),
    }

    Ok(())
}

fn report(result: Result<Result<(), hyper::Error>, tokio::task::JoinError>, name: &str) {
    match result {
        Ok(Ok(())) => error!(server = name, "server exited unexpectedly"),
        Ok(Err(error)) => error!(server = name, %error, "server failed"),
        Err(error) => error!(server = name, %error, "server task panicked"),
    }
}
