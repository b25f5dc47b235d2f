#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod admission;
mod apikey;
mod cli;
mod index_metrics;
mod ingestion_client;
mod reflector;
mod route_index;
mod watch;

use anyhow::{bail, Context, Result};
use clap::Parser;
use ingestion_client::IngestionClient;
use reflector::Reflector;
use route_index::RouteHostIndex;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();
    let ingestion_api_url = args.ingestion_api_url.clone();
    let api_key_file = args.api_key_file.clone();

    let (runtime, route_metrics) = args.runtime().await?;

    let api_key = apikey::load_or_create(&api_key_file).context("failed to load API key")?;
    let ingestion = IngestionClient::new(ingestion_api_url, api_key);

    let routes = RouteHostIndex::new();
    let reflector = Reflector::new(runtime.client(), ingestion, routes.clone(), route_metrics);

    reflector
        .initial_sync()
        .await
        .context("initial sync failed; refusing to start")?;
    info!("initial sync complete, reflector is live");

    tokio::spawn(async move {
        if let Err(error) = reflector.run().await {
            tracing::error!(%error, "reflector task exited");
        }
    });

    let runtime = runtime.spawn_server(|| admission::AdmissionService { routes });

    if runtime.run().await.is_err() {
        bail!("aborted");
    }

    Ok(())
}
