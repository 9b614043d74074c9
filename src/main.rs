use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use sluice::config::Config;
use sluice::proxy::{LoadBalancer, ProxyAdapter, Selector};
use sluice::server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_level(true)
        .init();

    let cfg = Config::load()?;

    let selector = Selector::from_config(&cfg.nodes)?;
    let adapter = ProxyAdapter::from_config(&cfg.server);
    let balancer = Arc::new(LoadBalancer::new(selector, adapter));

    tokio::select! {
        res = server::run(&cfg.server, balancer) => {
            res?;
        }

        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}
