use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::config::ServerConfig;
use crate::http::connection::Connection;
use crate::proxy::LoadBalancer;

/// Binds `listen_addr` and serves until the accept loop fails.
pub async fn run(cfg: &ServerConfig, balancer: Arc<LoadBalancer>) -> anyhow::Result<()> {
    balancer.ensure_nodes()?;

    let listener = TcpListener::bind(&cfg.listen_addr).await?;
    info!("Listening on {}", cfg.listen_addr);

    serve(listener, balancer, cfg.max_body_bytes).await
}

/// Accepts connections on an already bound listener, one task each.
pub async fn serve(
    listener: TcpListener,
    balancer: Arc<LoadBalancer>,
    max_body_bytes: usize,
) -> anyhow::Result<()> {
    balancer.ensure_nodes()?;

    loop {
        let (socket, peer) = listener.accept().await?;
        tracing::debug!("Accepted connection from {}", peer);

        let balancer = balancer.clone();
        tokio::spawn(async move {
            let mut conn = Connection::new(socket, balancer, max_body_bytes);
            if let Err(e) = conn.run().await {
                tracing::debug!("Connection error from {}: {}", peer, e);
            }
        });
    }
}
