//! Liveness endpoint for orchestration health checks.

use std::net::SocketAddr;

use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub const ALIVE: &str = "Bot Alive";

pub fn router() -> Router {
    Router::new().route("/", get(|| async { ALIVE }))
}

/// Serve `GET /` until `cancel` fires.
pub async fn serve(listener: TcpListener, cancel: CancellationToken) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "liveness endpoint listening");
    axum::serve(listener, router())
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;
    Ok(())
}

pub async fn bind(port: u16) -> anyhow::Result<TcpListener> {
    Ok(TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).await?)
}
