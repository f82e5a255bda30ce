// rest/mod.rs — HTTP surface of the daemon.
//
// Axum server bound locally by default. Two endpoints:
//   POST /v1/trigger   — check-change trigger from the upstream watch
//   GET  /v1/health    — liveness + pipeline state

pub mod routes;

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use crate::AppContext;

pub fn build_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/v1/trigger", post(routes::trigger::trigger))
        .route("/v1/health", get(routes::health::health))
        .with_state(ctx)
}

pub async fn start_rest_server(
    ctx: Arc<AppContext>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let bind = format!("{}:{}", ctx.config.bind_address, ctx.config.port);
    let addr: SocketAddr = bind.parse()?;

    let router = build_router(ctx);

    info!("trigger endpoint listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;
    Ok(())
}
