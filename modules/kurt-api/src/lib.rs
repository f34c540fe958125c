//! Read-only HTTP API over workflow runs: listings, live status, log
//! streaming (polling and SSE), plus cancel and retry.

mod routes;

pub use routes::{router, ApiState};

use std::net::SocketAddr;

use tower_http::trace::TraceLayer;
use tracing::info;

/// Serve the API until the process exits.
pub async fn serve(state: ApiState, addr: SocketAddr) -> anyhow::Result<()> {
    let app = router(state).layer(TraceLayer::new_for_http());
    info!(%addr, "API listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
