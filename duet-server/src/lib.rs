pub mod config;
pub mod error;
pub mod relay;

pub use config::ServerConfig;
pub use error::ServerError;
pub use relay::{HubStats, TopicHub, ws_handler};

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Routes of the relay: `/ws/{topic}`, `/health` and `/stats`.
pub fn router(hub: TopicHub) -> Router {
    // Browser clients connect from other origins.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws/{topic}", get(ws_handler))
        .route("/health", get(|| async { "ok" }))
        .route("/stats", get(stats))
        .layer(cors)
        .with_state(hub)
}

async fn stats(State(hub): State<TopicHub>) -> Json<HubStats> {
    Json(hub.stats())
}

pub async fn bind(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })
}

/// Serves the relay on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    hub: TopicHub,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ServerError> {
    if let Ok(addr) = listener.local_addr() {
        info!("Relay listening on ws://{}", addr);
    }
    axum::serve(listener, router(hub))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(ServerError::Serve)
}
