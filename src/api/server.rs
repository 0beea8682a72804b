//! HTTP server setup: router and lifecycle.

use super::invoke::invoke;
use super::state::ApiState;
use crate::messaging::ChatPlatform;

use axum::Router;
use axum::extract::State;
use axum::response::Json;
use axum::routing::{get, post};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_seconds: u64,
}

/// Start the HTTP server on the given address.
///
/// The server stops accepting requests once `shutdown_rx` reads `true`; relay
/// tasks already spawned keep running on the runtime.
pub async fn start_http_server<P: ChatPlatform>(
    bind: SocketAddr,
    state: Arc<ApiState<P>>,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(%bind, "HTTP server listening");

    let handle = tokio::spawn(async move {
        let mut shutdown = shutdown_rx;
        if let Err(error) = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|v| *v).await;
            })
            .await
        {
            tracing::error!(%error, "HTTP server exited with error");
        }
    });

    Ok(handle)
}

pub(super) fn router<P: ChatPlatform>(state: Arc<ApiState<P>>) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health::<P>))
        .route("/invoke", post(invoke::<P>));

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health<P: ChatPlatform>(State(state): State<Arc<ApiState<P>>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}
