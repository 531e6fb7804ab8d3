use axum::{Router, extract::DefaultBodyLimit};
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::handler::{AppState, artifact, convert, info, upload};

pub fn app_router(state: AppState) -> Router {
    let body_limit = state.config.max_chunk_bytes;
    Router::new()
        .merge(upload::upload_router())
        .merge(info::info_router())
        .merge(convert::convert_router())
        .merge(artifact::artifact_router())
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Binds the listener up front so a bad address fails startup, then serves
/// until `cancel` fires.
pub(crate) async fn start_api_server(
    state: AppState,
    cancel: CancellationToken,
) -> anyhow::Result<JoinHandle<()>> {
    let bind = state.config.bind.clone();
    let listener = TcpListener::bind(&bind)
        .await
        .map_err(|e| anyhow::anyhow!("bind {}: {}", bind, e))?;
    log::info!("API server listening on {}", listener.local_addr()?);

    let app = app_router(state);
    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(cancel))
            .await
        {
            log::error!("API server failed: {}", e);
        }
    }))
}

async fn shutdown_signal(cancel: CancellationToken) {
    cancel.cancelled().await;
    log::info!("Shutting down API server...");
}

#[cfg(test)]
#[path = "api_test.rs"]
mod api_test;
