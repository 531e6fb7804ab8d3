use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
};

use crate::{
    error::{Error, Result},
    handler::{ApiResult, AppState},
    media::types::{CameraId, PipeState},
};

const CAMERA_ID_HEADER: &str = "camera-id";
// producers that never name themselves share one stream
const DEFAULT_CAMERA_ID: &str = "0";

pub fn upload_router() -> Router<AppState> {
    Router::new().route("/upload", post(upload_chunk).delete(end_stream))
}

fn camera_id(headers: &HeaderMap) -> Result<CameraId> {
    match headers.get(CAMERA_ID_HEADER) {
        None => CameraId::parse(DEFAULT_CAMERA_ID),
        Some(value) => {
            let raw = std::str::from_utf8(value.as_bytes()).map_err(|_| {
                Error::InvalidCameraId(String::from_utf8_lossy(value.as_bytes()).into_owned())
            })?;
            CameraId::parse(raw.trim())
        }
    }
}

async fn upload_chunk(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<StatusCode> {
    let id = camera_id(&headers)?;
    if body.is_empty() {
        return Err(Error::EmptyChunk.into());
    }

    let pipe = state.registry.get_or_create(&id).await?;
    match pipe.enqueue(body.clone()).await {
        // the pipeline died under us rather than being ended by the
        // producer: start over with a fresh one
        Err(Error::Rejected(_)) if pipe.state() != PipeState::Closing => {
            pipe.closed().await;
            log::info!("Upload {}: pipeline was abandoned, restarting", id);
            let pipe = state.registry.get_or_create(&id).await?;
            pipe.enqueue(body).await?;
        }
        result => result?,
    }
    Ok(StatusCode::OK)
}

async fn end_stream(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<StatusCode> {
    let id = camera_id(&headers)?;
    let pipe = state
        .registry
        .get(&id)
        .await
        .ok_or_else(|| Error::NotFound(format!("camera {}", id)))?;
    if !pipe.signal_end().await {
        log::debug!("Upload {}: end already signalled ({})", id, pipe.state());
    }
    Ok(StatusCode::OK)
}
