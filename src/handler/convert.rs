use std::convert::Infallible;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
};
use futures::{Stream, StreamExt};
use serde::Serialize;

use crate::{
    error::Error,
    handler::{ApiResult, AppState},
    media::types::CameraId,
};

pub fn convert_router() -> Router<AppState> {
    Router::new()
        .route("/convert/{camera_id}", post(start_conversion))
        .route("/convert-status/{camera_id}", get(conversion_status))
}

#[derive(Serialize)]
struct ConversionStarted {
    status: &'static str,
    camera_id: CameraId,
}

async fn start_conversion(
    State(state): State<AppState>,
    Path(camera_id): Path<String>,
) -> ApiResult<(StatusCode, Json<ConversionStarted>)> {
    let id = CameraId::parse(&camera_id)?;
    if state.registry.get(&id).await.is_some() {
        return Err(Error::Conflict(format!("camera {} is still recording", id)).into());
    }
    state.jobs.submit(&id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ConversionStarted {
            status: "started",
            camera_id: id,
        }),
    ))
}

async fn conversion_status(
    State(state): State<AppState>,
    Path(camera_id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let id = CameraId::parse(&camera_id)?;
    let events = state
        .jobs
        .status_stream(&id)
        .map(|job| Ok(Event::default().data(job.event_name())));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
