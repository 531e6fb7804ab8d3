use std::path::PathBuf;

use axum::{
    Router,
    body::Body,
    extract::{Path, State},
    http::{
        HeaderMap, HeaderValue,
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
    routing::get,
};
use tokio_util::io::ReaderStream;

use crate::{
    error::{Error, Result},
    handler::{ApiResult, AppState},
    media::types::{CameraId, is_safe_component},
};

pub fn artifact_router() -> Router<AppState> {
    Router::new()
        .route("/live/{camera_id}/{file}", get(live_artifact))
        .route("/download/{filename}", get(download))
}

fn file_name(raw: &str) -> Result<&str> {
    if is_safe_component(raw) {
        Ok(raw)
    } else {
        Err(Error::InvalidFileName(raw.to_string()))
    }
}

fn content_type(name: &str) -> String {
    match std::path::Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
    {
        Some("mpd") => "application/dash+xml".to_string(),
        Some("m4s") => "video/iso.segment".to_string(),
        _ => mime_guess::from_path(name)
            .first_or_octet_stream()
            .to_string(),
    }
}

async fn live_artifact(
    State(state): State<AppState>,
    Path((camera_id, file)): Path<(String, String)>,
) -> ApiResult<Response> {
    let id = CameraId::parse(&camera_id)?;
    let name = file_name(&file)?;
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_str(&content_type(name))?);
    Ok(stream_file(state.config.live_dir(&id).join(name), headers).await?)
}

async fn download(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> ApiResult<Response> {
    let name = file_name(&filename)?;
    let converting = state.jobs.in_progress().into_iter().any(|id| {
        state
            .config
            .converted_file(&id)
            .file_name()
            .is_some_and(|f| f == name)
    });
    if converting {
        return Err(Error::Conflict(format!("{} is still being converted", name)).into());
    }

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_str(&content_type(name))?);
    headers.insert(
        CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!("attachment; filename=\"{}\"", name))
            .map_err(|_| Error::InvalidFileName(name.to_string()))?,
    );
    Ok(stream_file(state.config.converted_root.join(name), headers).await?)
}

async fn stream_file(path: PathBuf, mut headers: HeaderMap) -> Result<Response> {
    let not_found = || Error::NotFound(path.display().to_string());
    let metadata = match tokio::fs::metadata(&path).await {
        Ok(metadata) if metadata.is_file() => metadata,
        Ok(_) => return Err(not_found()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
        Err(e) => return Err(e.into()),
    };
    let file = tokio::fs::File::open(&path).await?;
    headers.insert(CONTENT_LENGTH, HeaderValue::from(metadata.len()));
    Ok((headers, Body::from_stream(ReaderStream::new(file))).into_response())
}
