use std::{io, path::Path};

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use crate::{
    config::MANIFEST_NAME,
    handler::{ApiJsonResult, AppState},
    media::types::CameraId,
};

pub fn info_router() -> Router<AppState> {
    Router::new().route("/info", get(info))
}

#[derive(Debug, Serialize)]
struct InfoResponse {
    cameras: Vec<CameraId>,
    past_recordings: Vec<String>,
    converting: Vec<CameraId>,
    converted_files: Vec<String>,
    throughput: u64,
}

async fn info(State(state): State<AppState>) -> ApiJsonResult<InfoResponse> {
    let cameras = state.registry.list().await;
    let converting = state.jobs.in_progress();

    let mut past_recordings = Vec::new();
    for name in dir_entries(&state.config.record_root, true).await? {
        if cameras.iter().any(|id| id.as_str() == name) {
            continue;
        }
        let manifest = state.config.record_root.join(&name).join(MANIFEST_NAME);
        if tokio::fs::try_exists(manifest).await.unwrap_or(false) {
            past_recordings.push(name);
        }
    }

    let pending: Vec<_> = converting
        .iter()
        .map(|id| state.config.converted_file(id))
        .collect();
    let converted_files = dir_entries(&state.config.converted_root, false)
        .await?
        .into_iter()
        .filter(|name| {
            !pending
                .iter()
                .any(|path| path.file_name().is_some_and(|f| f == name.as_str()))
        })
        .collect();

    Ok(Json(InfoResponse {
        cameras,
        past_recordings,
        converting,
        converted_files,
        throughput: *state.throughput.borrow(),
    }))
}

/// Sorted names of the directories (or regular files) directly under `root`.
/// A missing root lists as empty.
async fn dir_entries(root: &Path, dirs: bool) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(names),
        Err(e) => return Err(e),
    };
    while let Some(entry) = entries.next_entry().await? {
        let file_type = entry.file_type().await?;
        let wanted = if dirs { file_type.is_dir() } else { file_type.is_file() };
        if !wanted {
            continue;
        }
        if let Ok(name) = entry.file_name().into_string() {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}
