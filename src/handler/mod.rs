use std::sync::Arc;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tokio::sync::watch;

use crate::{config::ServerConfig, convert::ConversionJobs, error::Error, manager::StreamRegistry};

pub mod artifact;
pub mod convert;
pub mod info;
pub mod upload;

/// Shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub registry: StreamRegistry,
    pub jobs: ConversionJobs,
    /// Bytes ingested during the last telemetry interval.
    pub throughput: watch::Receiver<u64>,
}

impl AppState {
    pub fn new(
        registry: StreamRegistry,
        jobs: ConversionJobs,
        throughput: watch::Receiver<u64>,
    ) -> Self {
        Self {
            config: Arc::clone(registry.config()),
            registry,
            jobs,
            throughput,
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
pub type ApiJsonResult<T> = ApiResult<Json<T>>;

pub struct ApiError(anyhow::Error);

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0.downcast_ref::<Error>() {
            Some(Error::EmptyChunk | Error::InvalidCameraId(_) | Error::InvalidFileName(_)) => {
                StatusCode::BAD_REQUEST
            }
            Some(Error::NotFound(_)) => StatusCode::NOT_FOUND,
            Some(Error::Conflict(_) | Error::Rejected(_)) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("ApiError: {:?}", self.0);
        } else {
            log::debug!("ApiError: {} {}", status, self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
