use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Chunk for a pipeline that is no longer accepting data.
    #[error("camera {0} is not accepting chunks")]
    Rejected(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("codec process failed: {0}")]
    ProcessFailure(String),

    #[error("invalid camera id {0:?}")]
    InvalidCameraId(String),

    #[error("invalid file name {0:?}")]
    InvalidFileName(String),

    #[error("empty chunk")]
    EmptyChunk,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
