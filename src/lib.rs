use std::path::PathBuf;

pub mod evaluate;
pub mod intro;
pub mod source;
pub mod util;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("timeline data not found at: {0:?}")]
    TimelineDataNotFound(PathBuf),
    #[error("path does not exist: {0:?}")]
    PathNotFound(PathBuf),
    #[error("no video stream found in: {0:?}")]
    NoVideoStream(PathBuf),
    #[error("invalid detector configuration: {0}")]
    InvalidConfig(String),
    #[error("FFmpeg error: {0}")]
    FFmpegError(#[from] ffmpeg_next::Error),
    #[error("bincode error: {0}")]
    BincodeError(#[from] bincode::Error),
    #[error("serde_json error: {0}")]
    SerdeJSONError(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
