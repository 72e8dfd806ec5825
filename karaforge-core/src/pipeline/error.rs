use std::path::PathBuf;

use thiserror::Error;

use crate::error::ConfigError;
use crate::lock::LockError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("media acquisition failed: {0}")]
    Acquisition(String),
    #[error("audio separation failed: {0}")]
    Separation(String),
    #[error("lyrics processing failed: {0}")]
    Lyrics(String),
    #[error("render command failed (status {status:?}): {stderr}")]
    Render {
        status: Option<i32>,
        stderr: String,
    },
    #[error("distribution failed: {0}")]
    Distribution(String),
    #[error("lock error: {0}")]
    Lock(#[from] LockError),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            source,
            path: path.into(),
        }
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
