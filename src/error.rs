use std::path::PathBuf;

use thiserror::Error;

use crate::models::PcmFormat;

/// Failures while reading or unpacking an audio stream.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Failed to read {path}: {source}")]
    Read { path: PathBuf, source: hound::Error },
    #[error("Sample error: {source}")]
    Sample { source: hound::Error },
    #[error("Failed to read audio stream: {0}")]
    Io(#[from] std::io::Error),
    #[error("PCM buffer of {len} bytes does not hold whole {bytes_per_sample}-byte samples")]
    Truncated { len: usize, bytes_per_sample: usize },
}

/// The stream decoded fine but is not something the pipeline accepts.
#[derive(Debug, Error)]
#[error("Unsupported audio format: found {found}, expected {expected}")]
pub struct UnsupportedFormat {
    pub found: PcmFormat,
    pub expected: String,
}

/// The hash index collaborator could not answer.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Hash index database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Hash index lock poisoned")]
    Poisoned,
    #[error("Hash index unavailable: {detail}")]
    Unavailable { detail: String },
    #[error("Unknown song id {0}")]
    UnknownSong(u32),
}

/// Umbrella error for pipeline and library operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    UnsupportedFormat(#[from] UnsupportedFormat),
    #[error("Index unavailable: {0}")]
    IndexUnavailable(#[from] IndexError),
    #[error("Invalid engine configuration: {detail}")]
    InvalidConfig { detail: String },
    #[error("Failed to serialize fingerprint: {0}")]
    Export(#[from] serde_json::Error),
}

impl EngineError {
    pub(crate) fn invalid_config(detail: impl Into<String>) -> Self {
        Self::InvalidConfig {
            detail: detail.into(),
        }
    }
}
