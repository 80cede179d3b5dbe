//! Error taxonomy for the surveillance engine.
//!
//! Only `CaptureError` is allowed to terminate the capture loop; every
//! other error is absorbed at the component boundary where it occurs and
//! surfaced to the operator as a text notification plus a log entry.

use std::path::PathBuf;

use thiserror::Error;

/// Camera device failures. Fatal to the capture loop: the engine stops,
/// reports a text failure and returns the error to its supervisor.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("camera device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("camera read failed: {0}")]
    ReadFailed(String),

    #[error("camera disconnected")]
    Disconnected,
}

/// Media encode / disk failures. The current event is finalized as
/// failed and the engine resumes normal operation.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("media encode failed: {0}")]
    Encode(String),

    #[error("i/o error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("video codec {0:?} not available")]
    CodecUnavailable(String),
}

/// Chat transport failures. Logged, retried at most once, never
/// propagated back into the capture loop.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("delivery timed out")]
    Timeout,
}

/// Persisted configuration failures. A missing or corrupt file falls
/// back to defaults; a failed write is logged and ignored.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
