//! Boundary traits for the media collaborator and artifact naming.
//!
//! The concrete encoder lives outside the crate; the engine only needs
//! "open a video stream", "append a frame", "finish and hand back the
//! artifact path" and "write one photo". Frames arrive already annotated
//! (timestamp overlay, motion contours), so implementations do not need
//! to touch pixel data beyond encoding.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::config::VideoCodec;
use crate::error::WriteError;
use crate::frame::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Photo,
    Video,
}

/// An open video stream. Appends are expected to be buffered and
/// non-blocking; a sink that can stall longer than a frame interval will
/// make the capture loop drop frames.
pub trait VideoSink: Send {
    fn append(&mut self, frame: &Frame) -> Result<(), WriteError>;

    /// Flushes and closes the stream, returning the artifact path.
    /// Consumes the sink so the file handle cannot outlive the event.
    fn finish(self: Box<Self>) -> Result<PathBuf, WriteError>;
}

pub trait MediaWriter: Send {
    fn start_video(
        &mut self,
        path: &Path,
        fps: f64,
        codec: VideoCodec,
    ) -> Result<Box<dyn VideoSink>, WriteError>;

    fn capture_photo(&mut self, frame: &Frame, path: &Path) -> Result<PathBuf, WriteError>;
}

/// Builds a timestamped artifact path, `2024-03-01_12-30-05_on_motion.mp4`
/// style, inside `dir`.
pub fn artifact_path(dir: &Path, label: &str, at: DateTime<Utc>, ext: &str) -> PathBuf {
    dir.join(format!(
        "{}_{}.{}",
        at.format("%Y-%m-%d_%H-%M-%S"),
        label,
        ext
    ))
}
