//! Optical capture devices
//!
//! A `CaptureDevice` opens into a `FrameStream` that yields one decode result
//! per frame. The stream owns the device until `release` is called.

use crate::error::CaptureError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Decode result for one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameDecode {
    Decoded(String),
    /// No code found in the frame
    Unreadable,
    /// The device or decode engine failed; the session cannot continue
    Fault(CaptureError),
}

#[async_trait]
pub trait CaptureDevice: Send + Sync {
    async fn open(&self) -> Result<Box<dyn FrameStream>, CaptureError>;
}

#[async_trait]
pub trait FrameStream: Send {
    /// Next frame; `None` once the device has stopped producing
    async fn next_frame(&mut self) -> Option<FrameDecode>;

    async fn release(&mut self) -> Result<(), CaptureError>;
}

/// Replays decodes from a text file, one frame per line, paced at the
/// configured frame interval.
///
/// Blank lines are unreadable frames; a line `!fault <message>` is a decode
/// engine failure. The end of the file behaves like an unplugged camera.
pub struct ReplayCamera {
    path: PathBuf,
    frame_interval: Duration,
}

impl ReplayCamera {
    pub fn new<P: AsRef<Path>>(path: P, frame_interval: Duration) -> Self {
        Self { path: path.as_ref().to_path_buf(), frame_interval }
    }
}

/// Stand-in when no camera is configured; every open fails
pub struct NoCamera;

#[async_trait]
impl CaptureDevice for NoCamera {
    async fn open(&self) -> Result<Box<dyn FrameStream>, CaptureError> {
        Err(CaptureError::DeviceUnavailable("no camera configured".to_string()))
    }
}

fn parse_frame(line: &str) -> FrameDecode {
    let line = line.trim();
    if line.is_empty() {
        FrameDecode::Unreadable
    } else if let Some(message) = line.strip_prefix("!fault") {
        FrameDecode::Fault(CaptureError::DecodeEngine(message.trim().to_string()))
    } else {
        FrameDecode::Decoded(line.to_string())
    }
}

#[async_trait]
impl CaptureDevice for ReplayCamera {
    async fn open(&self) -> Result<Box<dyn FrameStream>, CaptureError> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            let detail = format!("{}: {}", self.path.display(), e);
            match e.kind() {
                io::ErrorKind::PermissionDenied => CaptureError::PermissionDenied(detail),
                _ => CaptureError::DeviceUnavailable(detail),
            }
        })?;
        let frames: VecDeque<FrameDecode> = content.lines().map(parse_frame).collect();
        debug!(path = %self.path.display(), frames = frames.len(), "replay_camera_opened");
        Ok(Box::new(ReplayStream { frames, frame_interval: self.frame_interval, released: false }))
    }
}

struct ReplayStream {
    frames: VecDeque<FrameDecode>,
    frame_interval: Duration,
    released: bool,
}

#[async_trait]
impl FrameStream for ReplayStream {
    async fn next_frame(&mut self) -> Option<FrameDecode> {
        if self.released {
            return None;
        }
        tokio::time::sleep(self.frame_interval).await;
        self.frames.pop_front()
    }

    async fn release(&mut self) -> Result<(), CaptureError> {
        self.released = true;
        self.frames.clear();
        Ok(())
    }
}
