//! Optical capture task
//!
//! The opened stream lives inside its own task and only talks to the event
//! loop through a bounded frame channel. Dropping the receiver is the stop
//! signal; the task then releases the device and exits.

use crate::error::CaptureError;
use crate::io::camera::{FrameDecode, FrameStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Event-loop side of a running session
pub(crate) struct SessionHandle {
    frames_rx: mpsc::Receiver<FrameDecode>,
    task: JoinHandle<Result<(), CaptureError>>,
}

impl SessionHandle {
    pub(crate) fn spawn(stream: Box<dyn FrameStream>, capacity: usize) -> Self {
        let (frames_tx, frames_rx) = mpsc::channel(capacity.max(1));
        let task = tokio::spawn(run_capture(stream, frames_tx));
        Self { frames_rx, task }
    }

    pub(crate) async fn recv(&mut self) -> Option<FrameDecode> {
        self.frames_rx.recv().await
    }

    /// Close the frame channel and wait for the task to release the device
    pub(crate) async fn close(self) -> Result<(), CaptureError> {
        let Self { frames_rx, task } = self;
        drop(frames_rx);
        match task.await {
            Ok(result) => result,
            Err(e) => Err(CaptureError::ReleaseFailed(e.to_string())),
        }
    }
}

async fn run_capture(
    mut stream: Box<dyn FrameStream>,
    frames_tx: mpsc::Sender<FrameDecode>,
) -> Result<(), CaptureError> {
    loop {
        tokio::select! {
            _ = frames_tx.closed() => break,
            frame = stream.next_frame() => {
                let frame = frame.unwrap_or(FrameDecode::Fault(CaptureError::DeviceLost));
                let fatal = matches!(frame, FrameDecode::Fault(_));
                if frames_tx.send(frame).await.is_err() || fatal {
                    break;
                }
            }
        }
    }

    // Always release, whatever ended the loop
    let released = stream.release().await;
    match &released {
        Ok(()) => debug!("capture_device_released"),
        Err(e) => warn!(error = %e, "capture_device_release_failed"),
    }
    released
}
