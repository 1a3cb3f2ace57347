//! Scan capture multiplexer
//!
//! Merges the keystroke-wedge channel and the optical session into one code
//! stream. A single task owns all capture state and is driven through a
//! `CaptureHandle`:
//! - `wedge` - burst detection on the keystroke channel
//! - `session` - the isolated task that owns an open camera
//! - `multiplexer` - the event loop and mode transitions
//! - `worker` - submits recognized codes in order, off the event loop

mod multiplexer;
mod session;
pub mod wedge;
mod worker;

use crate::domain::ScannerBinding;
use crate::error::{CaptureError, SubmitError};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::camera::CaptureDevice;
use crate::services::pipeline::{ScanReceipt, ScanSubmissionPipeline};
use crate::services::reference_cache::SharedReferenceCache;
use multiplexer::CaptureMultiplexer;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::info;
use worker::create_submission_worker;

pub use wedge::{WedgeDecoder, WedgeKey, WedgeStep};

/// Lifecycle of the optical session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpticalPhase {
    Starting,
    Active,
    Stopping,
}

/// What the multiplexer is listening to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    Inactive,
    ListeningKeystroke,
    CapturingOptical(OpticalPhase),
}

impl CaptureMode {
    pub fn is_optical(&self) -> bool {
        matches!(self, CaptureMode::CapturingOptical(_))
    }
}

/// Published for every recognized code and every session fault
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutput {
    Accepted { code: String, receipt: ScanReceipt },
    Failed { code: String, error: SubmitError },
    SessionFault(CaptureError),
}

/// Point-in-time view of the multiplexer
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSnapshot {
    pub mode: CaptureMode,
    pub binding: ScannerBinding,
    pub keystroke_listening: bool,
    pub wedge_buffer: String,
    /// Recognized codes not yet handed to the submission worker
    pub pending_submissions: usize,
}

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub keystroke_idle: Duration,
    pub frame_channel_capacity: usize,
    pub submission_queue_capacity: usize,
}

impl CaptureSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            keystroke_idle: Duration::from_millis(config.keystroke_idle_ms()),
            frame_channel_capacity: config.frame_channel_capacity(),
            submission_queue_capacity: config.submission_queue_capacity(),
        }
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

pub(crate) enum Command {
    StartOptical(oneshot::Sender<Result<(), CaptureError>>),
    StopOptical(oneshot::Sender<()>),
    Key(WedgeKey, Instant),
    SelectBinding(ScannerBinding),
    SetKeystrokeListening(bool),
    Snapshot(oneshot::Sender<CaptureSnapshot>),
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable handle to the capture event loop
#[derive(Clone)]
pub struct CaptureHandle {
    cmd_tx: mpsc::Sender<Command>,
}

impl CaptureHandle {
    async fn send(&self, cmd: Command) -> Result<(), CaptureError> {
        self.cmd_tx.send(cmd).await.map_err(|_| CaptureError::Closed)
    }

    /// Open the camera and start decoding. Resolves once the device has
    /// opened or failed to.
    pub async fn start_optical(&self) -> Result<(), CaptureError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::StartOptical(tx)).await?;
        rx.await.map_err(|_| CaptureError::Closed)?
    }

    /// Stop the optical session. Resolves after the device is released;
    /// a no-op when no session exists.
    pub async fn stop_optical(&self) -> Result<(), CaptureError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::StopOptical(tx)).await?;
        rx.await.map_err(|_| CaptureError::Closed)
    }

    pub async fn key(&self, key: WedgeKey) -> Result<(), CaptureError> {
        self.key_at(key, Instant::now()).await
    }

    /// Feed a key with an explicit arrival time
    pub async fn key_at(&self, key: WedgeKey, at: Instant) -> Result<(), CaptureError> {
        self.send(Command::Key(key, at)).await
    }

    pub async fn select_binding(&self, binding: ScannerBinding) -> Result<(), CaptureError> {
        self.send(Command::SelectBinding(binding)).await
    }

    pub async fn set_keystroke_listening(&self, listening: bool) -> Result<(), CaptureError> {
        self.send(Command::SetKeystrokeListening(listening)).await
    }

    pub async fn snapshot(&self) -> Result<CaptureSnapshot, CaptureError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx)).await?;
        rx.await.map_err(|_| CaptureError::Closed)
    }

    /// Release any open session and stop the event loop
    pub async fn shutdown(&self) -> Result<(), CaptureError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Shutdown(tx)).await?;
        rx.await.map_err(|_| CaptureError::Closed)
    }
}

/// Running multiplexer: the handle, its output stream and the task handles.
///
/// `outputs` closes once both tasks have finished. After `shutdown`, draining
/// it to the end yields the outcome of every code recognized before the call.
pub struct CaptureService {
    pub handle: CaptureHandle,
    pub outputs: mpsc::Receiver<CaptureOutput>,
    pub event_loop: JoinHandle<()>,
    pub worker: JoinHandle<()>,
}

/// Spawn the event loop and the submission worker
pub fn spawn_capture(
    settings: CaptureSettings,
    device: Arc<dyn CaptureDevice>,
    pipeline: Arc<ScanSubmissionPipeline>,
    cache: SharedReferenceCache,
    metrics: Arc<Metrics>,
    binding: ScannerBinding,
) -> CaptureService {
    let queue = settings.submission_queue_capacity.max(1);
    let (outputs_tx, outputs) = mpsc::channel(queue);
    let (submit_tx, worker) = create_submission_worker(pipeline, cache, outputs_tx.clone(), queue);
    let (cmd_tx, cmd_rx) = mpsc::channel(64);

    info!(
        keystroke_idle_ms = %settings.keystroke_idle.as_millis(),
        scanner_id = ?binding.scanner_id,
        stage = ?binding.stage.as_ref().map(|s| s.as_str()),
        "capture_multiplexer_started"
    );

    let multiplexer =
        CaptureMultiplexer::new(settings, device, binding, cmd_rx, submit_tx, outputs_tx, metrics);
    let worker = tokio::spawn(worker.run());
    let event_loop = tokio::spawn(multiplexer.run());

    CaptureService { handle: CaptureHandle { cmd_tx }, outputs, event_loop, worker }
}
