//! Capture event loop
//!
//! Owns the mode, the wedge decoder, the scanner binding and at most one
//! optical session. Everything reaches it through the command channel, so
//! state changes are serialized without locks.

use super::session::SessionHandle;
use super::worker::SubmitJob;
use super::{CaptureMode, CaptureOutput, CaptureSettings, CaptureSnapshot, Command, OpticalPhase};
use crate::domain::ScannerBinding;
use crate::error::CaptureError;
use crate::infra::metrics::Metrics;
use crate::io::camera::{CaptureDevice, FrameDecode, FrameStream};
use crate::services::capture::wedge::{WedgeDecoder, WedgeKey};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type OpenResult = Result<Box<dyn FrameStream>, CaptureError>;

pub(crate) struct CaptureMultiplexer {
    settings: CaptureSettings,
    device: Arc<dyn CaptureDevice>,
    mode: CaptureMode,
    keystroke_listening: bool,
    decoder: WedgeDecoder,
    binding: ScannerBinding,
    /// Device open in flight
    opening: Option<JoinHandle<OpenResult>>,
    start_reply: Option<oneshot::Sender<Result<(), CaptureError>>>,
    /// Stops received while the device was opening
    pending_stops: Vec<oneshot::Sender<()>>,
    session: Option<SessionHandle>,
    /// Recognized codes waiting for room in the submission queue
    backlog: VecDeque<SubmitJob>,
    cmd_rx: mpsc::Receiver<Command>,
    submit_tx: mpsc::Sender<SubmitJob>,
    outputs_tx: mpsc::Sender<CaptureOutput>,
    metrics: Arc<Metrics>,
}

/// Resolves when the pending open settles; never resolves if none is pending
async fn settle(opening: &mut Option<JoinHandle<OpenResult>>) -> OpenResult {
    match opening {
        Some(handle) => match handle.await {
            Ok(result) => result,
            Err(e) => Err(CaptureError::DeviceUnavailable(e.to_string())),
        },
        None => std::future::pending().await,
    }
}

/// Next frame of the running session; never resolves without one
async fn next_frame(session: &mut Option<SessionHandle>) -> Option<FrameDecode> {
    match session {
        Some(session) => session.recv().await,
        None => std::future::pending().await,
    }
}

impl CaptureMultiplexer {
    pub(crate) fn new(
        settings: CaptureSettings,
        device: Arc<dyn CaptureDevice>,
        binding: ScannerBinding,
        cmd_rx: mpsc::Receiver<Command>,
        submit_tx: mpsc::Sender<SubmitJob>,
        outputs_tx: mpsc::Sender<CaptureOutput>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            decoder: WedgeDecoder::new(settings.keystroke_idle),
            settings,
            device,
            mode: CaptureMode::ListeningKeystroke,
            keystroke_listening: true,
            binding,
            opening: None,
            start_reply: None,
            pending_stops: Vec::new(),
            session: None,
            backlog: VecDeque::new(),
            cmd_rx,
            submit_tx,
            outputs_tx,
            metrics,
        }
    }

    pub(crate) async fn run(mut self) {
        let submit_tx = self.submit_tx.clone();
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(Command::Shutdown(reply)) => {
                            self.teardown().await;
                            let _ = reply.send(());
                            break;
                        }
                        Some(cmd) => self.handle_command(cmd).await,
                        None => {
                            self.teardown().await;
                            break;
                        }
                    }
                }
                opened = settle(&mut self.opening) => {
                    self.opening = None;
                    self.on_opened(opened).await;
                }
                frame = next_frame(&mut self.session) => {
                    self.on_frame(frame).await;
                }
                permit = submit_tx.reserve(), if !self.backlog.is_empty() => {
                    match permit {
                        Ok(permit) => {
                            if let Some(job) = self.backlog.pop_front() {
                                permit.send(job);
                            }
                        }
                        Err(_) => {
                            warn!(dropped = self.backlog.len(), "submission_worker_gone");
                            self.backlog.clear();
                        }
                    }
                }
            }
        }

        // Codes recognized before shutdown are still handed to the worker
        if !self.backlog.is_empty() {
            debug!(queued = self.backlog.len(), "submission_backlog_flush");
        }
        while let Some(job) = self.backlog.pop_front() {
            if self.submit_tx.send(job).await.is_err() {
                warn!(dropped = self.backlog.len() + 1, "submission_worker_gone");
                break;
            }
        }
        info!("capture_multiplexer_stopped");
    }

    /// Mode to return to when no optical session exists
    fn idle_mode(&self) -> CaptureMode {
        if self.keystroke_listening {
            CaptureMode::ListeningKeystroke
        } else {
            CaptureMode::Inactive
        }
    }

    fn set_mode(&mut self, mode: CaptureMode) {
        if self.mode != mode {
            debug!(from = ?self.mode, to = ?mode, "capture_mode_changed");
            self.mode = mode;
            self.decoder.reset();
        }
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::StartOptical(reply) => self.start_optical(reply),
            Command::StopOptical(reply) => self.stop_optical(reply).await,
            Command::Key(key, at) => self.on_key(key, at).await,
            Command::SelectBinding(binding) => {
                info!(
                    scanner_id = ?binding.scanner_id,
                    stage = ?binding.stage.as_ref().map(|s| s.as_str()),
                    location = ?binding.location,
                    "scanner_binding_selected"
                );
                self.binding = binding;
            }
            Command::SetKeystrokeListening(listening) => {
                self.keystroke_listening = listening;
                if !self.mode.is_optical() {
                    self.set_mode(self.idle_mode());
                }
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(CaptureSnapshot {
                    mode: self.mode,
                    binding: self.binding.clone(),
                    keystroke_listening: self.keystroke_listening,
                    wedge_buffer: self.decoder.buffer().to_string(),
                    pending_submissions: self.backlog.len(),
                });
            }
            // Handled by the loop
            Command::Shutdown(reply) => {
                let _ = reply.send(());
            }
        }
    }

    fn start_optical(&mut self, reply: oneshot::Sender<Result<(), CaptureError>>) {
        if self.mode.is_optical() {
            // The running session is left untouched
            let _ = reply.send(Err(CaptureError::AlreadyActive));
            return;
        }
        self.set_mode(CaptureMode::CapturingOptical(OpticalPhase::Starting));
        let device = self.device.clone();
        self.opening = Some(tokio::spawn(async move { device.open().await }));
        self.start_reply = Some(reply);
        debug!("capture_session_starting");
    }

    async fn on_opened(&mut self, opened: OpenResult) {
        let reply = self.start_reply.take();
        match opened {
            Ok(mut stream) if !self.pending_stops.is_empty() => {
                // Stop arrived while opening: release straight away
                self.set_mode(CaptureMode::CapturingOptical(OpticalPhase::Stopping));
                if let Err(e) = stream.release().await {
                    warn!(error = %e, "capture_device_release_failed");
                }
                if let Some(reply) = reply {
                    let _ = reply.send(Ok(()));
                }
                info!("capture_session_cancelled_during_start");
            }
            Ok(stream) => {
                self.session = Some(SessionHandle::spawn(stream, self.settings.frame_channel_capacity));
                self.set_mode(CaptureMode::CapturingOptical(OpticalPhase::Active));
                self.metrics.record_capture_started();
                info!("capture_session_started");
                if let Some(reply) = reply {
                    let _ = reply.send(Ok(()));
                }
                return;
            }
            Err(e) => {
                self.metrics.record_capture_fault();
                warn!(error = %e, "capture_session_start_failed");
                if let Some(reply) = reply {
                    let _ = reply.send(Err(e));
                }
            }
        }
        self.set_mode(self.idle_mode());
        for stop in self.pending_stops.drain(..) {
            let _ = stop.send(());
        }
    }

    async fn stop_optical(&mut self, reply: oneshot::Sender<()>) {
        match self.mode {
            CaptureMode::CapturingOptical(OpticalPhase::Starting) => {
                debug!("capture_stop_queued");
                self.pending_stops.push(reply);
            }
            CaptureMode::CapturingOptical(_) => {
                if let Err(e) = self.close_session().await {
                    self.publish(CaptureOutput::SessionFault(e)).await;
                }
                info!("capture_session_stopped");
                let _ = reply.send(());
            }
            // Nothing to stop
            _ => {
                let _ = reply.send(());
            }
        }
    }

    /// Close the running session and return to the idle mode.
    /// A failed release is logged here; the caller decides whether to publish it.
    async fn close_session(&mut self) -> Result<(), CaptureError> {
        self.set_mode(CaptureMode::CapturingOptical(OpticalPhase::Stopping));
        let closed = match self.session.take() {
            Some(session) => session.close().await,
            None => Ok(()),
        };
        if let Err(e) = &closed {
            warn!(error = %e, "capture_session_close_failed");
        }
        self.set_mode(self.idle_mode());
        closed
    }

    async fn on_frame(&mut self, frame: Option<FrameDecode>) {
        match frame {
            Some(FrameDecode::Decoded(code)) => {
                self.metrics.record_frame(true);
                self.emit(code);
            }
            Some(FrameDecode::Unreadable) => self.metrics.record_frame(false),
            Some(FrameDecode::Fault(e)) => self.on_session_fault(e).await,
            // Task ended without reporting a fault
            None => self.on_session_fault(CaptureError::DeviceLost).await,
        }
    }

    async fn on_session_fault(&mut self, error: CaptureError) {
        self.metrics.record_capture_fault();
        warn!(error = %error, "capture_session_fault");
        // Only the original fault is published
        let _ = self.close_session().await;
        self.publish(CaptureOutput::SessionFault(error)).await;
    }

    async fn on_key(&mut self, key: WedgeKey, at: Instant) {
        self.metrics.record_key();
        if self.mode != CaptureMode::ListeningKeystroke {
            return;
        }
        let step = self.decoder.push(key, at);
        if step.discarded {
            self.metrics.record_wedge_discard();
            debug!("wedge_buffer_discarded");
        }
        if let Some(code) = step.code {
            self.emit(code);
        }
    }

    /// Queue a recognized code for submission with the current binding.
    /// Never waits on the worker; the run loop feeds it from the backlog.
    fn emit(&mut self, code: String) {
        self.metrics.record_code_recognized();
        debug!(code = %code, mode = ?self.mode, queued = self.backlog.len(), "code_recognized");
        let job = SubmitJob { code, binding: self.binding.clone(), enqueued_at: Instant::now() };
        self.backlog.push_back(job);
    }

    async fn publish(&self, output: CaptureOutput) {
        if self.outputs_tx.send(output).await.is_err() {
            debug!("capture_output_receiver_dropped");
        }
    }

    async fn teardown(&mut self) {
        if let Some(handle) = self.opening.take() {
            let opened = match handle.await {
                Ok(result) => result,
                Err(e) => Err(CaptureError::DeviceUnavailable(e.to_string())),
            };
            if let Ok(mut stream) = opened {
                if let Err(e) = stream.release().await {
                    warn!(error = %e, "capture_device_release_failed");
                }
            }
            if let Some(reply) = self.start_reply.take() {
                let _ = reply.send(Err(CaptureError::Closed));
            }
            for stop in self.pending_stops.drain(..) {
                let _ = stop.send(());
            }
        }
        if self.session.is_some() {
            if let Err(e) = self.close_session().await {
                self.publish(CaptureOutput::SessionFault(e)).await;
            }
        }
        self.set_mode(CaptureMode::Inactive);
    }
}
