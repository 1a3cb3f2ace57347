//! Submission worker - forwards recognized codes off the event loop
//!
//! This worker decouples network submission from capture so a slow ledger
//! never delays keystroke or frame handling. The event loop enqueues codes
//! via an mpsc channel; the worker submits them one at a time, in order.

use super::CaptureOutput;
use crate::domain::{CachedReference, ScannerBinding};
use crate::services::pipeline::ScanSubmissionPipeline;
use crate::services::reference_cache::SharedReferenceCache;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A recognized code waiting to be submitted
#[derive(Debug)]
pub(crate) struct SubmitJob {
    pub code: String,
    /// Binding in effect when the code was recognized
    pub binding: ScannerBinding,
    /// When the job was enqueued (for queue delay measurement)
    pub enqueued_at: Instant,
}

pub(crate) struct SubmissionWorker {
    pipeline: Arc<ScanSubmissionPipeline>,
    cache: SharedReferenceCache,
    job_rx: mpsc::Receiver<SubmitJob>,
    outputs_tx: mpsc::Sender<CaptureOutput>,
}

impl SubmissionWorker {
    /// Run the worker, processing jobs until the channel closes
    pub(crate) async fn run(mut self) {
        info!("submission_worker_started");

        while let Some(job) = self.job_rx.recv().await {
            let queue_delay_ms = job.enqueued_at.elapsed().as_millis() as u64;

            // A printed tag label resolves to the bag id it was registered under
            let reference = self
                .cache
                .lock()
                .resolve(&job.code)
                .unwrap_or_else(|| CachedReference::new(&job.code));
            if reference.id != job.code {
                debug!(code = %job.code, bag_id = %reference.id, "code_resolved_from_cache");
            }

            let output = match self.pipeline.submit_one(&reference.id, &job.binding).await {
                Ok(receipt) => {
                    self.cache.lock().record_seen(reference);
                    CaptureOutput::Accepted { code: job.code, receipt }
                }
                Err(error) => CaptureOutput::Failed { code: job.code, error },
            };

            if queue_delay_ms > 1000 {
                warn!(queue_delay_ms = %queue_delay_ms, "submission_queue_delay_high");
            }

            if self.outputs_tx.send(output).await.is_err() {
                debug!("capture_output_receiver_dropped");
            }
        }

        info!("submission_worker_stopped");
    }
}

/// Create a job channel and worker
///
/// Returns the sender (for the event loop) and the worker (to be spawned)
pub(crate) fn create_submission_worker(
    pipeline: Arc<ScanSubmissionPipeline>,
    cache: SharedReferenceCache,
    outputs_tx: mpsc::Sender<CaptureOutput>,
    buffer_size: usize,
) -> (mpsc::Sender<SubmitJob>, SubmissionWorker) {
    let (job_tx, job_rx) = mpsc::channel(buffer_size);
    let worker = SubmissionWorker { pipeline, cache, job_rx, outputs_tx };
    (job_tx, worker)
}
