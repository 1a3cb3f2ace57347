//! Scan submission pipeline
//!
//! Validates scan requests locally, forwards them to the ledger and turns
//! the replies into receipts. Holds no display state and keeps no memory of
//! earlier calls; dedup only happens inside one batch.

use crate::domain::{CheckpointStage, ScanEvent, ScannerBinding};
use crate::error::{SubmitResult, ValidationError};
use crate::infra::metrics::Metrics;
use crate::io::ledger::{BatchRequest, LedgerTransport, ScanRequest};
use rustc_hash::FxHashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// An accepted single scan
#[derive(Debug, Clone, PartialEq)]
pub struct ScanReceipt {
    pub event: ScanEvent,
}

/// Outcome of a batch the ledger answered
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReceipt {
    /// Normalized ids that were sent
    pub requested: Vec<String>,
    pub accepted: Vec<ScanEvent>,
    /// Requested ids with no accepted event, in request order
    pub rejected: Vec<String>,
}

impl BatchReceipt {
    pub fn accepted_count(&self) -> usize {
        self.accepted.len()
    }

    pub fn is_partial(&self) -> bool {
        !self.rejected.is_empty()
    }
}

/// Operator-entered scan with an explicit stage
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManualScan {
    pub bag_id: String,
    pub stage: Option<CheckpointStage>,
    pub location: Option<String>,
    pub note: Option<String>,
    pub scanner_id: Option<String>,
}

/// Trim, drop blanks and drop repeats, keeping first-seen order
pub fn normalize_batch<S: AsRef<str>>(ids: &[S]) -> Vec<String> {
    let mut seen = FxHashSet::default();
    ids.iter()
        .map(|id| id.as_ref().trim())
        .filter(|id| !id.is_empty())
        .filter(|id| seen.insert(id.to_string()))
        .map(str::to_string)
        .collect()
}

/// Split pasted text (one id per line, commas also accepted) into a batch
pub fn parse_batch_input(text: &str) -> Vec<String> {
    let parts: Vec<&str> = text.split(['\n', ',']).collect();
    normalize_batch(&parts)
}

fn blank_to_none(value: &Option<String>) -> Option<String> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

pub struct ScanSubmissionPipeline {
    ledger: Arc<dyn LedgerTransport>,
    metrics: Arc<Metrics>,
}

impl ScanSubmissionPipeline {
    pub fn new(ledger: Arc<dyn LedgerTransport>, metrics: Arc<Metrics>) -> Self {
        Self { ledger, metrics }
    }

    /// Submit one captured code with the scanner binding attached
    pub async fn submit_one(&self, item_id: &str, binding: &ScannerBinding) -> SubmitResult<ScanReceipt> {
        let bag_id = item_id.trim();
        if bag_id.is_empty() {
            return Err(ValidationError::EmptyItemId.into());
        }
        let request = ScanRequest {
            bag_id: bag_id.to_string(),
            stage: binding.stage.clone(),
            location: blank_to_none(&binding.location),
            note: None,
            scanner_id: blank_to_none(&binding.scanner_id),
        };
        self.send(request).await
    }

    /// Submit an operator-entered scan; the stage is required
    pub async fn submit_manual(&self, scan: &ManualScan) -> SubmitResult<ScanReceipt> {
        let bag_id = scan.bag_id.trim();
        if bag_id.is_empty() {
            return Err(ValidationError::EmptyItemId.into());
        }
        let Some(stage) = scan.stage.clone() else {
            return Err(ValidationError::MissingField("checkpoint").into());
        };
        let request = ScanRequest {
            bag_id: bag_id.to_string(),
            stage: Some(stage),
            location: blank_to_none(&scan.location),
            note: blank_to_none(&scan.note),
            scanner_id: blank_to_none(&scan.scanner_id),
        };
        self.send(request).await
    }

    async fn send(&self, request: ScanRequest) -> SubmitResult<ScanReceipt> {
        let start = Instant::now();
        let result = self.ledger.submit_scan(&request).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(event) => {
                self.metrics.record_scan(true, latency_ms);
                info!(
                    bag_id = %event.bag_id,
                    stage = %event.stage,
                    scanner_id = ?event.scanner_id,
                    latency_ms = %latency_ms,
                    "scan_submitted"
                );
                Ok(ScanReceipt { event })
            }
            Err(e) => {
                self.metrics.record_scan(false, latency_ms);
                warn!(bag_id = %request.bag_id, error = %e, latency_ms = %latency_ms, "scan_failed");
                Err(e.into())
            }
        }
    }

    /// Submit several ids as one request.
    ///
    /// A transport failure fails the whole batch; otherwise the receipt
    /// splits the normalized ids into accepted and rejected.
    pub async fn submit_batch<S: AsRef<str>>(
        &self,
        item_ids: &[S],
        binding: &ScannerBinding,
    ) -> SubmitResult<BatchReceipt> {
        let requested = normalize_batch(item_ids);
        if requested.is_empty() {
            return Err(ValidationError::EmptyBatch.into());
        }
        let request = BatchRequest {
            bag_ids: requested.clone(),
            stage: binding.stage.clone(),
            location: blank_to_none(&binding.location),
            scanner_id: blank_to_none(&binding.scanner_id),
        };

        let start = Instant::now();
        let result = self.ledger.submit_batch(&request).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        let accepted = match result {
            Ok(accepted) => accepted,
            Err(e) => {
                self.metrics.record_batch(0, requested.len() as u64, latency_ms);
                warn!(items = requested.len(), error = %e, latency_ms = %latency_ms, "batch_failed");
                return Err(e.into());
            }
        };

        let accepted_ids: FxHashSet<&str> = accepted.iter().map(|e| e.bag_id.as_str()).collect();
        let rejected: Vec<String> =
            requested.iter().filter(|id| !accepted_ids.contains(id.as_str())).cloned().collect();

        self.metrics.record_batch(accepted.len() as u64, rejected.len() as u64, latency_ms);
        info!(
            requested = requested.len(),
            accepted = accepted.len(),
            rejected = rejected.len(),
            latency_ms = %latency_ms,
            "batch_submitted"
        );
        if !rejected.is_empty() {
            warn!(rejected = ?rejected, "batch_partially_rejected");
        }

        Ok(BatchReceipt { requested, accepted, rejected })
    }
}
