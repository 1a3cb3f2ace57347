//! Journey status lookup
//!
//! Prefers the journey state the ledger derives itself. When that is missing
//! or carries values this build does not understand, the state is projected
//! locally from the returned history.

use crate::domain::{project_now, BagRecord, DwellPolicy, JourneyState, ScanEvent, StageCatalog};
use crate::error::{SubmitResult, ValidationError};
use crate::io::ledger::LedgerTransport;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where a reported journey state came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JourneySource {
    Ledger,
    Local,
}

impl JourneySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            JourneySource::Ledger => "ledger",
            JourneySource::Local => "local",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JourneyReport {
    pub bag: BagRecord,
    /// Raw history as returned, unrecognized stages included
    pub history: Vec<ScanEvent>,
    pub state: JourneyState,
    pub source: JourneySource,
}

pub struct JourneyStatusService {
    ledger: Arc<dyn LedgerTransport>,
    policy: DwellPolicy,
    /// Catalog fetched from the ledger; the built-in fallback is never stored
    catalog: Mutex<Option<StageCatalog>>,
}

impl JourneyStatusService {
    pub fn new(ledger: Arc<dyn LedgerTransport>, policy: DwellPolicy) -> Self {
        Self { ledger, policy, catalog: Mutex::new(None) }
    }

    /// Stage catalog from the ledger, or the built-in one if it can't be fetched
    pub async fn catalog(&self) -> StageCatalog {
        if let Some(catalog) = self.catalog.lock().clone() {
            return catalog;
        }
        match self.ledger.list_stages().await {
            Ok(stages) if !stages.is_empty() => {
                let catalog = StageCatalog::new(stages);
                debug!(stages = catalog.stages().len(), "stage_catalog_loaded");
                *self.catalog.lock() = Some(catalog.clone());
                catalog
            }
            Ok(_) => {
                warn!("stage_catalog_empty");
                StageCatalog::default()
            }
            Err(e) => {
                warn!(error = %e, "stage_catalog_fallback");
                StageCatalog::default()
            }
        }
    }

    pub async fn status(&self, bag_id: &str) -> SubmitResult<JourneyReport> {
        let bag_id = bag_id.trim();
        if bag_id.is_empty() {
            return Err(ValidationError::EmptyItemId.into());
        }
        let response = self.ledger.get_journey(bag_id).await?;

        let remote = response.operational_state.as_ref().and_then(|remote| {
            let state = remote.interpret();
            if state.is_none() {
                warn!(bag_id = %bag_id, status = %remote.operational_status, "remote_journey_state_uninterpretable");
            }
            state
        });

        let (state, source) = match remote {
            Some(state) => (state, JourneySource::Ledger),
            None => {
                let catalog = self.catalog().await;
                (project_now(&response.history, &catalog, &self.policy), JourneySource::Local)
            }
        };

        info!(
            bag_id = %bag_id,
            status = %state.operational_status.as_str(),
            risk = ?state.risk_level,
            events = response.history.len(),
            source = %source.as_str(),
            "journey_status"
        );

        Ok(JourneyReport { bag: response.bag, history: response.history, state, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CheckpointStage, OperationalStatus, RiskLevel, ScannerBinding};
    use crate::error::{SubmitError, TransportError};
    use crate::infra::metrics::Metrics;
    use crate::io::fake_ledger::FakeLedger;
    use crate::io::ledger::RemoteJourneyState;
    use crate::services::pipeline::ScanSubmissionPipeline;

    fn service(ledger: &Arc<FakeLedger>) -> JourneyStatusService {
        JourneyStatusService::new(ledger.clone(), DwellPolicy::default())
    }

    async fn scan(ledger: &Arc<FakeLedger>, bag_id: &str, stage: CheckpointStage) {
        let pipeline = ScanSubmissionPipeline::new(ledger.clone(), Arc::new(Metrics::new()));
        pipeline.submit_one(bag_id, &ScannerBinding::unbound().with_stage(stage)).await.unwrap();
    }

    fn remote(status: &str, risk: &str) -> RemoteJourneyState {
        RemoteJourneyState {
            completed_stages: vec![CheckpointStage::CheckIn],
            current_stage: Some(CheckpointStage::SecurityCheck),
            expected_next_stage: Some(CheckpointStage::Transfer),
            operational_status: status.to_string(),
            status_label: "Delayed at SECURITY CHECK".to_string(),
            risk_level: risk.to_string(),
            time_since_last_scan_minutes: Some(25.0),
            is_delayed: true,
            is_terminal: false,
        }
    }

    #[tokio::test]
    async fn test_unscanned_bag_is_not_checked_in() {
        let ledger = Arc::new(FakeLedger::with_bags(&["bag-1"]));
        let report = service(&ledger).status("bag-1").await.unwrap();

        assert_eq!(report.source, JourneySource::Local);
        assert_eq!(report.state.status_label, "Not Yet Checked In");
        assert_eq!(report.state.expected_next_stage, Some(CheckpointStage::CheckIn));
        assert_eq!(report.state.risk_level, None);
    }

    #[tokio::test]
    async fn test_local_projection_from_history() {
        let ledger = Arc::new(FakeLedger::with_bags(&["bag-1"]));
        scan(&ledger, "bag-1", CheckpointStage::CheckIn).await;
        scan(&ledger, "bag-1", CheckpointStage::SecurityCheck).await;

        let report = service(&ledger).status("bag-1").await.unwrap();
        assert_eq!(report.source, JourneySource::Local);
        assert_eq!(report.history.len(), 2);
        assert_eq!(report.state.completed_stages, vec![CheckpointStage::CheckIn]);
        assert_eq!(report.state.current_stage, Some(CheckpointStage::SecurityCheck));
        assert_eq!(report.state.expected_next_stage, Some(CheckpointStage::Transfer));
        assert_eq!(report.state.operational_status, OperationalStatus::OnTrack);
    }

    #[tokio::test]
    async fn test_ledger_state_preferred_when_interpretable() {
        let ledger = Arc::new(FakeLedger::with_bags(&["bag-1"]));
        scan(&ledger, "bag-1", CheckpointStage::CheckIn).await;
        ledger.set_remote_state("bag-1", remote("DELAYED", "MEDIUM"));

        let report = service(&ledger).status("bag-1").await.unwrap();
        assert_eq!(report.source, JourneySource::Ledger);
        assert_eq!(report.state.operational_status, OperationalStatus::Delayed);
        assert_eq!(report.state.risk_level, Some(RiskLevel::Medium));
        assert_eq!(report.state.status_label, "Delayed at SECURITY CHECK");
    }

    #[tokio::test]
    async fn test_unknown_ledger_status_falls_back_to_local() {
        let ledger = Arc::new(FakeLedger::with_bags(&["bag-1"]));
        scan(&ledger, "bag-1", CheckpointStage::CheckIn).await;
        ledger.set_remote_state("bag-1", remote("HOLDING_PATTERN", "MEDIUM"));

        let report = service(&ledger).status("bag-1").await.unwrap();
        assert_eq!(report.source, JourneySource::Local);
        assert_eq!(report.state.current_stage, Some(CheckpointStage::CheckIn));
    }

    #[tokio::test]
    async fn test_catalog_fallback_is_not_cached() {
        let ledger = Arc::new(FakeLedger::new());
        ledger.set_stages_unavailable(true);
        let service = service(&ledger);

        assert_eq!(service.catalog().await, StageCatalog::default());
        assert!(service.catalog.lock().is_none());

        ledger.set_stages_unavailable(false);
        service.catalog().await;
        assert!(service.catalog.lock().is_some());
    }

    #[tokio::test]
    async fn test_unknown_bag_surfaces_transport_message() {
        let ledger = Arc::new(FakeLedger::new());
        let err = service(&ledger).status("ghost").await.unwrap_err();
        assert!(matches!(err, SubmitError::Transport(TransportError::Status { status: 404, .. })));
        assert_eq!(err.to_string(), r#"404 Not Found - {"detail":"Bag not found"}"#);
    }

    #[tokio::test]
    async fn test_blank_id_rejected_before_network() {
        let ledger = Arc::new(FakeLedger::new());
        ledger.set_offline(true);
        let err = service(&ledger).status("  ").await.unwrap_err();
        assert_eq!(err, SubmitError::Validation(ValidationError::EmptyItemId));
    }
}
