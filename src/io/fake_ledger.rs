//! In-memory ledger for unit tests
//!
//! Mimics the ledger's resolution rules: a scan without a stage takes the
//! scanner's stage, otherwise the stage after the bag's latest one.

use crate::domain::types::new_uuid_v7;
use crate::domain::{
    BagRecord, BagRegistration, CheckpointStage, ScanEvent, Scanner, ScannerRegistration,
    StageCatalog,
};
use crate::error::TransportError;
use crate::io::ledger::{
    BatchRequest, JourneyResponse, LedgerTransport, RemoteJourneyState, ScanRequest,
};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::time::Duration;

#[derive(Default)]
struct State {
    bags: Vec<BagRecord>,
    history: Vec<ScanEvent>,
    scanners: Vec<Scanner>,
    /// Every bag id submitted, in arrival order
    submitted: Vec<String>,
    batches: Vec<BatchRequest>,
    /// Ledger-derived journey state attached to `get_journey` replies
    remote_states: Vec<(String, RemoteJourneyState)>,
    offline: bool,
    stages_unavailable: bool,
    delay: Option<Duration>,
}

#[derive(Default)]
pub struct FakeLedger {
    state: Mutex<State>,
}

fn not_found(what: &str) -> TransportError {
    TransportError::status(404, "Not Found", &format!(r#"{{"detail":"{} not found"}}"#, what))
}

impl FakeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bags(ids: &[&str]) -> Self {
        let ledger = Self::new();
        for id in ids {
            ledger.add_bag(id, &format!("TAG-{}", id));
        }
        ledger
    }

    pub fn add_bag(&self, id: &str, tag: &str) {
        self.state.lock().bags.push(BagRecord {
            id: id.to_string(),
            tag_number: tag.to_string(),
            passenger_name: None,
            flight_number: None,
            origin: None,
            destination: None,
            registered_at: Some(Utc::now()),
        });
    }

    pub fn add_scanner(&self, id: &str, stage: CheckpointStage, active: bool) {
        self.state.lock().scanners.push(Scanner {
            id: id.to_string(),
            name: format!("Scanner {}", id),
            location: "Terminal 1".to_string(),
            stage,
            device_type: Default::default(),
            is_active: active,
            created_at: None,
        });
    }

    pub fn set_remote_state(&self, bag_id: &str, remote: RemoteJourneyState) {
        let mut state = self.state.lock();
        state.remote_states.retain(|(id, _)| id != bag_id);
        state.remote_states.push((bag_id.to_string(), remote));
    }

    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    pub fn set_stages_unavailable(&self, unavailable: bool) {
        self.state.lock().stages_unavailable = unavailable;
    }

    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().delay = Some(delay);
    }

    pub fn submitted(&self) -> Vec<String> {
        self.state.lock().submitted.clone()
    }

    pub fn batches(&self) -> Vec<BatchRequest> {
        self.state.lock().batches.clone()
    }

    pub fn history_of(&self, bag_id: &str) -> Vec<ScanEvent> {
        self.state.lock().history.iter().filter(|e| e.bag_id == bag_id).cloned().collect()
    }

    async fn gate(&self) -> Result<(), TransportError> {
        let (offline, delay) = {
            let state = self.state.lock();
            (state.offline, state.delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if offline {
            return Err(TransportError::Unreachable("connection refused".to_string()));
        }
        Ok(())
    }

    fn record(
        state: &mut State,
        bag_id: &str,
        stage: Option<CheckpointStage>,
        location: Option<String>,
        note: Option<String>,
        scanner_id: Option<String>,
    ) -> Result<ScanEvent, String> {
        if !state.bags.iter().any(|b| b.id == bag_id) {
            return Err(format!("Bag {} not found", bag_id));
        }
        let scanner = scanner_id
            .as_deref()
            .and_then(|id| state.scanners.iter().find(|s| s.id == id && s.is_active))
            .cloned();
        let stage = stage.or_else(|| scanner.as_ref().map(|s| s.stage.clone())).unwrap_or_else(|| {
            let catalog = StageCatalog::default();
            match state.history.iter().rev().find(|e| e.bag_id == bag_id) {
                Some(latest) => catalog
                    .successors(&latest.stage)
                    .first()
                    .cloned()
                    .unwrap_or_else(|| latest.stage.clone()),
                None => CheckpointStage::CheckIn,
            }
        });
        let event = ScanEvent {
            id: new_uuid_v7(),
            bag_id: bag_id.to_string(),
            stage,
            location: location.or_else(|| scanner.map(|s| s.location)),
            note,
            scanned_at: Utc::now(),
            scanner_id,
        };
        state.submitted.push(bag_id.to_string());
        state.history.push(event.clone());
        Ok(event)
    }
}

#[async_trait]
impl LedgerTransport for FakeLedger {
    async fn submit_scan(&self, request: &ScanRequest) -> Result<ScanEvent, TransportError> {
        self.gate().await?;
        let mut state = self.state.lock();
        Self::record(
            &mut state,
            &request.bag_id,
            request.stage.clone(),
            request.location.clone(),
            request.note.clone(),
            request.scanner_id.clone(),
        )
        .map_err(|_| not_found("Bag"))
    }

    async fn submit_batch(&self, request: &BatchRequest) -> Result<Vec<ScanEvent>, TransportError> {
        self.gate().await?;
        let mut state = self.state.lock();
        state.batches.push(request.clone());
        let mut accepted = Vec::new();
        let mut errors = Vec::new();
        for bag_id in &request.bag_ids {
            match Self::record(
                &mut state,
                bag_id,
                request.stage.clone(),
                request.location.clone(),
                None,
                request.scanner_id.clone(),
            ) {
                Ok(event) => accepted.push(event),
                Err(e) => errors.push(e),
            }
        }
        if accepted.is_empty() && !errors.is_empty() {
            let body = format!(r#"{{"detail":"{}"}}"#, errors.join("; "));
            return Err(TransportError::status(400, "Bad Request", &body));
        }
        Ok(accepted)
    }

    async fn get_journey(&self, bag_id: &str) -> Result<JourneyResponse, TransportError> {
        self.gate().await?;
        let state = self.state.lock();
        let bag = state.bags.iter().find(|b| b.id == bag_id).cloned().ok_or_else(|| not_found("Bag"))?;
        let history: Vec<ScanEvent> =
            state.history.iter().filter(|e| e.bag_id == bag_id).cloned().collect();
        Ok(JourneyResponse {
            bag,
            latest_checkpoint: history.last().cloned(),
            history,
            next_stage: None,
            operational_state: state
                .remote_states
                .iter()
                .find(|(id, _)| id == bag_id)
                .map(|(_, remote)| remote.clone()),
        })
    }

    async fn list_scanners(&self, active_only: bool) -> Result<Vec<Scanner>, TransportError> {
        self.gate().await?;
        let state = self.state.lock();
        Ok(state.scanners.iter().filter(|s| !active_only || s.is_active).cloned().collect())
    }

    async fn get_scanner(&self, scanner_id: &str) -> Result<Scanner, TransportError> {
        self.gate().await?;
        let state = self.state.lock();
        state.scanners.iter().find(|s| s.id == scanner_id).cloned().ok_or_else(|| not_found("Scanner"))
    }

    async fn register_scanner(
        &self,
        registration: &ScannerRegistration,
    ) -> Result<Scanner, TransportError> {
        self.gate().await?;
        let scanner = Scanner {
            id: new_uuid_v7(),
            name: registration.name.clone(),
            location: registration.location.clone(),
            stage: registration.stage.clone(),
            device_type: registration.device_type,
            is_active: true,
            created_at: Some(Utc::now()),
        };
        self.state.lock().scanners.push(scanner.clone());
        Ok(scanner)
    }

    async fn list_stages(&self) -> Result<Vec<CheckpointStage>, TransportError> {
        self.gate().await?;
        if self.state.lock().stages_unavailable {
            return Err(TransportError::status(503, "Service Unavailable", ""));
        }
        Ok(StageCatalog::default().stages().to_vec())
    }

    async fn register_bag(&self, registration: &BagRegistration) -> Result<BagRecord, TransportError> {
        self.gate().await?;
        let bag = BagRecord {
            id: new_uuid_v7(),
            tag_number: registration.tag_number.clone(),
            passenger_name: registration.passenger_name.clone(),
            flight_number: registration.flight_number.clone(),
            origin: registration.origin.clone(),
            destination: registration.destination.clone(),
            registered_at: Some(Utc::now()),
        };
        self.state.lock().bags.push(bag.clone());
        Ok(bag)
    }
}
