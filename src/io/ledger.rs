//! Ledger transport - the remote record store behind the network boundary
//!
//! `LedgerTransport` is the seam the pipeline and services depend on;
//! `HttpLedger` speaks the ledger's HTTP/JSON API over reqwest.

use crate::domain::{
    BagRecord, BagRegistration, CheckpointStage, JourneyState, OperationalStatus, RiskLevel,
    ScanEvent, Scanner, ScannerRegistration,
};
use crate::error::TransportError;
use async_trait::async_trait;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// One scan to record
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanRequest {
    pub bag_id: String,
    /// `None` lets the ledger resolve the stage from the scanner
    #[serde(rename = "checkpoint")]
    pub stage: Option<CheckpointStage>,
    pub location: Option<String>,
    #[serde(rename = "status_note")]
    pub note: Option<String>,
    pub scanner_id: Option<String>,
}

/// Several bags recorded at the same stage in one request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchRequest {
    pub bag_ids: Vec<String>,
    pub stage: Option<CheckpointStage>,
    pub location: Option<String>,
    pub scanner_id: Option<String>,
}

/// Journey state as derived by the ledger itself.
///
/// Kept in wire form; `interpret` decides whether it can be trusted as-is.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteJourneyState {
    #[serde(default)]
    pub completed_stages: Vec<CheckpointStage>,
    #[serde(default)]
    pub current_stage: Option<CheckpointStage>,
    #[serde(default)]
    pub expected_next_stage: Option<CheckpointStage>,
    pub operational_status: String,
    pub status_label: String,
    pub risk_level: String,
    #[serde(default)]
    pub time_since_last_scan_minutes: Option<f64>,
    #[serde(default)]
    pub is_delayed: bool,
    #[serde(default)]
    pub is_terminal: bool,
}

impl RemoteJourneyState {
    /// Convert only when every field maps onto a known value
    pub fn interpret(&self) -> Option<JourneyState> {
        let operational_status = OperationalStatus::parse(&self.operational_status)?;
        // No current stage means no risk, whatever label the ledger attached
        let risk_level = match &self.current_stage {
            Some(_) => Some(RiskLevel::parse(&self.risk_level)?),
            None => None,
        };
        let stages_known = self
            .completed_stages
            .iter()
            .chain(self.expected_next_stage.iter())
            .all(|s| s.is_recognized());
        if !stages_known {
            return None;
        }
        Some(JourneyState {
            completed_stages: self.completed_stages.clone(),
            current_stage: self.current_stage.clone(),
            expected_next_stage: self.expected_next_stage.clone(),
            is_terminal: self.is_terminal,
            operational_status,
            status_label: self.status_label.clone(),
            risk_level,
            minutes_since_last_scan: self.time_since_last_scan_minutes.map(|m| m.max(0.0)),
            is_delayed: self.is_delayed,
        })
    }
}

/// Reply of `getJourney`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JourneyResponse {
    pub bag: BagRecord,
    #[serde(default)]
    pub latest_checkpoint: Option<ScanEvent>,
    #[serde(default)]
    pub history: Vec<ScanEvent>,
    #[serde(default)]
    pub next_stage: Option<CheckpointStage>,
    #[serde(default)]
    pub operational_state: Option<RemoteJourneyState>,
}

#[async_trait]
pub trait LedgerTransport: Send + Sync {
    async fn submit_scan(&self, request: &ScanRequest) -> Result<ScanEvent, TransportError>;

    /// Returns the events the ledger accepted; may be a subset of the request
    async fn submit_batch(&self, request: &BatchRequest) -> Result<Vec<ScanEvent>, TransportError>;

    async fn get_journey(&self, bag_id: &str) -> Result<JourneyResponse, TransportError>;

    async fn list_scanners(&self, active_only: bool) -> Result<Vec<Scanner>, TransportError>;

    async fn get_scanner(&self, scanner_id: &str) -> Result<Scanner, TransportError>;

    async fn register_scanner(
        &self,
        registration: &ScannerRegistration,
    ) -> Result<Scanner, TransportError>;

    async fn list_stages(&self) -> Result<Vec<CheckpointStage>, TransportError>;

    async fn register_bag(&self, registration: &BagRegistration) -> Result<BagRecord, TransportError>;
}

pub struct HttpLedger {
    base_url: Url,
    client: reqwest::Client,
}

impl HttpLedger {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| TransportError::Unreachable(format!("invalid ledger url {}: {}", base_url, e)))?;
        // Create HTTP client once for reuse (connection pooling)
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Unreachable(e.to_string()))?;
        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, TransportError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| TransportError::Unreachable(format!("invalid ledger url {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        operation: &'static str,
    ) -> Result<T, TransportError> {
        let response =
            request.send().await.map_err(|e| TransportError::Unreachable(e.to_string()))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| TransportError::Unreachable(e.to_string()))?;
        debug!(operation, status = %status.as_u16(), bytes = body.len(), "ledger_response");

        if !status.is_success() {
            return Err(TransportError::status(
                status.as_u16(),
                status.canonical_reason().unwrap_or(""),
                &body,
            ));
        }
        serde_json::from_str(&body).map_err(|e| TransportError::Decode(format!("{}: {}", operation, e)))
    }
}

/// Push `key=value` when the value is present
fn push_opt<'a>(query: &mut Vec<(&'static str, &'a str)>, key: &'static str, value: &'a Option<String>) {
    if let Some(v) = value {
        query.push((key, v.as_str()));
    }
}

#[async_trait]
impl LedgerTransport for HttpLedger {
    async fn submit_scan(&self, request: &ScanRequest) -> Result<ScanEvent, TransportError> {
        if request.stage.is_some() {
            let url = self.endpoint(&["scanCheckpoint"])?;
            return self.execute(self.client.post(url).json(request), "scan_checkpoint").await;
        }

        let mut query = vec![("bag_id", request.bag_id.as_str())];
        push_opt(&mut query, "scanner_id", &request.scanner_id);
        push_opt(&mut query, "location", &request.location);
        let url = self.endpoint(&["scan", "auto"])?;
        self.execute(self.client.post(url).query(&query), "scan_auto").await
    }

    async fn submit_batch(&self, request: &BatchRequest) -> Result<Vec<ScanEvent>, TransportError> {
        let mut query: Vec<(&'static str, &str)> =
            request.bag_ids.iter().map(|id| ("bag_ids", id.as_str())).collect();
        push_opt(&mut query, "scanner_id", &request.scanner_id);
        if let Some(stage) = &request.stage {
            query.push(("checkpoint", stage.as_str()));
        }
        push_opt(&mut query, "location", &request.location);
        let url = self.endpoint(&["scan", "batch"])?;
        self.execute(self.client.post(url).query(&query), "scan_batch").await
    }

    async fn get_journey(&self, bag_id: &str) -> Result<JourneyResponse, TransportError> {
        let url = self.endpoint(&["getStatus", bag_id])?;
        self.execute(self.client.get(url), "get_status").await
    }

    async fn list_scanners(&self, active_only: bool) -> Result<Vec<Scanner>, TransportError> {
        let url = self.endpoint(&["scanners"])?;
        let flag = if active_only { "true" } else { "false" };
        self.execute(self.client.get(url).query(&[("active_only", flag)]), "list_scanners").await
    }

    async fn get_scanner(&self, scanner_id: &str) -> Result<Scanner, TransportError> {
        let url = self.endpoint(&["scanners", scanner_id])?;
        self.execute(self.client.get(url), "get_scanner").await
    }

    async fn register_scanner(
        &self,
        registration: &ScannerRegistration,
    ) -> Result<Scanner, TransportError> {
        let url = self.endpoint(&["scanners"])?;
        self.execute(self.client.post(url).json(registration), "register_scanner").await
    }

    async fn list_stages(&self) -> Result<Vec<CheckpointStage>, TransportError> {
        let url = self.endpoint(&["checkpoints"])?;
        self.execute(self.client.get(url), "list_checkpoints").await
    }

    async fn register_bag(&self, registration: &BagRegistration) -> Result<BagRecord, TransportError> {
        let url = self.endpoint(&["registerBag"])?;
        self.execute(self.client.post(url).json(registration), "register_bag").await
    }
}
