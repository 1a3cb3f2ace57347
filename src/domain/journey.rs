//! Journey-state projection from a bag's scan history
//!
//! `project` is a pure function: it never fails, never mutates the history,
//! and gives the same answer for the same events regardless of the order
//! they were handed in.

use crate::domain::stage::{CheckpointStage, StageCatalog};
use crate::domain::types::ScanEvent;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::collections::HashMap;

/// Risk assessment levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "LOW" => Some(RiskLevel::Low),
            "MEDIUM" => Some(RiskLevel::Medium),
            "HIGH" => Some(RiskLevel::High),
            _ => None,
        }
    }
}

/// High-level operational status; exactly one applies to a journey
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationalStatus {
    OnTrack,
    Delayed,
    AtRisk,
    Terminal,
    Completed,
}

impl OperationalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationalStatus::OnTrack => "ON_TRACK",
            OperationalStatus::Delayed => "DELAYED",
            OperationalStatus::AtRisk => "AT_RISK",
            OperationalStatus::Terminal => "TERMINAL",
            OperationalStatus::Completed => "COMPLETED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ON_TRACK" => Some(OperationalStatus::OnTrack),
            "DELAYED" => Some(OperationalStatus::Delayed),
            "AT_RISK" => Some(OperationalStatus::AtRisk),
            "TERMINAL" => Some(OperationalStatus::Terminal),
            "COMPLETED" => Some(OperationalStatus::Completed),
            _ => None,
        }
    }

    /// Human-readable label, similar to what passengers see in airline apps
    pub fn label(&self, current: Option<&CheckpointStage>) -> String {
        let Some(stage) = current else {
            return "Not Yet Checked In".to_string();
        };
        let name = stage.display_name();
        match self {
            OperationalStatus::OnTrack => format!("On Track - {}", name),
            OperationalStatus::Delayed => format!("Delayed at {}", name),
            OperationalStatus::AtRisk => format!("At Risk - {}", name),
            OperationalStatus::Completed => "Journey Completed".to_string(),
            OperationalStatus::Terminal => name,
        }
    }
}

/// Derived summary of a bag's progress. Recomputed on every status request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JourneyState {
    /// Ordered stages already passed, in catalog order
    pub completed_stages: Vec<CheckpointStage>,
    pub current_stage: Option<CheckpointStage>,
    pub expected_next_stage: Option<CheckpointStage>,
    pub is_terminal: bool,
    pub operational_status: OperationalStatus,
    pub status_label: String,
    /// `None` only for an empty history
    pub risk_level: Option<RiskLevel>,
    #[serde(rename = "time_since_last_scan_minutes")]
    pub minutes_since_last_scan: Option<f64>,
    pub is_delayed: bool,
}

impl JourneyState {
    /// State of a bag that has never been scanned
    pub fn not_checked_in(catalog: &StageCatalog) -> Self {
        let status = OperationalStatus::OnTrack;
        Self {
            completed_stages: Vec::new(),
            current_stage: None,
            expected_next_stage: catalog.first().cloned(),
            is_terminal: false,
            operational_status: status,
            status_label: status.label(None),
            risk_level: None,
            minutes_since_last_scan: None,
            is_delayed: false,
        }
    }
}

/// Per-stage expected dwell thresholds (minutes).
///
/// Dwell beyond the threshold is MEDIUM risk, beyond twice the threshold is
/// HIGH. Stages without a threshold never raise risk through dwell.
#[derive(Debug, Clone, PartialEq)]
pub struct DwellPolicy {
    thresholds: FxHashMap<CheckpointStage, f64>,
}

impl Default for DwellPolicy {
    fn default() -> Self {
        let thresholds = [
            (CheckpointStage::CheckIn, 10.0),
            (CheckpointStage::SecurityCheck, 20.0),
            (CheckpointStage::Transfer, 30.0),
            (CheckpointStage::Loading, 10.0),
            (CheckpointStage::LoadedOntoAircraft, 60.0),
            (CheckpointStage::InTransit, 180.0),
            (CheckpointStage::Unloading, 20.0),
            (CheckpointStage::Arrival, 60.0),
        ]
        .into_iter()
        .collect();
        Self { thresholds }
    }
}

impl DwellPolicy {
    /// Policy with no thresholds at all (dwell never raises risk)
    pub fn none() -> Self {
        Self { thresholds: FxHashMap::default() }
    }

    /// Default thresholds with per-stage overrides keyed by wire token.
    /// Unknown and exception tokens are ignored.
    pub fn with_overrides(overrides: &HashMap<String, u64>) -> Self {
        let mut policy = Self::default();
        for (token, minutes) in overrides {
            if let Ok(stage) = token.parse::<CheckpointStage>() {
                if stage.is_ordered() {
                    policy.thresholds.insert(stage, *minutes as f64);
                }
            }
        }
        policy
    }

    pub fn with_threshold(mut self, stage: CheckpointStage, minutes: f64) -> Self {
        self.thresholds.insert(stage, minutes);
        self
    }

    pub fn threshold(&self, stage: &CheckpointStage) -> Option<f64> {
        self.thresholds.get(stage).copied()
    }

    fn assess(&self, stage: &CheckpointStage, minutes: f64) -> RiskLevel {
        match self.threshold(stage) {
            Some(limit) if minutes > limit * 2.0 => RiskLevel::High,
            Some(limit) if minutes > limit => RiskLevel::Medium,
            _ => RiskLevel::Low,
        }
    }
}

/// Project a scan history into a journey state.
///
/// History order is not trusted: events are sorted by timestamp, ties keep
/// their input (submission) order. Unrecognized stages stay in the history
/// and can be `current`, but never take part in ordering.
pub fn project(
    history: &[ScanEvent],
    catalog: &StageCatalog,
    policy: &DwellPolicy,
    now: DateTime<Utc>,
) -> JourneyState {
    let mut events: Vec<&ScanEvent> = history.iter().collect();
    // sort_by_key is stable
    events.sort_by_key(|e| e.scanned_at);

    let Some(latest) = events.last() else {
        return JourneyState::not_checked_in(catalog);
    };
    let current = latest.stage.clone();

    let completed: Vec<CheckpointStage> = catalog
        .ordered()
        .iter()
        .filter(|stage| **stage != current && events.iter().any(|e| &e.stage == *stage))
        .cloned()
        .collect();

    let elapsed_ms = (now - latest.scanned_at).num_milliseconds().max(0);
    let minutes = elapsed_ms as f64 / 60_000.0;

    let is_terminal = current.is_exception() || catalog.is_last(&current);
    let expected_next_stage = if is_terminal {
        None
    } else {
        // Anchor on the newest event whose stage has a place in the catalog
        let anchor = events.iter().rev().map(|e| &e.stage).find(|s| catalog.position(s).is_some());
        let candidates = match anchor {
            Some(stage) => catalog.successors(stage),
            None => catalog.ordered(),
        };
        candidates.iter().find(|s| !completed.contains(s)).cloned()
    };

    let risk = if current.is_exception() {
        RiskLevel::High
    } else if is_terminal {
        RiskLevel::Low
    } else {
        policy.assess(&current, minutes)
    };

    let status = if current.is_exception() {
        OperationalStatus::Terminal
    } else if current == CheckpointStage::Claimed {
        OperationalStatus::Completed
    } else if is_terminal {
        OperationalStatus::Terminal
    } else {
        match risk {
            RiskLevel::Low => OperationalStatus::OnTrack,
            RiskLevel::Medium => OperationalStatus::Delayed,
            RiskLevel::High => OperationalStatus::AtRisk,
        }
    };

    JourneyState {
        completed_stages: completed,
        status_label: status.label(Some(&current)),
        current_stage: Some(current),
        expected_next_stage,
        is_terminal,
        operational_status: status,
        risk_level: Some(risk),
        minutes_since_last_scan: Some(minutes),
        is_delayed: risk >= RiskLevel::Medium,
    }
}

/// `project` against the wall clock
pub fn project_now(history: &[ScanEvent], catalog: &StageCatalog, policy: &DwellPolicy) -> JourneyState {
    project(history, catalog, policy, Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 4, 10, 0, 0).unwrap()
    }

    fn scan(stage: CheckpointStage, minute: i64) -> ScanEvent {
        ScanEvent {
            id: format!("evt-{}-{}", stage, minute),
            bag_id: "bag-1".to_string(),
            stage,
            location: None,
            note: None,
            scanned_at: t0() + Duration::minutes(minute),
            scanner_id: None,
        }
    }

    fn project_at(history: &[ScanEvent], minute: i64) -> JourneyState {
        project(
            history,
            &StageCatalog::default(),
            &DwellPolicy::default(),
            t0() + Duration::minutes(minute),
        )
    }

    #[test]
    fn test_empty_history() {
        let state = project_at(&[], 0);
        assert!(state.current_stage.is_none());
        assert!(state.completed_stages.is_empty());
        assert_eq!(state.expected_next_stage, Some(CheckpointStage::CheckIn));
        assert!(state.risk_level.is_none());
        assert!(state.minutes_since_last_scan.is_none());
        assert!(!state.is_terminal);
        assert_eq!(state.status_label, "Not Yet Checked In");
    }

    #[test]
    fn test_single_event_per_ordered_stage() {
        let catalog = StageCatalog::default();
        for (idx, stage) in catalog.ordered().iter().enumerate() {
            let state = project_at(&[scan(stage.clone(), 0)], 1);
            assert!(state.completed_stages.is_empty());
            assert_eq!(state.current_stage.as_ref(), Some(stage));
            match catalog.ordered().get(idx + 1) {
                Some(next) => {
                    assert_eq!(state.expected_next_stage.as_ref(), Some(next));
                    assert!(!state.is_terminal);
                }
                None => {
                    assert!(state.expected_next_stage.is_none());
                    assert!(state.is_terminal);
                }
            }
        }
    }

    #[test]
    fn test_worked_example() {
        let history = vec![
            scan(CheckpointStage::CheckIn, 0),
            scan(CheckpointStage::SecurityCheck, 1),
            scan(CheckpointStage::Arrival, 5),
        ];
        let state = project_at(&history, 6);
        assert_eq!(
            state.completed_stages,
            vec![CheckpointStage::CheckIn, CheckpointStage::SecurityCheck]
        );
        assert_eq!(state.current_stage, Some(CheckpointStage::Arrival));
        assert_eq!(state.expected_next_stage, Some(CheckpointStage::Claimed));
        assert!(!state.is_terminal);
        assert_eq!(state.operational_status, OperationalStatus::OnTrack);
        assert_eq!(state.status_label, "On Track - ARRIVAL");
    }

    #[test]
    fn test_exception_stage_is_terminal() {
        for exception in [CheckpointStage::Lost, CheckpointStage::ReturnedToAgent] {
            let history = vec![
                scan(CheckpointStage::CheckIn, 0),
                scan(CheckpointStage::Loading, 3),
                scan(exception.clone(), 4),
            ];
            let state = project_at(&history, 5);
            assert!(state.is_terminal);
            assert!(state.expected_next_stage.is_none());
            assert_eq!(state.risk_level, Some(RiskLevel::High));
            assert_eq!(state.operational_status, OperationalStatus::Terminal);
            assert_eq!(state.completed_stages, vec![CheckpointStage::CheckIn, CheckpointStage::Loading]);
        }
    }

    #[test]
    fn test_claimed_is_completed() {
        let history = vec![scan(CheckpointStage::Arrival, 0), scan(CheckpointStage::Claimed, 10)];
        let state = project_at(&history, 500);
        assert!(state.is_terminal);
        assert_eq!(state.operational_status, OperationalStatus::Completed);
        assert_eq!(state.risk_level, Some(RiskLevel::Low));
        assert_eq!(state.status_label, "Journey Completed");
    }

    #[test]
    fn test_catalog_ending_before_claimed_is_terminal() {
        let catalog = StageCatalog::new(vec![CheckpointStage::CheckIn, CheckpointStage::Arrival]);
        let state = project(
            &[scan(CheckpointStage::Arrival, 0)],
            &catalog,
            &DwellPolicy::default(),
            t0(),
        );
        assert!(state.is_terminal);
        assert_eq!(state.operational_status, OperationalStatus::Terminal);
        assert_eq!(state.status_label, "ARRIVAL");
    }

    #[test]
    fn test_order_insensitive() {
        let a = scan(CheckpointStage::CheckIn, 0);
        let b = scan(CheckpointStage::SecurityCheck, 4);
        let c = scan(CheckpointStage::Transfer, 9);
        let forward = project_at(&[a.clone(), b.clone(), c.clone()], 12);
        let shuffled = project_at(&[c, a, b], 12);
        assert_eq!(forward, shuffled);
        assert_eq!(forward.current_stage, Some(CheckpointStage::Transfer));
    }

    #[test]
    fn test_timestamp_ties_keep_submission_order() {
        let first = scan(CheckpointStage::Loading, 5);
        let second = scan(CheckpointStage::Transfer, 5);
        let state = project_at(&[first, second], 6);
        assert_eq!(state.current_stage, Some(CheckpointStage::Transfer));
    }

    #[test]
    fn test_dwell_risk_levels() {
        // CHECKIN threshold is 10 minutes
        let history = vec![scan(CheckpointStage::CheckIn, 0)];

        let state = project_at(&history, 9);
        assert_eq!(state.risk_level, Some(RiskLevel::Low));
        assert_eq!(state.operational_status, OperationalStatus::OnTrack);
        assert!(!state.is_delayed);

        let state = project_at(&history, 15);
        assert_eq!(state.risk_level, Some(RiskLevel::Medium));
        assert_eq!(state.operational_status, OperationalStatus::Delayed);
        assert_eq!(state.status_label, "Delayed at CHECKIN");
        assert!(state.is_delayed);

        let state = project_at(&history, 21);
        assert_eq!(state.risk_level, Some(RiskLevel::High));
        assert_eq!(state.operational_status, OperationalStatus::AtRisk);
        assert_eq!(state.minutes_since_last_scan, Some(21.0));
    }

    #[test]
    fn test_future_timestamp_clamps_to_zero() {
        let state = project_at(&[scan(CheckpointStage::CheckIn, 30)], 0);
        assert_eq!(state.minutes_since_last_scan, Some(0.0));
        assert_eq!(state.risk_level, Some(RiskLevel::Low));
    }

    #[test]
    fn test_expected_next_skips_completed_stages() {
        // TRANSFER was scanned with an earlier timestamp than SECURITY_CHECK
        let history = vec![
            scan(CheckpointStage::CheckIn, 0),
            scan(CheckpointStage::Transfer, 1),
            scan(CheckpointStage::SecurityCheck, 2),
        ];
        let state = project_at(&history, 3);
        assert_eq!(state.current_stage, Some(CheckpointStage::SecurityCheck));
        assert_eq!(state.expected_next_stage, Some(CheckpointStage::Loading));
    }

    #[test]
    fn test_unrecognized_stage_is_retained_but_not_ordered() {
        let customs = CheckpointStage::Unrecognized("CUSTOMS".to_string());
        let history = vec![
            scan(CheckpointStage::CheckIn, 0),
            scan(CheckpointStage::SecurityCheck, 1),
            scan(customs.clone(), 2),
        ];
        let state = project_at(&history, 500);
        assert_eq!(state.current_stage, Some(customs));
        assert_eq!(
            state.completed_stages,
            vec![CheckpointStage::CheckIn, CheckpointStage::SecurityCheck]
        );
        assert_eq!(state.expected_next_stage, Some(CheckpointStage::Transfer));
        assert_eq!(state.risk_level, Some(RiskLevel::Low));
        assert!(!state.is_terminal);
    }

    #[test]
    fn test_only_unrecognized_history() {
        let history = vec![scan(CheckpointStage::Unrecognized("X".into()), 0)];
        let state = project_at(&history, 1);
        assert!(state.completed_stages.is_empty());
        assert_eq!(state.expected_next_stage, Some(CheckpointStage::CheckIn));
    }

    #[test]
    fn test_dwell_overrides() {
        let overrides =
            HashMap::from([("CHECKIN".to_string(), 60), ("LOST".to_string(), 1), ("BOGUS".to_string(), 1)]);
        let policy = DwellPolicy::with_overrides(&overrides);
        assert_eq!(policy.threshold(&CheckpointStage::CheckIn), Some(60.0));
        assert_eq!(policy.threshold(&CheckpointStage::Lost), None);
        assert_eq!(policy.threshold(&CheckpointStage::Claimed), None);
        assert_eq!(policy.threshold(&CheckpointStage::Arrival), Some(60.0));
    }

    #[test]
    fn test_status_parse_round_trip() {
        for status in [
            OperationalStatus::OnTrack,
            OperationalStatus::Delayed,
            OperationalStatus::AtRisk,
            OperationalStatus::Terminal,
            OperationalStatus::Completed,
        ] {
            assert_eq!(OperationalStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OperationalStatus::parse("IN_TRANSIT"), None);
        assert_eq!(RiskLevel::parse("HIGH"), Some(RiskLevel::High));
    }
}
