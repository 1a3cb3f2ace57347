//! Checkpoint stages and the ordered stage catalog

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A named waypoint in a bag's handling lifecycle.
///
/// Tokens the ledger sends that this build does not know about parse to
/// `Unrecognized` instead of failing, so a history containing them can still
/// be projected.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CheckpointStage {
    CheckIn,
    SecurityCheck,
    Transfer,
    Loading,
    LoadedOntoAircraft,
    InTransit,
    Unloading,
    Arrival,
    Claimed,
    Lost,
    ReturnedToAgent,
    Unrecognized(String),
}

impl std::str::FromStr for CheckpointStage {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim();
        Ok(match token.to_ascii_uppercase().as_str() {
            "CHECKIN" => CheckpointStage::CheckIn,
            "SECURITY_CHECK" => CheckpointStage::SecurityCheck,
            "TRANSFER" => CheckpointStage::Transfer,
            "LOADING" => CheckpointStage::Loading,
            "LOADED_ONTO_AIRCRAFT" => CheckpointStage::LoadedOntoAircraft,
            "IN_TRANSIT" => CheckpointStage::InTransit,
            "UNLOADING" => CheckpointStage::Unloading,
            "ARRIVAL" => CheckpointStage::Arrival,
            "CLAIMED" => CheckpointStage::Claimed,
            "LOST" => CheckpointStage::Lost,
            "RETURNED_TO_AGENT" => CheckpointStage::ReturnedToAgent,
            _ => CheckpointStage::Unrecognized(token.to_string()),
        })
    }
}

impl CheckpointStage {
    /// Wire token, e.g. `SECURITY_CHECK`
    pub fn as_str(&self) -> &str {
        match self {
            CheckpointStage::CheckIn => "CHECKIN",
            CheckpointStage::SecurityCheck => "SECURITY_CHECK",
            CheckpointStage::Transfer => "TRANSFER",
            CheckpointStage::Loading => "LOADING",
            CheckpointStage::LoadedOntoAircraft => "LOADED_ONTO_AIRCRAFT",
            CheckpointStage::InTransit => "IN_TRANSIT",
            CheckpointStage::Unloading => "UNLOADING",
            CheckpointStage::Arrival => "ARRIVAL",
            CheckpointStage::Claimed => "CLAIMED",
            CheckpointStage::Lost => "LOST",
            CheckpointStage::ReturnedToAgent => "RETURNED_TO_AGENT",
            CheckpointStage::Unrecognized(token) => token,
        }
    }

    /// Exception stages can occur at any point and end the journey
    #[inline]
    pub fn is_exception(&self) -> bool {
        matches!(self, CheckpointStage::Lost | CheckpointStage::ReturnedToAgent)
    }

    #[inline]
    pub fn is_recognized(&self) -> bool {
        !matches!(self, CheckpointStage::Unrecognized(_))
    }

    /// True for stages that take part in ordering comparisons
    #[inline]
    pub fn is_ordered(&self) -> bool {
        self.is_recognized() && !self.is_exception()
    }

    /// Human-readable name (`LOADED ONTO AIRCRAFT`)
    pub fn display_name(&self) -> String {
        self.as_str().replace('_', " ")
    }
}

impl fmt::Display for CheckpointStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for CheckpointStage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for CheckpointStage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let token = String::deserialize(deserializer)?;
        // Infallible: unknown tokens become Unrecognized
        Ok(token.parse().unwrap_or(CheckpointStage::Unrecognized(token)))
    }
}

const DEFAULT_STAGES: [CheckpointStage; 11] = [
    CheckpointStage::CheckIn,
    CheckpointStage::SecurityCheck,
    CheckpointStage::Transfer,
    CheckpointStage::Loading,
    CheckpointStage::LoadedOntoAircraft,
    CheckpointStage::InTransit,
    CheckpointStage::Unloading,
    CheckpointStage::Arrival,
    CheckpointStage::Claimed,
    CheckpointStage::Lost,
    CheckpointStage::ReturnedToAgent,
];

/// Stage list as published by the ledger.
///
/// Position in the list defines the total order. Exception and unrecognized
/// entries are kept in `stages()` but never appear in `ordered()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCatalog {
    stages: Vec<CheckpointStage>,
    ordered: Vec<CheckpointStage>,
}

impl StageCatalog {
    pub fn new(stages: Vec<CheckpointStage>) -> Self {
        let mut ordered: Vec<CheckpointStage> = Vec::with_capacity(stages.len());
        for stage in stages.iter().filter(|s| s.is_ordered()) {
            if !ordered.contains(stage) {
                ordered.push(stage.clone());
            }
        }
        Self { stages, ordered }
    }

    /// Every stage the ledger listed, in ledger order
    pub fn stages(&self) -> &[CheckpointStage] {
        &self.stages
    }

    /// The ordered subset used for expected-next computation
    pub fn ordered(&self) -> &[CheckpointStage] {
        &self.ordered
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    /// Index of `stage` in the ordered subset
    pub fn position(&self, stage: &CheckpointStage) -> Option<usize> {
        self.ordered.iter().position(|s| s == stage)
    }

    pub fn first(&self) -> Option<&CheckpointStage> {
        self.ordered.first()
    }

    pub fn last(&self) -> Option<&CheckpointStage> {
        self.ordered.last()
    }

    pub fn is_last(&self, stage: &CheckpointStage) -> bool {
        self.last() == Some(stage)
    }

    /// Ordered stages strictly after `stage`; empty if `stage` is not ordered
    pub fn successors(&self, stage: &CheckpointStage) -> &[CheckpointStage] {
        match self.position(stage) {
            Some(idx) => &self.ordered[idx + 1..],
            None => &[],
        }
    }
}

impl Default for StageCatalog {
    fn default() -> Self {
        Self::new(DEFAULT_STAGES.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_from_str() {
        assert_eq!("CHECKIN".parse::<CheckpointStage>().unwrap(), CheckpointStage::CheckIn);
        assert_eq!(
            " loaded_onto_aircraft ".parse::<CheckpointStage>().unwrap(),
            CheckpointStage::LoadedOntoAircraft
        );
        assert_eq!(
            "CUSTOMS".parse::<CheckpointStage>().unwrap(),
            CheckpointStage::Unrecognized("CUSTOMS".to_string())
        );
    }

    #[test]
    fn test_stage_serde_roundtrip_keeps_unknown_token() {
        let stages: Vec<CheckpointStage> =
            serde_json::from_str(r#"["SECURITY_CHECK","CUSTOMS","LOST"]"#).unwrap();
        assert_eq!(
            stages,
            vec![
                CheckpointStage::SecurityCheck,
                CheckpointStage::Unrecognized("CUSTOMS".to_string()),
                CheckpointStage::Lost
            ]
        );
        assert_eq!(serde_json::to_string(&stages).unwrap(), r#"["SECURITY_CHECK","CUSTOMS","LOST"]"#);
    }

    #[test]
    fn test_exception_stages() {
        assert!(CheckpointStage::Lost.is_exception());
        assert!(CheckpointStage::ReturnedToAgent.is_exception());
        assert!(!CheckpointStage::Claimed.is_exception());
        assert!(!CheckpointStage::Lost.is_ordered());
        assert!(!CheckpointStage::Unrecognized("X".into()).is_ordered());
    }

    #[test]
    fn test_default_catalog_ordering() {
        let catalog = StageCatalog::default();
        assert_eq!(catalog.stages().len(), 11);
        assert_eq!(catalog.ordered().len(), 9);
        assert_eq!(catalog.first(), Some(&CheckpointStage::CheckIn));
        assert_eq!(catalog.last(), Some(&CheckpointStage::Claimed));
        assert_eq!(catalog.position(&CheckpointStage::Lost), None);
        assert_eq!(catalog.successors(&CheckpointStage::Arrival), &[CheckpointStage::Claimed]);
        assert!(catalog.successors(&CheckpointStage::Claimed).is_empty());
    }

    #[test]
    fn test_catalog_skips_unknown_and_duplicates() {
        let catalog = StageCatalog::new(vec![
            CheckpointStage::CheckIn,
            CheckpointStage::Unrecognized("CUSTOMS".into()),
            CheckpointStage::Lost,
            CheckpointStage::Arrival,
            CheckpointStage::CheckIn,
        ]);
        assert_eq!(catalog.ordered(), &[CheckpointStage::CheckIn, CheckpointStage::Arrival]);
        assert!(catalog.is_last(&CheckpointStage::Arrival));
    }

    #[test]
    fn test_display_name() {
        assert_eq!(CheckpointStage::LoadedOntoAircraft.display_name(), "LOADED ONTO AIRCRAFT");
    }
}
