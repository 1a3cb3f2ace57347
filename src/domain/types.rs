//! Shared types for scans, scanners and bags

use crate::domain::stage::CheckpointStage;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable)
pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}

/// Get current epoch milliseconds
#[inline]
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// One recorded observation of a bag at a stage.
///
/// Field names follow the ledger's wire format (`checkpoint`, `status_note`,
/// `scanned_at`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanEvent {
    #[serde(default)]
    pub id: String,
    pub bag_id: String,
    #[serde(rename = "checkpoint")]
    pub stage: CheckpointStage,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default, rename = "status_note")]
    pub note: Option<String>,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub scanned_at: DateTime<Utc>,
    #[serde(default)]
    pub scanner_id: Option<String>,
}

/// Parse a ledger timestamp.
///
/// Accepts RFC 3339, naive ISO-8601 (treated as UTC, which is what the ledger
/// writes) and epoch milliseconds.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};

    struct TimestampVisitor;

    impl<'de> Visitor<'de> for TimestampVisitor {
        type Value = DateTime<Utc>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("an ISO 8601 string or epoch milliseconds")
        }

        fn visit_str<E>(self, value: &str) -> Result<DateTime<Utc>, E>
        where
            E: de::Error,
        {
            parse_timestamp(value)
                .ok_or_else(|| E::custom(format!("invalid timestamp: {}", value)))
        }

        fn visit_u64<E>(self, value: u64) -> Result<DateTime<Utc>, E>
        where
            E: de::Error,
        {
            let ms = i64::try_from(value).map_err(|_| E::custom("timestamp out of range"))?;
            self.visit_i64(ms)
        }

        fn visit_i64<E>(self, value: i64) -> Result<DateTime<Utc>, E>
        where
            E: de::Error,
        {
            DateTime::<Utc>::from_timestamp_millis(value)
                .ok_or_else(|| E::custom(format!("timestamp out of range: {}", value)))
        }
    }

    deserializer.deserialize_any(TimestampVisitor)
}

/// Capture hardware class of a registered scanner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    #[default]
    Barcode,
    Qr,
    Rfid,
    Manual,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Barcode => "barcode",
            DeviceType::Qr => "qr",
            DeviceType::Rfid => "rfid",
            DeviceType::Manual => "manual",
        }
    }
}

/// A registered scanner device as stored by the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scanner {
    pub id: String,
    pub name: String,
    pub location: String,
    #[serde(rename = "checkpoint")]
    pub stage: CheckpointStage,
    #[serde(default)]
    pub device_type: DeviceType,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

fn deserialize_optional_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapped(#[serde(deserialize_with = "deserialize_timestamp")] DateTime<Utc>);

    Ok(Option::<Wrapped>::deserialize(deserializer)?.map(|Wrapped(dt)| dt))
}

/// Payload for registering a new scanner
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScannerRegistration {
    pub name: String,
    pub location: String,
    #[serde(rename = "checkpoint")]
    pub stage: CheckpointStage,
    pub device_type: DeviceType,
}

/// Scanner metadata attached to every captured scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScannerBinding {
    pub scanner_id: Option<String>,
    /// Stage to record; `None` lets the ledger resolve it from the scanner
    pub stage: Option<CheckpointStage>,
    /// Location override; `None` lets the ledger use the scanner's location
    pub location: Option<String>,
}

impl ScannerBinding {
    /// Binding with no device attached
    pub fn unbound() -> Self {
        Self::default()
    }

    /// Bind to a registered scanner, optionally overriding its location
    pub fn for_scanner(scanner: &Scanner, location_override: Option<String>) -> Self {
        Self {
            scanner_id: Some(scanner.id.clone()),
            stage: Some(scanner.stage.clone()),
            location: location_override.filter(|l| !l.trim().is_empty()),
        }
    }

    pub fn with_stage(mut self, stage: CheckpointStage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn with_location(mut self, location: &str) -> Self {
        self.location = Some(location.to_string());
        self
    }
}

/// Bag record as stored by the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BagRecord {
    pub id: String,
    pub tag_number: String,
    #[serde(default)]
    pub passenger_name: Option<String>,
    #[serde(default)]
    pub flight_number: Option<String>,
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    pub registered_at: Option<DateTime<Utc>>,
}

/// Payload for registering a new bag
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BagRegistration {
    pub tag_number: String,
    pub passenger_name: Option<String>,
    pub flight_number: Option<String>,
    pub origin: Option<String>,
    pub destination: Option<String>,
}

/// Entry in the local recently-seen cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedReference {
    pub id: String,
    #[serde(default, rename = "tag_number", skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl CachedReference {
    pub fn new(id: &str) -> Self {
        Self { id: id.to_string(), label: None }
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }
}

impl From<&BagRecord> for CachedReference {
    fn from(bag: &BagRecord) -> Self {
        Self { id: bag.id.clone(), label: Some(bag.tag_number.clone()) }
    }
}
