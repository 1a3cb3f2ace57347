//! Scanner and bag registration

use crate::domain::{
    BagRecord, BagRegistration, CachedReference, Scanner, ScannerBinding, ScannerRegistration,
};
use crate::error::{SubmitResult, TransportError, ValidationError};
use crate::io::ledger::LedgerTransport;
use crate::services::reference_cache::SharedReferenceCache;
use std::sync::Arc;
use tracing::{info, warn};

pub struct ScannerRegistry {
    ledger: Arc<dyn LedgerTransport>,
    cache: SharedReferenceCache,
}

fn require(value: &str, field: &'static str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::MissingField(field))
    } else {
        Ok(())
    }
}

fn trimmed(value: &Option<String>) -> Option<String> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

impl ScannerRegistry {
    pub fn new(ledger: Arc<dyn LedgerTransport>, cache: SharedReferenceCache) -> Self {
        Self { ledger, cache }
    }

    pub async fn list(&self, active_only: bool) -> Result<Vec<Scanner>, TransportError> {
        self.ledger.list_scanners(active_only).await
    }

    pub async fn get(&self, scanner_id: &str) -> Result<Scanner, TransportError> {
        self.ledger.get_scanner(scanner_id).await
    }

    pub async fn register(&self, registration: &ScannerRegistration) -> SubmitResult<Scanner> {
        require(&registration.name, "name")?;
        require(&registration.location, "location")?;
        let registration = ScannerRegistration {
            name: registration.name.trim().to_string(),
            location: registration.location.trim().to_string(),
            ..registration.clone()
        };
        let scanner = self.ledger.register_scanner(&registration).await?;
        info!(
            scanner_id = %scanner.id,
            name = %scanner.name,
            stage = %scanner.stage,
            device_type = %scanner.device_type.as_str(),
            "scanner_registered"
        );
        Ok(scanner)
    }

    /// Binding for captured scans from a registered scanner
    pub async fn binding_for(
        &self,
        scanner_id: &str,
        location_override: Option<String>,
    ) -> SubmitResult<ScannerBinding> {
        require(scanner_id, "scanner_id")?;
        let scanner = self.ledger.get_scanner(scanner_id.trim()).await?;
        if !scanner.is_active {
            warn!(scanner_id = %scanner.id, "scanner_inactive");
        }
        Ok(ScannerBinding::for_scanner(&scanner, location_override))
    }

    /// Register a bag and remember it locally so its tag resolves on scan
    pub async fn register_bag(&self, registration: &BagRegistration) -> SubmitResult<BagRecord> {
        require(&registration.tag_number, "tag_number")?;
        let registration = BagRegistration {
            tag_number: registration.tag_number.trim().to_string(),
            passenger_name: trimmed(&registration.passenger_name),
            flight_number: trimmed(&registration.flight_number),
            origin: trimmed(&registration.origin),
            destination: trimmed(&registration.destination),
        };
        let bag = self.ledger.register_bag(&registration).await?;
        self.cache.lock().record_seen(CachedReference::from(&bag));
        info!(bag_id = %bag.id, tag_number = %bag.tag_number, "bag_registered");
        Ok(bag)
    }
}
