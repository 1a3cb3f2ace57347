//! Domain models - stages, scan events and journey projection
//!
//! - `stage` - `CheckpointStage` and the ordered `StageCatalog`
//! - `types` - `ScanEvent`, scanners, bags and cached references
//! - `journey` - `JourneyState` and the pure `project` function

pub mod journey;
pub mod stage;
pub mod types;

pub use journey::{project, project_now, DwellPolicy, JourneyState, OperationalStatus, RiskLevel};
pub use stage::{CheckpointStage, StageCatalog};
pub use types::{
    BagRecord, BagRegistration, CachedReference, DeviceType, ScanEvent, Scanner, ScannerBinding,
    ScannerRegistration,
};
