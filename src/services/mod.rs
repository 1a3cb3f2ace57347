//! Services - business logic and state management
//!
//! - `capture` - Keystroke-wedge and optical capture multiplexer
//! - `pipeline` - Scan submission (single, manual, batch)
//! - `reference_cache` - Bounded most-recent-first cache of seen bags
//! - `registry` - Scanner and bag registration
//! - `status` - Journey status lookup and local projection fallback

pub mod capture;
pub mod pipeline;
pub mod reference_cache;
pub mod registry;
pub mod status;

// Re-export commonly used types
pub use capture::{spawn_capture, CaptureHandle, CaptureOutput, CaptureService, CaptureSettings};
pub use pipeline::{BatchReceipt, ManualScan, ScanReceipt, ScanSubmissionPipeline};
pub use reference_cache::{BagReferenceCache, JsonFileStore, SharedReferenceCache};
pub use registry::ScannerRegistry;
pub use status::{JourneyReport, JourneySource, JourneyStatusService};
