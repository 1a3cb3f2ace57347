//! IO modules - external system interfaces
//!
//! - `ledger` - HTTP client for the remote scan ledger
//! - `camera` - Optical capture device seam and file replay device
//! - `keyboard` - Raw-mode terminal reader feeding the keystroke wedge

pub mod camera;
#[cfg(test)]
pub mod fake_ledger;
pub mod keyboard;
pub mod ledger;

// Re-export commonly used types
pub use camera::{CaptureDevice, FrameDecode, FrameStream, NoCamera, ReplayCamera};
pub use keyboard::{spawn_terminal_reader, RawModeGuard, TerminalInput};
pub use ledger::{HttpLedger, LedgerTransport};
