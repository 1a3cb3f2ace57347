//! Keystroke-wedge decoder
//!
//! Hardware barcode scanners in keyboard-emulation mode type a whole code in
//! a burst and finish with Enter. People type slower. Any gap longer than the
//! idle threshold discards what has been typed so far, so only bursts survive
//! to the Enter key.

use std::time::{Duration, Instant};

/// One key from the keystroke channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WedgeKey {
    Char(char),
    Enter,
}

/// Result of feeding one key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WedgeStep {
    /// Trimmed code completed by this key
    pub code: Option<String>,
    /// A partial buffer was thrown away because of the idle gap
    pub discarded: bool,
}

pub struct WedgeDecoder {
    buffer: String,
    last_key_at: Option<Instant>,
    idle: Duration,
}

impl WedgeDecoder {
    pub fn new(idle: Duration) -> Self {
        Self { buffer: String::new(), last_key_at: None, idle }
    }

    pub fn push(&mut self, key: WedgeKey, at: Instant) -> WedgeStep {
        let mut step = WedgeStep::default();

        if let Some(last) = self.last_key_at {
            if at.saturating_duration_since(last) > self.idle && !self.buffer.is_empty() {
                self.buffer.clear();
                step.discarded = true;
            }
        }
        self.last_key_at = Some(at);

        match key {
            WedgeKey::Enter => {
                let code = self.buffer.trim().to_string();
                self.buffer.clear();
                if !code.is_empty() {
                    step.code = Some(code);
                }
            }
            WedgeKey::Char(c) if !c.is_control() => self.buffer.push(c),
            WedgeKey::Char(_) => {}
        }
        step
    }

    /// Pending characters not yet terminated by Enter
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.last_key_at = None;
    }
}
