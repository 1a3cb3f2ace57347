//! Terminal keystroke source
//!
//! A hardware scanner in keyboard-emulation mode types into the terminal like
//! a person would. The reader runs on a blocking thread in raw mode and
//! timestamps each key as it is read, before it queues anywhere.

use crate::services::capture::WedgeKey;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::io;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Operator input read from the terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalInput {
    Key(WedgeKey, Instant),
    /// F2
    ToggleCamera,
    /// F3
    ToggleListening,
    /// Esc or Ctrl-C
    Quit,
}

/// Map one key event; `None` for releases and keys with no meaning here
pub fn map_key(key: &KeyEvent, at: Instant) -> Option<TerminalInput> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Some(TerminalInput::Quit),
        KeyCode::Char(c) => Some(TerminalInput::Key(WedgeKey::Char(c), at)),
        KeyCode::Enter => Some(TerminalInput::Key(WedgeKey::Enter, at)),
        KeyCode::F(2) => Some(TerminalInput::ToggleCamera),
        KeyCode::F(3) => Some(TerminalInput::ToggleListening),
        KeyCode::Esc => Some(TerminalInput::Quit),
        _ => None,
    }
}

/// Raw mode for as long as the guard lives
pub struct RawModeGuard;

impl RawModeGuard {
    pub fn enable() -> io::Result<Self> {
        enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = disable_raw_mode() {
            warn!(error = %e, "raw_mode_restore_failed");
        }
    }
}

/// Read terminal keys until Quit or until the receiver is dropped
pub fn spawn_terminal_reader(tx: mpsc::Sender<TerminalInput>) -> JoinHandle<io::Result<()>> {
    tokio::task::spawn_blocking(move || {
        let poll_interval = Duration::from_millis(50);
        while !tx.is_closed() {
            if !event::poll(poll_interval)? {
                continue;
            }
            let Event::Key(key) = event::read()? else {
                continue;
            };
            let Some(input) = map_key(&key, Instant::now()) else {
                continue;
            };
            if tx.blocking_send(input).is_err() || input == TerminalInput::Quit {
                break;
            }
        }
        debug!("terminal_reader_stopped");
        Ok(())
    })
}
