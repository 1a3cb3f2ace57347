//! Error types surfaced to callers

use thiserror::Error;

/// Failures of the optical capture path
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Optical capture is already active")]
    AlreadyActive,

    #[error("Camera unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Camera permission denied: {0}")]
    PermissionDenied(String),

    #[error("Decode engine failed: {0}")]
    DecodeEngine(String),

    #[error("Camera lost during capture")]
    DeviceLost,

    #[error("Failed to release camera: {0}")]
    ReleaseFailed(String),

    #[error("Capture multiplexer has shut down")]
    Closed,
}

/// Failures talking to the remote ledger
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Ledger unreachable: {0}")]
    Unreachable(String),

    /// Non-success reply; `message` is "<code> <reason> - <body>"
    #[error("{message}")]
    Status { status: u16, message: String },

    #[error("Malformed ledger response: {0}")]
    Decode(String),
}

impl TransportError {
    pub fn status(status: u16, reason: &str, body: &str) -> Self {
        TransportError::Status {
            status,
            message: format!("{} {} - {}", status, reason, body),
        }
    }

    /// HTTP status code, if the ledger answered at all
    pub fn status_code(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Input rejected locally, before anything is sent
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Item id is empty")]
    EmptyItemId,

    #[error("Batch contains no item ids")]
    EmptyBatch,

    #[error("Missing required field: {0}")]
    MissingField(&'static str),
}

/// Outcome of a failed submission
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub type SubmitResult<T> = std::result::Result<T, SubmitError>;
