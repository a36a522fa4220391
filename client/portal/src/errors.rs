//! Application-wide error types.

use thiserror::Error;

use crate::principal::PrincipalKind;

#[derive(Debug, Error)]
pub enum PortalError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Request failed with status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Principal kind mismatch: expected {expected}, found {found}")]
    KindMismatch {
        expected: PrincipalKind,
        found: PrincipalKind,
    },

    #[error("No authenticated session")]
    NotAuthenticated,

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl PortalError {
    /// `true` for a 401 response from the REST collaborator.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Status { status: 401, .. })
    }
}

pub type Result<T> = std::result::Result<T, PortalError>;
