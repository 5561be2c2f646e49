use thiserror::Error;

use crate::failure::FailureKind;

pub type Result<T, E = PivotError> = std::result::Result<T, E>;

/// Unified error type covering common failure scenarios across subsystems.
#[derive(Debug, Error)]
pub enum PivotError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("invalid parameters: {0}")]
    Validation(String),
    #[error("usage error: {0}")]
    Usage(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("server rejected request ({status}): {body}")]
    ServerRejected { status: u16, body: String },
    #[error("analysis failed: {0}")]
    Application(String),
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("no terminal status after {attempts} attempts")]
    Timeout { attempts: u32 },
    #[error("report fetch failed: {0}")]
    ReportFetch(String),
    #[error("illegal move {notation}: {reason}")]
    IllegalMove { notation: String, reason: String },
    #[error("operational error: {0}")]
    Ops(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PivotError {
    /// Classification used when the error crosses into the presentation layer.
    pub fn kind(&self) -> FailureKind {
        match self {
            PivotError::Transport(_) => FailureKind::TransportFailure,
            PivotError::ServerRejected { .. } => FailureKind::ServerRejected,
            PivotError::Application(_) => FailureKind::ApplicationError,
            PivotError::MalformedPayload(_) => FailureKind::MalformedPayload,
            PivotError::Timeout { .. } => FailureKind::Timeout,
            PivotError::ReportFetch(_) => FailureKind::ReportFetchFailed,
            PivotError::IllegalMove { .. } => FailureKind::IllegalMove,
            PivotError::Validation(_) | PivotError::Usage(_) => FailureKind::Usage,
            PivotError::Configuration(_) | PivotError::Ops(_) | PivotError::Other(_) => {
                FailureKind::Internal
            }
        }
    }
}
