//! Uniform failure value handed to the presentation layer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    job::{AnalysisParameters, JobId},
    PivotError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    TransportFailure,
    ServerRejected,
    ApplicationError,
    MalformedPayload,
    Timeout,
    ReportFetchFailed,
    IllegalMove,
    Usage,
    Internal,
}

impl FailureKind {
    pub fn title(self) -> &'static str {
        match self {
            FailureKind::TransportFailure => "Connection problem",
            FailureKind::ServerRejected => "Request rejected",
            FailureKind::ApplicationError => "Analysis failed",
            FailureKind::MalformedPayload => "Unexpected response",
            FailureKind::Timeout => "Analysis is taking too long",
            FailureKind::ReportFetchFailed => "Report fetch failed",
            FailureKind::IllegalMove => "Illegal move",
            FailureKind::Usage => "Not available right now",
            FailureKind::Internal => "Internal error",
        }
    }
}

/// The operation to re-run when the user asks to retry.
///
/// Each variant carries the exact arguments of the operation that failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryAction {
    Submit(AnalysisParameters),
    ResumePolling(JobId),
    FetchReport {
        job_id: JobId,
        depth: u32,
        max_items: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{title}: {message}")]
pub struct Failure {
    pub kind: FailureKind,
    pub title: String,
    pub message: String,
    pub retry: Option<RetryAction>,
}

impl Failure {
    pub fn new(error: PivotError, retry: Option<RetryAction>) -> Self {
        let kind = error.kind();
        Self {
            kind,
            title: kind.title().to_string(),
            message: error.to_string(),
            retry,
        }
    }

    /// Failure that cannot be fixed by re-running the same call.
    pub fn terminal(error: PivotError) -> Self {
        Self::new(error, None)
    }

    pub fn is_retryable(&self) -> bool {
        self.retry.is_some()
    }
}
