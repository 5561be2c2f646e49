//! HTTP plumbing for the analysis backend: job submission, polling and report retrieval.

mod http;
mod job;
mod report;
mod scripted;

use async_trait::async_trait;
use pivot_types::{
    job::{AnalysisParameters, JobId},
    PivotError, Result,
};

pub use http::ReqwestTransport;
pub use job::{CancelToken, JobClient, JobHandle, PollOutcome};
pub use report::{ReportFetch, ReportFetcher};
pub use scripted::{ScriptedReply, ScriptedTransport};

/// Longest slice of a rejected response body carried into error messages.
const MAX_ERROR_BODY: usize = 200;

/// The three calls the backend exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiRequest {
    Submit(AnalysisParameters),
    Status(JobId),
    Report {
        job_id: JobId,
        depth: u32,
        max_items: u32,
    },
}

impl ApiRequest {
    pub fn path(&self) -> String {
        match self {
            ApiRequest::Submit(_) => "/api/analyze".into(),
            ApiRequest::Status(id) => format!("/api/analyze/{id}"),
            ApiRequest::Report { job_id, .. } => format!("/api/report/{job_id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Point-to-point request/response channel to the backend.
///
/// `send` fails only when no response arrived at all; any HTTP status,
/// success or not, comes back as an [`ApiResponse`].
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse>;
}

/// Sends `request` and returns the body of a successful response.
pub(crate) async fn exchange(
    transport: &dyn HttpTransport,
    request: &ApiRequest,
) -> Result<String> {
    let response = transport.send(request).await?;
    if response.is_success() {
        Ok(response.body)
    } else {
        Err(rejected(response))
    }
}

pub(crate) fn rejected(response: ApiResponse) -> PivotError {
    PivotError::ServerRejected {
        status: response.status,
        body: response.body.chars().take(MAX_ERROR_BODY).collect(),
    }
}

pub fn network_error(message: impl Into<String>) -> PivotError {
    PivotError::Transport(message.into())
}
