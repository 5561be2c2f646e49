use std::sync::Arc;

use pivot_types::{
    failure::{Failure, RetryAction},
    job::JobId,
    report::Report,
    PivotError,
};
use tracing::{info, warn};

use crate::{rejected, ApiRequest, HttpTransport};

/// Result of a report request that reached the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportFetch {
    Ready(Report),
    /// The job finished but the report has not been materialised yet.
    NotReady,
}

/// One-shot retrieval of a finished job's report. Nothing is cached.
#[derive(Clone)]
pub struct ReportFetcher {
    transport: Arc<dyn HttpTransport>,
}

impl ReportFetcher {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    pub async fn fetch(
        &self,
        job_id: &JobId,
        depth: u32,
        max_items: u32,
    ) -> Result<ReportFetch, Failure> {
        let fail = |err: PivotError| {
            warn!("Report for job {} unavailable: {err}", job_id);
            Failure::new(
                PivotError::ReportFetch(err.to_string()),
                Some(RetryAction::FetchReport {
                    job_id: job_id.clone(),
                    depth,
                    max_items,
                }),
            )
        };

        let request = ApiRequest::Report {
            job_id: job_id.clone(),
            depth,
            max_items,
        };
        let response = self.transport.send(&request).await.map_err(fail)?;
        if response.status == 404 {
            info!("Report for job {} is not ready yet", job_id);
            return Ok(ReportFetch::NotReady);
        }
        if !response.is_success() {
            return Err(fail(rejected(response)));
        }

        let report = Report::from_json(&response.body, job_id).map_err(fail)?;
        info!(
            "Fetched report for job {} with {} moments",
            job_id,
            report.moments.len()
        );
        Ok(ReportFetch::Ready(report))
    }
}
