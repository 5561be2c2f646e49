use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::{JobId, JobState};

/// Notification emitted by the job client after every state-affecting response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobUpdate {
    pub job_id: Option<JobId>,
    pub state: JobState,
    /// Poll attempt that produced this update; zero for submission.
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
}

impl JobUpdate {
    pub fn new(job_id: Option<JobId>, state: JobState, attempt: u32) -> Self {
        Self {
            job_id,
            state,
            attempt,
            timestamp: Utc::now(),
        }
    }
}
