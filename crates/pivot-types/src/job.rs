use std::{fmt, ops::RangeInclusive};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{PivotError, Result};

pub const DEPTH_RANGE: RangeInclusive<u32> = 8..=22;
pub const MAX_PIVOTS_RANGE: RangeInclusive<u32> = 3..=20;
pub const SWING_THRESHOLD_RANGE: RangeInclusive<u32> = 1..=2000;
pub const MIN_PLY_GAP_RANGE: RangeInclusive<u32> = 1..=40;
pub const MULTIPV_RANGE: RangeInclusive<u32> = 1..=5;
/// The backend refuses game records larger than this.
pub const MAX_PGN_BYTES: usize = 1_000_000;

/// Opaque identifier the backend assigns to an analysis job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the 8-4-4-4-12 hex layout the backend normally hands out.
    pub fn is_canonical(&self) -> bool {
        self.0.len() == 36 && Uuid::try_parse(&self.0).is_ok()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything the backend needs to run one analysis. Serializes as the
/// `POST /api/analyze` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisParameters {
    pub pgn: String,
    pub depth: u32,
    pub max_pivots: u32,
    pub swing_threshold_cp: u32,
    pub min_ply_gap: u32,
    pub multipv: u32,
}

impl AnalysisParameters {
    pub const DEFAULT_DEPTH: u32 = 14;
    pub const DEFAULT_MAX_PIVOTS: u32 = 10;
    pub const DEFAULT_SWING_THRESHOLD_CP: u32 = 120;
    pub const DEFAULT_MIN_PLY_GAP: u32 = 6;
    pub const DEFAULT_MULTIPV: u32 = 2;

    pub fn new(pgn: impl Into<String>) -> Self {
        Self {
            pgn: pgn.into(),
            depth: Self::DEFAULT_DEPTH,
            max_pivots: Self::DEFAULT_MAX_PIVOTS,
            swing_threshold_cp: Self::DEFAULT_SWING_THRESHOLD_CP,
            min_ply_gap: Self::DEFAULT_MIN_PLY_GAP,
            multipv: Self::DEFAULT_MULTIPV,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.pgn.trim().is_empty() {
            return Err(PivotError::Validation("game record is empty".into()));
        }
        if self.pgn.len() > MAX_PGN_BYTES {
            return Err(PivotError::Validation(format!(
                "game record exceeds {MAX_PGN_BYTES} bytes"
            )));
        }
        check_range("depth", self.depth, DEPTH_RANGE)?;
        check_range("max_pivots", self.max_pivots, MAX_PIVOTS_RANGE)?;
        check_range(
            "swing_threshold_cp",
            self.swing_threshold_cp,
            SWING_THRESHOLD_RANGE,
        )?;
        check_range("min_ply_gap", self.min_ply_gap, MIN_PLY_GAP_RANGE)?;
        check_range("multipv", self.multipv, MULTIPV_RANGE)?;
        Ok(())
    }
}

fn check_range(name: &str, value: u32, range: RangeInclusive<u32>) -> Result<()> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(PivotError::Validation(format!(
            "{name} must be between {} and {}, got {value}",
            range.start(),
            range.end()
        )))
    }
}

/// Lifecycle of one submitted analysis.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    #[default]
    Idle,
    Queued,
    Running {
        progress: u8,
    },
    Done,
    Failed {
        reason: String,
    },
    TimedOut,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Done | JobState::Failed { .. } | JobState::TimedOut
        )
    }

    /// A new submission may only start from idle or a finished job.
    pub fn accepts_submit(&self) -> bool {
        matches!(self, JobState::Idle) || self.is_terminal()
    }

    pub fn progress(&self) -> u8 {
        match self {
            JobState::Running { progress } => *progress,
            JobState::Done => 100,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Error,
}

/// Body of `GET /api/analyze/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusPayload {
    pub status: JobStatus,
    #[serde(default)]
    pub progress: Option<i64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl StatusPayload {
    pub fn parse(body: &str) -> Result<Self> {
        serde_json::from_str(body)
            .map_err(|err| PivotError::MalformedPayload(format!("job status: {err}")))
    }

    pub fn progress(&self) -> u8 {
        self.progress.unwrap_or(0).clamp(0, 100) as u8
    }

    /// State implied by this response.
    pub fn to_state(&self) -> JobState {
        match self.status {
            JobStatus::Queued => JobState::Queued,
            JobStatus::Running => JobState::Running {
                progress: self.progress(),
            },
            JobStatus::Done => JobState::Done,
            JobStatus::Error => JobState::Failed {
                reason: self
                    .error_message
                    .clone()
                    .or_else(|| self.error.clone())
                    .filter(|msg| !msg.trim().is_empty())
                    .unwrap_or_else(|| "Unknown error".into()),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct AnalyzeAck {
    #[serde(default)]
    db_job_id: Option<String>,
}

/// Extracts the job identifier from the `POST /api/analyze` acknowledgment.
pub fn parse_acknowledgment(body: &str) -> Result<JobId> {
    let ack: AnalyzeAck = serde_json::from_str(body)
        .map_err(|err| PivotError::MalformedPayload(format!("submission ack: {err}")))?;
    ack.db_job_id
        .filter(|id| !id.trim().is_empty())
        .map(JobId::new)
        .ok_or_else(|| PivotError::MalformedPayload("submission ack has no db_job_id".into()))
}
