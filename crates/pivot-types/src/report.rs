//! Report model and the ingestion boundary for `GET /api/report/{id}`.
//!
//! The backend payload is loosely typed. It is decoded into private wire
//! structs, checked for required fields, default-filled, and converted into
//! the immutable domain records. Fields the schema does not know are dropped.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    board::{Position, Side},
    game::{classify_swing, CandidateLine, Moment, Move},
    job::{AnalysisParameters, JobId},
    PivotError, Result,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub job_id: JobId,
    pub headers: BTreeMap<String, String>,
    pub moments: Vec<Moment>,
    pub narrative: Narrative,
}

/// Coach write-up that accompanies the moments.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Narrative {
    pub summary: String,
    pub turning_points: Vec<TurningPoint>,
    pub themes: Vec<String>,
    pub training_plan: Vec<TrainingDrill>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TurningPoint {
    pub ply: u32,
    pub title: String,
    pub what_happened: String,
    pub why_it_matters: String,
    pub try_this_next_time: String,
    pub pv_in_words: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingDrill {
    pub drill: String,
    pub how: String,
    pub frequency: String,
}

impl Report {
    /// Decodes a report body fetched for `requested`.
    pub fn from_json(body: &str, requested: &JobId) -> Result<Self> {
        let wire: WireReport = serde_json::from_str(body)
            .map_err(|err| PivotError::MalformedPayload(format!("report: {err}")))?;

        let job_id = match wire.job_id.filter(|id| !id.is_empty()) {
            Some(id) if id != requested.as_str() => {
                return Err(PivotError::MalformedPayload(format!(
                    "report belongs to job {id}, expected {requested}"
                )))
            }
            _ => requested.clone(),
        };

        let moments = wire
            .pivotal_moments
            .into_iter()
            .enumerate()
            .map(|(idx, moment)| {
                moment.into_moment().map_err(|err| {
                    PivotError::MalformedPayload(format!("pivotal_moments[{idx}]: {err}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            job_id,
            headers: wire.headers,
            moments,
            narrative: wire.coach_report.unwrap_or_default(),
        })
    }

    /// Header value, or `?` when the game record did not carry it.
    pub fn header(&self, name: &str) -> &str {
        self.headers.get(name).map(String::as_str).unwrap_or("?")
    }

    /// Ways in which the moments disagree with the limits that were requested.
    pub fn conformance_issues(&self, params: &AnalysisParameters) -> Vec<String> {
        let mut issues = Vec::new();
        if self.moments.len() > params.max_pivots as usize {
            issues.push(format!(
                "{} moments reported, limit was {}",
                self.moments.len(),
                params.max_pivots
            ));
        }
        for moment in &self.moments {
            if moment.delta_cp.unsigned_abs() < params.swing_threshold_cp {
                issues.push(format!(
                    "ply {} swing {}cp is below the {}cp threshold",
                    moment.ply, moment.delta_cp, params.swing_threshold_cp
                ));
            }
        }
        let mut plies: Vec<u32> = self.moments.iter().map(|m| m.ply).collect();
        plies.sort_unstable();
        for pair in plies.windows(2) {
            if pair[1] - pair[0] < params.min_ply_gap {
                issues.push(format!(
                    "plies {} and {} are closer than {}",
                    pair[0], pair[1], params.min_ply_gap
                ));
            }
        }
        issues
    }
}

#[derive(Debug, Deserialize)]
struct WireReport {
    #[serde(default)]
    job_id: Option<String>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    pivotal_moments: Vec<WireMoment>,
    #[serde(default)]
    coach_report: Option<Narrative>,
}

#[derive(Debug, Deserialize)]
struct WirePvMove {
    uci: String,
    #[serde(default)]
    san: String,
    #[serde(default)]
    fen_after: Option<String>,
    #[serde(default)]
    eval_cp: Option<i32>,
}

impl From<WirePvMove> for Move {
    fn from(wire: WirePvMove) -> Self {
        let label = if wire.san.is_empty() {
            wire.uci.clone()
        } else {
            wire.san
        };
        Move {
            id: wire.uci,
            label,
            resulting_position: wire
                .fen_after
                .filter(|fen| !fen.trim().is_empty())
                .map(Position::new),
            evaluation_cp: wire.eval_cp,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireCandidate {
    uci: String,
    #[serde(default)]
    san: String,
    #[serde(default)]
    eval_cp: Option<i32>,
    #[serde(default)]
    pv: Vec<WirePvMove>,
}

impl From<WireCandidate> for CandidateLine {
    fn from(wire: WireCandidate) -> Self {
        let label = if wire.san.is_empty() {
            wire.uci.clone()
        } else {
            wire.san
        };
        CandidateLine {
            mv: Move::new(wire.uci, label),
            evaluation_cp: wire.eval_cp,
            principal_variation: wire.pv.into_iter().map(Move::from).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireMoment {
    ply: i64,
    side_to_move: String,
    fen_before: String,
    #[serde(default)]
    uci_played: Option<String>,
    #[serde(default)]
    san_played: Option<String>,
    #[serde(default)]
    uci_best: Option<String>,
    #[serde(default)]
    san_best: Option<String>,
    #[serde(default)]
    eval_before_cp: Option<i32>,
    #[serde(default)]
    eval_after_played_cp: Option<i32>,
    #[serde(default)]
    eval_after_best_cp: Option<i32>,
    #[serde(default)]
    pv_best: Vec<WirePvMove>,
    #[serde(default)]
    pv_played: Vec<WirePvMove>,
    #[serde(default)]
    candidates: Vec<WireCandidate>,
    #[serde(default)]
    candidates_played: Vec<WireCandidate>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    delta_cp: Option<i32>,
}

impl WireMoment {
    fn into_moment(self) -> Result<Moment> {
        let ply = u32::try_from(self.ply)
            .ok()
            .filter(|ply| *ply >= 1)
            .ok_or_else(|| missing(format!("ply must be >= 1, got {}", self.ply)))?;
        let side_to_move = parse_side(&self.side_to_move)?;
        if self.fen_before.trim().is_empty() {
            return Err(missing("fen_before is empty"));
        }
        let uci_played = non_empty(self.uci_played).ok_or_else(|| missing("uci_played"))?;
        let san_played = non_empty(self.san_played).ok_or_else(|| missing("san_played"))?;
        let uci_best = non_empty(self.uci_best).unwrap_or_else(|| uci_played.clone());
        let san_best = non_empty(self.san_best).unwrap_or_else(|| san_played.clone());

        let delta_cp = self.delta_cp.unwrap_or_else(|| {
            match (self.eval_before_cp, self.eval_after_played_cp) {
                (Some(before), Some(after)) => after - before,
                _ => 0,
            }
        });
        let severity =
            non_empty(self.severity).unwrap_or_else(|| classify_swing(delta_cp).to_string());

        Ok(Moment {
            ply,
            side_to_move,
            position_before: Position::new(self.fen_before),
            played_move: Move::new(uci_played, san_played),
            best_move: Move::new(uci_best, san_best),
            pv_best: self.pv_best.into_iter().map(Move::from).collect(),
            pv_played: self.pv_played.into_iter().map(Move::from).collect(),
            candidates_best: self.candidates.into_iter().map(CandidateLine::from).collect(),
            candidates_played: self
                .candidates_played
                .into_iter()
                .map(CandidateLine::from)
                .collect(),
            severity,
            delta_cp,
            eval_before_cp: self.eval_before_cp,
            eval_after_played_cp: self.eval_after_played_cp,
            eval_after_best_cp: self.eval_after_best_cp,
        })
    }
}

fn parse_side(text: &str) -> Result<Side> {
    match text.trim().to_ascii_lowercase().as_str() {
        "white" | "w" => Ok(Side::White),
        "black" | "b" => Ok(Side::Black),
        other => Err(missing(format!("unknown side_to_move `{other}`"))),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn missing(what: impl Into<String>) -> PivotError {
    PivotError::MalformedPayload(format!("required field invalid: {}", what.into()))
}
