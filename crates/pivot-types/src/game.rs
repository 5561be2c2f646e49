use serde::{Deserialize, Serialize};

use crate::board::{Position, Side};

/// A single move of a line, in engine notation plus its human label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Move {
    /// Engine notation, e.g. `e2e4` or `e7e8q`.
    pub id: String,
    /// Human notation, e.g. `e4`.
    pub label: String,
    /// Authoritative position after the move, when the backend supplied one.
    pub resulting_position: Option<Position>,
    pub evaluation_cp: Option<i32>,
}

impl Move {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            resulting_position: None,
            evaluation_cp: None,
        }
    }

    pub fn with_position(mut self, position: Position) -> Self {
        self.resulting_position = Some(position);
        self
    }

    pub fn with_evaluation(mut self, cp: i32) -> Self {
        self.evaluation_cp = Some(cp);
        self
    }
}

/// One alternative continuation considered at a moment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateLine {
    pub mv: Move,
    pub evaluation_cp: Option<i32>,
    pub principal_variation: Vec<Move>,
}

/// Which line of a moment is being explored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LineSelector {
    #[default]
    Best,
    Played,
}

/// A pivotal ply of the analysed game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Moment {
    pub ply: u32,
    pub side_to_move: Side,
    pub position_before: Position,
    pub played_move: Move,
    pub best_move: Move,
    pub pv_best: Vec<Move>,
    pub pv_played: Vec<Move>,
    pub candidates_best: Vec<CandidateLine>,
    pub candidates_played: Vec<CandidateLine>,
    pub severity: String,
    pub delta_cp: i32,
    pub eval_before_cp: Option<i32>,
    pub eval_after_played_cp: Option<i32>,
    pub eval_after_best_cp: Option<i32>,
}

impl Moment {
    pub fn principal_variation(&self, line: LineSelector) -> &[Move] {
        match line {
            LineSelector::Best => &self.pv_best,
            LineSelector::Played => &self.pv_played,
        }
    }

    pub fn candidates(&self, line: LineSelector) -> &[CandidateLine] {
        match line {
            LineSelector::Best => &self.candidates_best,
            LineSelector::Played => &self.candidates_played,
        }
    }
}

/// Severity label for an evaluation swing, used when the backend omits one.
pub fn classify_swing(delta_cp: i32) -> &'static str {
    match delta_cp.unsigned_abs() {
        300.. => "blunder",
        100..=299 => "mistake",
        50..=99 => "inaccuracy",
        _ => "swing",
    }
}
