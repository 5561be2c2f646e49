use std::{fmt, sync::Arc};

use pivot_types::{
    board::Position,
    game::{CandidateLine, LineSelector, Moment, Move},
    PivotError, Result,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{derive_positions, MoveApplier};

/// Cursor over one moment's lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NavigatorState {
    pub line: LineSelector,
    pub candidate_index: usize,
    pub step_index: usize,
}

/// Description of the move that led to the current position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveLabel {
    Start,
    Move {
        label: String,
        evaluation_cp: Option<i32>,
    },
}

impl fmt::Display for MoveLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MoveLabel::Start => f.write_str("Start position"),
            MoveLabel::Move {
                label,
                evaluation_cp: Some(cp),
            } => write!(f, "{label} (eval {cp})"),
            MoveLabel::Move { label, .. } => f.write_str(label),
        }
    }
}

/// Exposes "the board after the first N moves of the selected line" for one moment.
///
/// The position sequence is rebuilt every time the active move list changes,
/// so `state.step_index` always indexes into `positions`.
pub struct VariationNavigator {
    moment: Arc<Moment>,
    applier: Arc<dyn MoveApplier>,
    state: NavigatorState,
    positions: Vec<Position>,
}

impl VariationNavigator {
    pub fn new(moment: Arc<Moment>, applier: Arc<dyn MoveApplier>) -> Self {
        let mut navigator = Self {
            moment,
            applier,
            state: NavigatorState::default(),
            positions: Vec::new(),
        };
        navigator.rebuild();
        navigator
    }

    pub fn moment(&self) -> &Moment {
        &self.moment
    }

    pub fn state(&self) -> NavigatorState {
        self.state
    }

    pub fn select_line(&mut self, line: LineSelector) {
        self.state = NavigatorState {
            line,
            candidate_index: 0,
            step_index: 0,
        };
        self.rebuild();
    }

    pub fn select_candidate(&mut self, index: usize) -> Result<()> {
        let available = self.candidates().len();
        if index >= available {
            return Err(PivotError::Usage(format!(
                "candidate {index} does not exist ({available} available)"
            )));
        }
        self.state.candidate_index = index;
        self.state.step_index = 0;
        self.rebuild();
        Ok(())
    }

    /// Moves the cursor by `delta`, clamping to the ends of the line.
    pub fn step(&mut self, delta: isize) -> usize {
        let last = self.last_step() as i128;
        let target = (self.state.step_index as i128 + delta as i128).clamp(0, last);
        self.state.step_index = target as usize;
        self.state.step_index
    }

    pub fn current_position(&self) -> &Position {
        &self.positions[self.state.step_index]
    }

    pub fn current_move_label(&self) -> MoveLabel {
        match self.state.step_index.checked_sub(1) {
            None => MoveLabel::Start,
            Some(idx) => {
                let mv = &self.active_moves()[idx];
                MoveLabel::Move {
                    label: mv.label.clone(),
                    evaluation_cp: mv.evaluation_cp,
                }
            }
        }
    }

    /// Candidates for the selected line.
    pub fn candidates(&self) -> &[CandidateLine] {
        self.moment.candidates(self.state.line)
    }

    /// Moves of the selected line. A candidate without its own continuation
    /// falls back to the moment's principal variation.
    pub fn active_moves(&self) -> &[Move] {
        match self.candidates().get(self.state.candidate_index) {
            Some(candidate) if !candidate.principal_variation.is_empty() => {
                &candidate.principal_variation
            }
            _ => self.moment.principal_variation(self.state.line),
        }
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    /// True when some moves of the line could not be reconstructed.
    pub fn is_truncated(&self) -> bool {
        self.positions.len() < self.active_moves().len() + 1
    }

    /// `(current step, last step)`.
    pub fn step_counter(&self) -> (usize, usize) {
        (self.state.step_index, self.last_step())
    }

    pub fn can_step_back(&self) -> bool {
        self.state.step_index > 0
    }

    pub fn can_step_forward(&self) -> bool {
        self.state.step_index < self.last_step()
    }

    /// Labels of the remaining moves, ready to paste elsewhere.
    pub fn line_from_here(&self) -> String {
        self.active_moves()
            .iter()
            .skip(self.state.step_index)
            .map(|mv| mv.label.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn candidate_labels(&self) -> Vec<String> {
        self.candidates()
            .iter()
            .enumerate()
            .map(|(idx, candidate)| {
                let eval = candidate
                    .evaluation_cp
                    .map(|cp| cp.to_string())
                    .unwrap_or_else(|| "N/A".into());
                format!("{}. {} ({eval})", idx + 1, candidate.mv.label)
            })
            .collect()
    }

    pub fn title(&self) -> &'static str {
        match self.state.line {
            LineSelector::Best => "Best line",
            LineSelector::Played => "Played move + best replies",
        }
    }

    fn last_step(&self) -> usize {
        self.positions.len().saturating_sub(1)
    }

    fn rebuild(&mut self) {
        let positions = derive_positions(
            &self.moment.position_before,
            self.active_moves(),
            self.applier.as_ref(),
        );
        debug!(
            "Ply {} {:?} candidate {}: {} positions",
            self.moment.ply,
            self.state.line,
            self.state.candidate_index,
            positions.len()
        );
        self.positions = positions;
        self.state.step_index = self.state.step_index.min(self.last_step());
    }
}
