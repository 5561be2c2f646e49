//! Position reconstruction and line navigation for reported moments.

pub mod derive;
pub mod navigator;
pub mod notation;
pub mod placement;

use pivot_types::{board::Position, PivotError, Result};

pub use derive::derive_positions;
pub use navigator::{MoveLabel, NavigatorState, VariationNavigator};
pub use notation::UciMove;
pub use placement::PlacementApplier;

/// Capability that plays one move on a serialized position.
///
/// Implementations return [`PivotError::IllegalMove`] when the move cannot be
/// applied; callers treat that as the end of what can be reconstructed.
pub trait MoveApplier: Send + Sync {
    fn apply(&self, position: &Position, mv: &UciMove) -> Result<Position>;
}

pub fn illegal_move(notation: impl Into<String>, reason: impl Into<String>) -> PivotError {
    PivotError::IllegalMove {
        notation: notation.into(),
        reason: reason.into(),
    }
}
