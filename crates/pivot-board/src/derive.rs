//! Turns a start position plus a move list into the positions along the line.

use pivot_types::{board::Position, game::Move};
use tracing::{debug, warn};

use crate::{MoveApplier, UciMove};

/// Positions after each prefix of `moves`, starting with `start` itself.
///
/// When every move carries a precomputed resulting position those are used
/// verbatim and `applier` is never consulted. Otherwise every move is played
/// through `applier`; the first move that cannot be parsed or applied ends the
/// sequence, and the positions reconstructed so far are returned.
pub fn derive_positions<A>(start: &Position, moves: &[Move], applier: &A) -> Vec<Position>
where
    A: MoveApplier + ?Sized,
{
    let mut positions = Vec::with_capacity(moves.len() + 1);
    positions.push(start.clone());

    let precomputed: Option<Vec<&Position>> = moves
        .iter()
        .map(|mv| mv.resulting_position.as_ref())
        .collect();
    if let Some(precomputed) = precomputed {
        positions.extend(precomputed.into_iter().cloned());
        return positions;
    }

    debug!("Replaying {} moves from {}", moves.len(), start);
    let mut working = start.clone();
    for (idx, mv) in moves.iter().enumerate() {
        let next = UciMove::parse(&mv.id).and_then(|parsed| applier.apply(&working, &parsed));
        match next {
            Ok(position) => {
                positions.push(position.clone());
                working = position;
            }
            Err(err) => {
                warn!(
                    "Line truncated at move {} of {} ({}): {err}",
                    idx + 1,
                    moves.len(),
                    mv.label
                );
                break;
            }
        }
    }
    positions
}
