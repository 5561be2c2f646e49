//! Placement-level move application over FEN.
//!
//! Checks each piece's movement pattern and that sliding pieces have a clear
//! path, moves pieces, handles the castling rook, en passant captures and
//! promotions, and keeps the FEN bookkeeping fields up to date. It does not
//! verify king safety: moves that leave or pass through check are accepted.

use pivot_types::{
    board::{BoardState, CastlingRights, Piece, PieceKind, Position, Side, Square},
    Result,
};
use tracing::trace;

use crate::{illegal_move, MoveApplier, UciMove};

#[derive(Debug, Default, Clone, Copy)]
pub struct PlacementApplier;

impl PlacementApplier {
    pub fn new() -> Self {
        Self
    }
}

impl MoveApplier for PlacementApplier {
    fn apply(&self, position: &Position, mv: &UciMove) -> Result<Position> {
        let notation = mv.to_string();
        let mut board = BoardState::from_position(position)
            .map_err(|err| illegal_move(&notation, err.to_string()))?;

        let piece = board
            .piece_at(mv.from)
            .ok_or_else(|| illegal_move(&notation, format!("no piece on {}", mv.from)))?;
        if piece.owner != board.side_to_move {
            return Err(illegal_move(
                &notation,
                format!("{:?} is not to move", piece.owner),
            ));
        }
        let mut captured = board.piece_at(mv.to);
        if let Some(target) = captured {
            if target.owner == piece.owner {
                return Err(illegal_move(&notation, "destination holds own piece"));
            }
            if target.kind == PieceKind::King {
                return Err(illegal_move(&notation, "kings cannot be captured"));
            }
        }

        check_movement(&board, piece, mv).map_err(|reason| illegal_move(&notation, reason))?;

        let last_rank = match piece.owner {
            Side::White => BoardState::SIZE - 1,
            Side::Black => 0,
        };
        if mv.promotion.is_some() && (piece.kind != PieceKind::Pawn || mv.to.rank != last_rank) {
            return Err(illegal_move(&notation, "only pawns reaching the last rank promote"));
        }

        if piece.kind == PieceKind::Pawn && mv.from.file != mv.to.file && captured.is_none() {
            if board.en_passant != Some(mv.to) {
                return Err(illegal_move(&notation, "diagonal pawn move without capture"));
            }
            let victim = Square::new(mv.to.file, mv.from.rank);
            captured = board.piece_at(victim);
            board.set_piece(victim, None);
        }

        if piece.kind == PieceKind::King
            && mv.from.rank == mv.to.rank
            && mv.from.file.abs_diff(mv.to.file) == 2
        {
            let rank = mv.from.rank;
            let (rook_from, rook_to) = if mv.to.file > mv.from.file {
                (Square::new(7, rank), Square::new(5, rank))
            } else {
                (Square::new(0, rank), Square::new(3, rank))
            };
            if board.piece_at(rook_from) != Some(Piece::new(piece.owner, PieceKind::Rook)) {
                return Err(illegal_move(&notation, "no rook to castle with"));
            }
            board.move_piece(rook_from, rook_to)?;
            trace!("castling rook {} -> {}", rook_from, rook_to);
        }

        board.move_piece(mv.from, mv.to)?;
        if piece.kind == PieceKind::Pawn && mv.to.rank == last_rank {
            let kind = mv.promotion.unwrap_or(PieceKind::Queen);
            board.set_piece(mv.to, Some(Piece::new(piece.owner, kind)));
        }

        board.castling.revoke_for(mv.from);
        board.castling.revoke_for(mv.to);
        let double_step = mv.from.rank.abs_diff(mv.to.rank) == 2;
        board.en_passant = if piece.kind == PieceKind::Pawn && double_step {
            Some(Square::new(mv.from.file, (mv.from.rank + mv.to.rank) / 2))
        } else {
            None
        };
        board.halfmove_clock = if piece.kind == PieceKind::Pawn || captured.is_some() {
            0
        } else {
            board.halfmove_clock.saturating_add(1)
        };
        if piece.owner == Side::Black {
            board.fullmove_number = board.fullmove_number.saturating_add(1);
        }
        board.side_to_move = piece.owner.opponent();
        Ok(board.to_position())
    }
}

type Movement = std::result::Result<(), &'static str>;

fn check_movement(board: &BoardState, piece: Piece, mv: &UciMove) -> Movement {
    let df = mv.to.file as i8 - mv.from.file as i8;
    let dr = mv.to.rank as i8 - mv.from.rank as i8;
    let straight = df == 0 || dr == 0;
    let diagonal = df.abs() == dr.abs();
    match piece.kind {
        PieceKind::Knight if matches!((df.abs(), dr.abs()), (1, 2) | (2, 1)) => Ok(()),
        PieceKind::Knight => Err("knights jump two squares one way and one the other"),
        PieceKind::Bishop if diagonal => clear_path(board, mv.from, df, dr),
        PieceKind::Rook if straight => clear_path(board, mv.from, df, dr),
        PieceKind::Queen if straight || diagonal => clear_path(board, mv.from, df, dr),
        PieceKind::Bishop | PieceKind::Rook | PieceKind::Queen => {
            Err("piece cannot move along that line")
        }
        PieceKind::King if df.abs() <= 1 && dr.abs() <= 1 => Ok(()),
        PieceKind::King if dr == 0 && df.abs() == 2 => check_castling(board, piece.owner, mv, df),
        PieceKind::King => Err("kings move one square"),
        PieceKind::Pawn => check_pawn(board, piece.owner, mv, df, dr),
    }
}

/// Every square strictly between `from` and `from + (df, dr)` must be empty.
fn clear_path(board: &BoardState, from: Square, df: i8, dr: i8) -> Movement {
    let (step_f, step_r) = (df.signum(), dr.signum());
    for i in 1..df.abs().max(dr.abs()) {
        let square = from
            .offset(step_f * i, step_r * i)
            .ok_or("path leaves the board")?;
        if board.piece_at(square).is_some() {
            return Err("path is blocked");
        }
    }
    Ok(())
}

fn check_castling(board: &BoardState, side: Side, mv: &UciMove, df: i8) -> Movement {
    let home_rank = match side {
        Side::White => 0,
        Side::Black => BoardState::SIZE - 1,
    };
    if mv.from != Square::new(4, home_rank) {
        return Err("castling starts from the king's home square");
    }
    let CastlingRights {
        white_king,
        white_queen,
        black_king,
        black_queen,
    } = board.castling;
    let (allowed, rook_df) = match (side, df > 0) {
        (Side::White, true) => (white_king, 3),
        (Side::White, false) => (white_queen, -4),
        (Side::Black, true) => (black_king, 3),
        (Side::Black, false) => (black_queen, -4),
    };
    if !allowed {
        return Err("castling right already lost");
    }
    clear_path(board, mv.from, rook_df, 0)
}

fn check_pawn(board: &BoardState, side: Side, mv: &UciMove, df: i8, dr: i8) -> Movement {
    let (forward, start_rank) = match side {
        Side::White => (1, 1),
        Side::Black => (-1, BoardState::SIZE - 2),
    };
    let target_empty = board.piece_at(mv.to).is_none();
    match (df.abs(), dr) {
        (0, dr) if dr == forward && target_empty => Ok(()),
        (0, dr) if dr == 2 * forward && mv.from.rank == start_rank && target_empty => {
            clear_path(board, mv.from, 0, dr)
        }
        (0, _) if !target_empty => Err("pawns cannot capture straight ahead"),
        // capture legality is settled by the caller, which knows the en passant target
        (1, dr) if dr == forward => Ok(()),
        _ => Err("pawns advance one square, two from their start, or capture diagonally"),
    }
}
