use std::fmt;

use pivot_types::{
    board::{PieceKind, Square},
    Result,
};

use crate::illegal_move;

/// Origin/destination/promotion triple decoded from engine notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UciMove {
    pub from: Square,
    pub to: Square,
    pub promotion: Option<PieceKind>,
}

impl UciMove {
    pub fn parse(notation: &str) -> Result<Self> {
        let text = notation.trim();
        if !text.is_ascii() || !(4..=5).contains(&text.len()) {
            return Err(illegal_move(notation, "expected 4 or 5 characters"));
        }
        let from = Square::parse(&text[0..2])
            .ok_or_else(|| illegal_move(notation, "bad origin square"))?;
        let to = Square::parse(&text[2..4])
            .ok_or_else(|| illegal_move(notation, "bad destination square"))?;
        let promotion = match text[4..].chars().next() {
            None => None,
            Some(c) => match PieceKind::from_char(c) {
                Some(
                    kind @ (PieceKind::Queen
                    | PieceKind::Rook
                    | PieceKind::Bishop
                    | PieceKind::Knight),
                ) => Some(kind),
                _ => {
                    return Err(illegal_move(
                        notation,
                        format!("bad promotion piece `{c}`"),
                    ))
                }
            },
        };
        if from == to {
            return Err(illegal_move(notation, "origin equals destination"));
        }
        Ok(Self {
            from,
            to,
            promotion,
        })
    }
}

impl fmt::Display for UciMove {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.from, self.to)?;
        if let Some(kind) = self.promotion {
            write!(f, "{}", kind.to_char())?;
        }
        Ok(())
    }
}
