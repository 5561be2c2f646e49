use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{PivotError, Result};

/// FEN of the standard starting position.
pub const INITIAL_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Represents the two players in a chess game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    White,
    Black,
}

impl Side {
    pub fn opponent(self) -> Self {
        match self {
            Side::White => Side::Black,
            Side::Black => Side::White,
        }
    }

    fn fen_char(self) -> char {
        match self {
            Side::White => 'w',
            Side::Black => 'b',
        }
    }
}

/// Opaque serialized board state (FEN). Compared and passed around, never edited in place.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Position(String);

impl Position {
    pub fn new(fen: impl Into<String>) -> Self {
        Self(fen.into())
    }

    pub fn initial() -> Self {
        Self::new(INITIAL_FEN)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PieceKind {
    King,
    Queen,
    Rook,
    Bishop,
    Knight,
    Pawn,
}

impl PieceKind {
    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_lowercase() {
            'k' => Some(PieceKind::King),
            'q' => Some(PieceKind::Queen),
            'r' => Some(PieceKind::Rook),
            'b' => Some(PieceKind::Bishop),
            'n' => Some(PieceKind::Knight),
            'p' => Some(PieceKind::Pawn),
            _ => None,
        }
    }

    pub fn to_char(self) -> char {
        match self {
            PieceKind::King => 'k',
            PieceKind::Queen => 'q',
            PieceKind::Rook => 'r',
            PieceKind::Bishop => 'b',
            PieceKind::Knight => 'n',
            PieceKind::Pawn => 'p',
        }
    }
}

/// Board coordinate (0-indexed): file 0 is the a-file, rank 0 is the first rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Square {
    pub file: u8,
    pub rank: u8,
}

impl Square {
    pub fn new(file: u8, rank: u8) -> Self {
        Self { file, rank }
    }

    /// Parses algebraic coordinates such as `e4`.
    pub fn parse(text: &str) -> Option<Square> {
        let mut chars = text.chars();
        let (file, rank) = (chars.next()?, chars.next()?);
        if chars.next().is_some() || !('a'..='h').contains(&file) || !('1'..='8').contains(&rank) {
            return None;
        }
        Some(Square::new(file as u8 - b'a', rank as u8 - b'1'))
    }

    pub fn offset(&self, df: i8, dr: i8) -> Option<Square> {
        let nf = self.file as i16 + df as i16;
        let nr = self.rank as i16 + dr as i16;
        if (0..BoardState::SIZE as i16).contains(&nf) && (0..BoardState::SIZE as i16).contains(&nr)
        {
            Some(Square::new(nf as u8, nr as u8))
        } else {
            None
        }
    }
}

impl fmt::Display for Square {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", (b'a' + self.file) as char, self.rank + 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Piece {
    pub owner: Side,
    pub kind: PieceKind,
}

impl Piece {
    pub fn new(owner: Side, kind: PieceKind) -> Self {
        Self { owner, kind }
    }

    fn from_fen_char(c: char) -> Option<Self> {
        let kind = PieceKind::from_char(c)?;
        let owner = if c.is_ascii_uppercase() {
            Side::White
        } else {
            Side::Black
        };
        Some(Self { owner, kind })
    }

    fn fen_char(self) -> char {
        let c = self.kind.to_char();
        match self.owner {
            Side::White => c.to_ascii_uppercase(),
            Side::Black => c,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CastlingRights {
    pub white_king: bool,
    pub white_queen: bool,
    pub black_king: bool,
    pub black_queen: bool,
}

impl CastlingRights {
    fn parse(field: &str) -> Result<Self> {
        let mut rights = Self::default();
        if field == "-" {
            return Ok(rights);
        }
        for c in field.chars() {
            match c {
                'K' => rights.white_king = true,
                'Q' => rights.white_queen = true,
                'k' => rights.black_king = true,
                'q' => rights.black_queen = true,
                _ => return Err(fen_error(format!("invalid castling field `{field}`"))),
            }
        }
        Ok(rights)
    }

    /// Drops rights tied to a king or rook leaving (or being captured on) `square`.
    pub fn revoke_for(&mut self, square: Square) {
        match (square.file, square.rank) {
            (4, 0) => {
                self.white_king = false;
                self.white_queen = false;
            }
            (4, 7) => {
                self.black_king = false;
                self.black_queen = false;
            }
            (0, 0) => self.white_queen = false,
            (7, 0) => self.white_king = false,
            (0, 7) => self.black_queen = false,
            (7, 7) => self.black_king = false,
            _ => {}
        }
    }

    fn to_fen(self) -> String {
        let mut out = String::new();
        for (flag, c) in [
            (self.white_king, 'K'),
            (self.white_queen, 'Q'),
            (self.black_king, 'k'),
            (self.black_queen, 'q'),
        ] {
            if flag {
                out.push(c);
            }
        }
        if out.is_empty() {
            out.push('-');
        }
        out
    }
}

/// Mailbox board decoded from a [`Position`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardState {
    pub side_to_move: Side,
    pub pieces: Vec<Option<Piece>>,
    pub castling: CastlingRights,
    pub en_passant: Option<Square>,
    pub halfmove_clock: u32,
    pub fullmove_number: u32,
}

impl BoardState {
    pub const SIZE: u8 = 8;

    pub fn empty() -> Self {
        Self {
            side_to_move: Side::White,
            pieces: vec![None; (Self::SIZE as usize) * (Self::SIZE as usize)],
            castling: CastlingRights::default(),
            en_passant: None,
            halfmove_clock: 0,
            fullmove_number: 1,
        }
    }

    /// Decodes a FEN. Only the placement field is mandatory; the rest default
    /// to white to move, no castling, no en passant target.
    pub fn from_position(position: &Position) -> Result<Self> {
        let mut fields = position.as_str().split_whitespace();
        let placement = fields
            .next()
            .ok_or_else(|| fen_error("empty position"))?;

        let mut board = Self::empty();
        let ranks: Vec<&str> = placement.split('/').collect();
        if ranks.len() != Self::SIZE as usize {
            return Err(fen_error(format!(
                "expected 8 ranks, found {} in `{placement}`",
                ranks.len()
            )));
        }
        for (row, rank_text) in ranks.iter().enumerate() {
            let rank = Self::SIZE - 1 - row as u8;
            let mut file: u8 = 0;
            for c in rank_text.chars() {
                if let Some(skip) = c.to_digit(10) {
                    file = file
                        .checked_add(skip as u8)
                        .filter(|next| *next <= Self::SIZE)
                        .ok_or_else(|| {
                            fen_error(format!("rank `{rank_text}` overflows the board"))
                        })?;
                    continue;
                }
                let piece = Piece::from_fen_char(c)
                    .ok_or_else(|| fen_error(format!("invalid piece `{c}`")))?;
                if !board.set_piece(Square::new(file, rank), Some(piece)) {
                    return Err(fen_error(format!("rank `{rank_text}` overflows the board")));
                }
                file += 1;
            }
            if file != Self::SIZE {
                return Err(fen_error(format!("rank `{rank_text}` does not span 8 files")));
            }
        }

        board.side_to_move = match fields.next() {
            None | Some("w") => Side::White,
            Some("b") => Side::Black,
            Some(other) => return Err(fen_error(format!("invalid side to move `{other}`"))),
        };
        if let Some(field) = fields.next() {
            board.castling = CastlingRights::parse(field)?;
        }
        board.en_passant = match fields.next() {
            None | Some("-") => None,
            Some(field) => Some(
                Square::parse(field)
                    .ok_or_else(|| fen_error(format!("invalid en passant square `{field}`")))?,
            ),
        };
        if let Some(field) = fields.next() {
            board.halfmove_clock = field
                .parse()
                .map_err(|_| fen_error(format!("invalid halfmove clock `{field}`")))?;
        }
        if let Some(field) = fields.next() {
            board.fullmove_number = field
                .parse()
                .map_err(|_| fen_error(format!("invalid fullmove number `{field}`")))?;
        }
        Ok(board)
    }

    pub fn to_position(&self) -> Position {
        let mut placement = String::new();
        for rank in (0..Self::SIZE).rev() {
            let mut gap = 0;
            for file in 0..Self::SIZE {
                match self.piece_at(Square::new(file, rank)) {
                    Some(piece) => {
                        if gap > 0 {
                            placement.push_str(&gap.to_string());
                            gap = 0;
                        }
                        placement.push(piece.fen_char());
                    }
                    None => gap += 1,
                }
            }
            if gap > 0 {
                placement.push_str(&gap.to_string());
            }
            if rank > 0 {
                placement.push('/');
            }
        }
        let en_passant = self
            .en_passant
            .map(|sq| sq.to_string())
            .unwrap_or_else(|| "-".into());
        Position::new(format!(
            "{placement} {} {} {en_passant} {} {}",
            self.side_to_move.fen_char(),
            self.castling.to_fen(),
            self.halfmove_clock,
            self.fullmove_number
        ))
    }

    pub fn index(&self, square: Square) -> Option<usize> {
        if square.file < Self::SIZE && square.rank < Self::SIZE {
            Some((square.rank as usize) * (Self::SIZE as usize) + square.file as usize)
        } else {
            None
        }
    }

    pub fn piece_at(&self, square: Square) -> Option<Piece> {
        self.index(square)
            .and_then(|idx| self.pieces.get(idx).copied().flatten())
    }

    pub fn set_piece(&mut self, square: Square, piece: Option<Piece>) -> bool {
        if let Some(idx) = self.index(square) {
            if let Some(slot) = self.pieces.get_mut(idx) {
                *slot = piece;
                return true;
            }
        }
        false
    }

    /// Relocates whatever stands on `from`, returning the piece previously on `to`.
    pub fn move_piece(&mut self, from: Square, to: Square) -> Result<Option<Piece>> {
        let moving = self
            .piece_at(from)
            .ok_or_else(|| fen_error(format!("no piece on {from}")))?;
        let captured = self.piece_at(to);
        if !self.set_piece(to, Some(moving)) {
            return Err(fen_error(format!("target square {to} is off the board")));
        }
        self.set_piece(from, None);
        Ok(captured)
    }

    pub fn is_empty(&self, square: Square) -> bool {
        self.piece_at(square).is_none()
    }
}

fn fen_error(message: impl Into<String>) -> PivotError {
    PivotError::MalformedPayload(format!("bad position: {}", message.into()))
}
