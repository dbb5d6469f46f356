/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use chessie::{Color, Game, Move, Piece, PieceKind, ZobristKey};

use crate::{
    attacks::{self, BLACK, WHITE},
    PackedMove, TadpoleError,
};

/// Mixed into the position key below an odd number of null moves.
///
/// Keeps positions reached by passing apart from the same positions reached by real moves, so that neither
/// repetition detection nor the transposition table mixes them up.
const NULL_MOVE_SALT: u64 = 0x9D39_247E_3377_6D41;

/// Index of `color` in tables keyed by color.
#[inline(always)]
pub fn color_index(color: Color) -> usize {
    if color.is_white() {
        WHITE
    } else {
        BLACK
    }
}

/// Index of `kind` in tables keyed by piece kind, ordered from pawn to king.
#[inline(always)]
pub const fn kind_index(kind: PieceKind) -> usize {
    match kind {
        PieceKind::Pawn => 0,
        PieceKind::Knight => 1,
        PieceKind::Bishop => 2,
        PieceKind::Rook => 3,
        PieceKind::Queen => 4,
        PieceKind::King => 5,
    }
}

/// Exchange value of a piece, in centipawns.
///
/// The King is given no value, since it can never be captured.
#[inline(always)]
pub const fn value_of(kind: PieceKind) -> i32 {
    match kind {
        PieceKind::Pawn => 100,
        PieceKind::Knight => 320,
        PieceKind::Bishop => 330,
        PieceKind::Rook => 500,
        PieceKind::Queen => 900,
        PieceKind::King => 0,
    }
}

/// Coarse material weight of a piece: three for minors, five for rooks and nine for queens.
#[inline(always)]
const fn level_of(kind: PieceKind) -> u32 {
    match kind {
        PieceKind::Knight | PieceKind::Bishop => 3,
        PieceKind::Rook => 5,
        PieceKind::Queen => 9,
        PieceKind::Pawn | PieceKind::King => 0,
    }
}

/// Key identifying this position, including any pending null move.
///
/// The key is computed from the board rather than read from `Position::key`. Passing the turn leaves the board's
/// incremental key stale for the whole subtree, and `Position::key` asserts that it is not.
#[inline(always)]
pub fn hash_of(game: &Game, null_parity: bool) -> u64 {
    let key = ZobristKey::new(game).inner();
    if null_parity {
        key ^ NULL_MOVE_SALT
    } else {
        key
    }
}

/// Sum of [`level_of`] over all of `color`'s pieces.
pub fn material_level(game: &Game, color: Color) -> u32 {
    game.board()
        .into_iter()
        .filter(|(_, piece)| piece.color() == color)
        .map(|(_, piece)| level_of(piece.kind()))
        .sum()
}

/// Number of pieces, excluding pawns and the King, that `color` has.
pub fn piece_count(game: &Game, color: Color) -> u32 {
    game.board()
        .into_iter()
        .filter(|(_, piece)| {
            piece.color() == color && !matches!(piece.kind(), PieceKind::Pawn | PieceKind::King)
        })
        .count() as u32
}

/// Number of pieces of either color on the board, Kings and pawns included.
pub fn men_count(game: &Game) -> u32 {
    game.board().into_iter().count() as u32
}

/// Returns `true` if `mv` is neither a castle, en passant nor a promotion.
#[inline(always)]
pub fn is_normal(mv: &Move) -> bool {
    !mv.is_short_castle()
        && !mv.is_long_castle()
        && !mv.is_en_passant()
        && mv.promotion().is_none()
}

/// Returns `true` if `mv` captures an enemy piece or promotes.
#[inline(always)]
pub fn is_tactical(mv: &Move) -> bool {
    mv.is_capture() || mv.promotion().is_some()
}

/// Encodes `mv` for the transposition table.
pub fn pack_move(mv: Move) -> PackedMove {
    PackedMove {
        from: mv.from().index() as u8,
        to: mv.to().index() as u8,
        promotion: mv.promotion().map_or(0, |kind| kind_index(kind) as u8 + 1),
    }
}

/// Finds the legal move in `game` that `packed` describes.
///
/// Returns `None` if the stored move is not legal here, as happens after a key collision.
pub fn unpack_move(game: &Game, packed: PackedMove) -> Option<Move> {
    game.get_legal_moves()
        .into_iter()
        .find(|mv| pack_move(*mv) == packed)
}

/// Parses a move in UCI notation, accepting only moves legal in `game`.
pub fn parse_move(game: &Game, uci: &str) -> Result<Move, TadpoleError> {
    game.get_legal_moves()
        .into_iter()
        .find(|mv| mv.to_string() == uci)
        .ok_or_else(|| TadpoleError::IllegalMove {
            mv: uci.to_string(),
            fen: game.to_fen(),
        })
}

/// Parses a FEN string into a [`Game`].
pub fn parse_fen(fen: &str) -> Result<Game, TadpoleError> {
    fen.parse::<Game>()
        .map_err(|err| TadpoleError::InvalidFen {
            fen: fen.to_string(),
            reason: err.to_string(),
        })
}

/// A position together with the keys of every position that led to it.
///
/// Repetitions can only be detected with the game history, so this is what the search is started from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayedGame {
    game: Game,

    /// Keys of all positions so far, the current one last.
    keys: Vec<u64>,
}

impl PlayedGame {
    /// Starts a history at `game`.
    pub fn new(game: Game) -> Self {
        Self {
            keys: vec![hash_of(&game, false)],
            game,
        }
    }

    /// Starts a history at the position described by `fen`.
    pub fn from_fen(fen: &str) -> Result<Self, TadpoleError> {
        parse_fen(fen).map(Self::new)
    }

    /// Plays `mv`, which must be legal.
    pub fn play(&mut self, mv: Move) {
        self.game.make_move(mv);
        self.keys.push(hash_of(&self.game, false));
    }

    /// Plays a move given in UCI notation.
    pub fn play_uci(&mut self, uci: &str) -> Result<Move, TadpoleError> {
        let mv = parse_move(&self.game, uci)?;
        self.play(mv);
        Ok(mv)
    }

    /// The current position.
    #[inline(always)]
    pub fn game(&self) -> &Game {
        &self.game
    }

    /// Keys of every position played, the current one last.
    #[inline(always)]
    pub fn keys(&self) -> &[u64] {
        &self.keys
    }

    /// Number of earlier occurrences of the current position since the last irreversible move.
    pub fn repetitions(&self) -> usize {
        let Some((&current, earlier)) = self.keys.split_last() else {
            return 0;
        };
        let window = (self.game.halfmove() as usize).min(earlier.len());
        earlier[earlier.len() - window..]
            .iter()
            .rev()
            .skip(1)
            .step_by(2)
            .filter(|&&key| key == current)
            .count()
    }

    /// Returns `true` if the game is drawn by threefold repetition, the fifty move rule or insufficient material.
    ///
    /// A checkmate on the move that reaches the fifty move limit still counts as checkmate.
    pub fn is_legal_draw(&self) -> bool {
        if self.repetitions() >= 2 || self.game.can_draw_by_insufficient_material() {
            return true;
        }
        self.game.can_draw_by_fifty()
            && !(self.game.is_in_check() && self.game.get_legal_moves().is_empty())
    }
}

impl Default for PlayedGame {
    fn default() -> Self {
        Self::new(Game::default())
    }
}

/// A snapshot of a board as raw bitboards plus a mailbox.
///
/// Built on demand for the queries the board collaborator does not answer directly:
/// attackers of a square, static exchange evaluation, passed pawns.
#[derive(Debug, Clone)]
pub struct Occupancy {
    colors: [u64; 2],
    kinds: [u64; 6],
    mailbox: [Option<Piece>; 64],
}

impl Occupancy {
    /// Takes a snapshot of `game`.
    pub fn new(game: &Game) -> Self {
        let mut colors = [0; 2];
        let mut kinds = [0; 6];
        let mut mailbox = [None; 64];

        for (square, piece) in game.board() {
            let index = square.index();
            colors[color_index(piece.color())] |= 1 << index;
            kinds[kind_index(piece.kind())] |= 1 << index;
            mailbox[index] = Some(piece);
        }

        Self {
            colors,
            kinds,
            mailbox,
        }
    }

    /// The piece on `square`, if any.
    #[inline(always)]
    pub fn piece_at(&self, square: usize) -> Option<Piece> {
        self.mailbox[square]
    }

    /// All occupied squares.
    #[inline(always)]
    pub fn occupied(&self) -> u64 {
        self.colors[WHITE] | self.colors[BLACK]
    }

    /// Squares occupied by `color` (an index, see [`color_index`]).
    #[inline(always)]
    pub fn color(&self, color: usize) -> u64 {
        self.colors[color]
    }

    /// Squares occupied by pieces of `kind`, of either color.
    #[inline(always)]
    pub fn kind(&self, kind: PieceKind) -> u64 {
        self.kinds[kind_index(kind)]
    }

    /// All pieces of both colors attacking `square`, given `occupied`.
    pub fn attackers_to(&self, square: usize, occupied: u64) -> u64 {
        let diagonal = self.kind(PieceKind::Bishop) | self.kind(PieceKind::Queen);
        let orthogonal = self.kind(PieceKind::Rook) | self.kind(PieceKind::Queen);
        let pawns = self.kind(PieceKind::Pawn);

        (attacks::pawn_attacks(BLACK, square) & pawns & self.colors[WHITE])
            | (attacks::pawn_attacks(WHITE, square) & pawns & self.colors[BLACK])
            | (attacks::knight_attacks(square) & self.kind(PieceKind::Knight))
            | (attacks::king_attacks(square) & self.kind(PieceKind::King))
            | (attacks::bishop_attacks(square, occupied) & diagonal)
            | (attacks::rook_attacks(square, occupied) & orthogonal)
    }

    /// Squares that `piece` would attack from `square`, given `occupied`.
    pub fn attacks_of(&self, piece: Piece, square: usize, occupied: u64) -> u64 {
        match piece.kind() {
            PieceKind::Pawn => attacks::pawn_attacks(color_index(piece.color()), square),
            PieceKind::Knight => attacks::knight_attacks(square),
            PieceKind::Bishop => attacks::bishop_attacks(square, occupied),
            PieceKind::Rook => attacks::rook_attacks(square, occupied),
            PieceKind::Queen => {
                attacks::bishop_attacks(square, occupied) | attacks::rook_attacks(square, occupied)
            }
            PieceKind::King => attacks::king_attacks(square),
        }
    }

    /// Returns `true` if, once `mv` is played, the moved piece attacks `target`.
    pub fn move_attacks(&self, mv: &Move, target: usize) -> bool {
        let from = mv.from().index();
        let to = mv.to().index();
        let Some(piece) = self.piece_at(from) else {
            return false;
        };
        let piece = match mv.promotion() {
            Some(kind) => Piece::new(piece.color(), kind),
            None => piece,
        };
        let occupied = (self.occupied() & !(1 << from)) | (1 << to);
        self.attacks_of(piece, to, occupied) & (1 << target) != 0
    }

    /// The piece captured by `mv`, if any.
    pub fn victim_of(&self, mv: &Move) -> Option<PieceKind> {
        if mv.is_en_passant() {
            return Some(PieceKind::Pawn);
        }
        if !mv.is_capture() {
            return None;
        }
        let mover = self.piece_at(mv.from().index())?;
        self.piece_at(mv.to().index())
            .filter(|victim| victim.color() != mover.color())
            .map(|victim| victim.kind())
    }

    /// The kind of the piece `mv` moves.
    #[inline(always)]
    pub fn mover_of(&self, mv: &Move) -> Option<PieceKind> {
        self.piece_at(mv.from().index()).map(|piece| piece.kind())
    }

    /// Returns `true` if `mv` moves a passed pawn to a square whose rank, relative to the mover, is at least `rank`.
    ///
    /// Ranks count from zero, so the seventh rank is `6`.
    pub fn is_passed_pawn_push(&self, mv: &Move, rank: usize) -> bool {
        let from = mv.from().index();
        let Some(piece) = self.piece_at(from) else {
            return false;
        };
        if piece.kind() != PieceKind::Pawn {
            return false;
        }

        let color = color_index(piece.color());
        let to = mv.to().index();
        let relative_rank = if color == WHITE { to / 8 } else { 7 - to / 8 };
        if relative_rank < rank {
            return false;
        }

        let enemy_pawns = self.kind(PieceKind::Pawn) & self.colors[color ^ 1];
        attacks::passed_pawn_mask(color, to) & enemy_pawns == 0
    }

    /// Returns `true` if `mv` is a pawn move onto the mover's seventh rank.
    pub fn is_pawn_push_to_seventh(&self, mv: &Move) -> bool {
        let Some(piece) = self.piece_at(mv.from().index()) else {
            return false;
        };
        if piece.kind() != PieceKind::Pawn {
            return false;
        }
        let to = mv.to().index();
        let relative_rank = if piece.color().is_white() {
            to / 8
        } else {
            7 - to / 8
        };
        relative_rank == 6
    }

    /// Returns `true` if `square` holds a pawn standing on its own seventh rank.
    pub fn is_pawn_on_seventh(&self, square: usize) -> bool {
        match self.piece_at(square) {
            Some(piece) if piece.kind() == PieceKind::Pawn => {
                let rank = square / 8;
                if piece.color().is_white() {
                    rank == 6
                } else {
                    rank == 1
                }
            }
            _ => false,
        }
    }

    /// Returns `true` if `mv` reveals an attack on the enemy King by a friendly slider.
    pub fn is_discovered_check(&self, mv: &Move) -> bool {
        let from = mv.from().index();
        let Some(piece) = self.piece_at(from) else {
            return false;
        };
        let us = color_index(piece.color());
        let enemy_king = self.kind(PieceKind::King) & self.colors[us ^ 1];
        if enemy_king == 0 {
            return false;
        }
        let king = enemy_king.trailing_zeros() as usize;

        let occupied = (self.occupied() & !(1 << from)) | (1 << mv.to().index());
        let diagonal =
            (self.kind(PieceKind::Bishop) | self.kind(PieceKind::Queen)) & self.colors[us];
        let orthogonal =
            (self.kind(PieceKind::Rook) | self.kind(PieceKind::Queen)) & self.colors[us];
        let sliders = ((attacks::bishop_attacks(king, occupied) & diagonal)
            | (attacks::rook_attacks(king, occupied) & orthogonal))
            & !(1 << from);

        // Only count sliders whose line ran through the start square
        let mut candidates = sliders;
        while candidates != 0 {
            let slider = candidates.trailing_zeros() as usize;
            if attacks::between(slider, king) & (1 << from) != 0 {
                return true;
            }
            candidates &= candidates - 1;
        }
        false
    }
}
