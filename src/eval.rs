/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::fmt;

use chessie::{Color, File, Game, Piece, PieceKind, Rank, Square};

use crate::{position::value_of, Score};

/// Material of both sides in the starting position.
const INITIAL_MATERIAL_VALUE: i32 = value_of(PieceKind::Pawn) * 16
    + value_of(PieceKind::Knight) * 4
    + value_of(PieceKind::Bishop) * 4
    + value_of(PieceKind::Rook) * 4
    + value_of(PieceKind::Queen) * 2;

/// Static evaluation of a position, consumed by the search at leaves and for pruning margins.
///
/// Implementations must be deterministic for a fixed position and are shared by every search thread.
pub trait Evaluate: Send + Sync {
    /// Scores `game` from the side-to-move's perspective.
    fn evaluate(&self, game: &Game) -> Score;
}

/// Material plus a handful of piece-placement terms, interpolated between middle-game and end-game weights.
#[derive(Debug, Default, Clone, Copy)]
pub struct Evaluator;

impl Evaluate for Evaluator {
    #[inline(always)]
    fn evaluate(&self, game: &Game) -> Score {
        Evaluation::new(game).score_for(game.side_to_move())
    }
}

/// A single evaluation of a position, kept around so it can be printed.
#[derive(Debug, Clone)]
pub struct Evaluation<'a> {
    game: &'a Game,

    /// How far the material has been traded down, in `[0, 100]`.
    endgame_weight: i32,
}

impl<'a> Evaluation<'a> {
    /// Prepares an evaluation of `game`.
    #[inline(always)]
    pub fn new(game: &'a Game) -> Self {
        Self {
            game,
            endgame_weight: endgame_weight(game),
        }
    }

    /// Sum of every piece's tapered value, positive when `color` is ahead.
    pub fn score_for(&self, color: Color) -> Score {
        let mut score = Score::DRAW;

        for (square, piece) in self.game.board() {
            let value = piece_score(piece, square, self.endgame_weight);
            if piece.color() == color {
                score += value;
            } else {
                score -= value;
            }
        }

        score
    }

    /// The value for the piece on the specified square from White's perspective, if one exists.
    fn value_at(&self, square: Square) -> Option<Score> {
        self.game.piece_at(square).map(|piece| {
            let value = piece_score(piece, square, self.endgame_weight);
            if piece.color().is_white() {
                Score::new(value)
            } else {
                -Score::new(value)
            }
        })
    }
}

impl fmt::Display for Evaluation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let separator = |f: &mut fmt::Formatter<'_>| -> fmt::Result {
            write!(f, "  +")?;
            for _ in File::iter() {
                write!(f, "-----+")?;
            }
            writeln!(f)
        };

        separator(f)?;
        for rank in Rank::iter().rev() {
            write!(f, "{rank} |")?;
            for file in File::iter() {
                let piece = self.game.piece_at(Square::new(file, rank));
                write!(f, "  {}  |", piece.map(|p| p.char()).unwrap_or(' '))?;
            }
            writeln!(f)?;

            write!(f, "  |")?;
            for file in File::iter() {
                match self.value_at(Square::new(file, rank)) {
                    Some(value) => write!(f, "{:^5}|", format!("{:+}", value.normalize()))?,
                    None => write!(f, "     |")?,
                }
            }
            writeln!(f)?;
            separator(f)?;
        }
        for file in File::iter() {
            write!(f, "     {file}")?;
        }

        let color = self.game.side_to_move();
        writeln!(f, "\n\nEndgame: {}%", self.endgame_weight)?;
        writeln!(f, "Side to move: {}", color.name())?;
        write!(f, "Score: {}", self.score_for(color))
    }
}

/// Distance of a square from the center, in `[0, 3]`.
#[inline(always)]
const fn center_distance(file: i32, rank: i32) -> i32 {
    let df = (2 * file - 7).abs();
    let dr = (2 * rank - 7).abs();
    (if df > dr { df } else { dr }) / 2
}

/// Middle-game and end-game placement bonuses for `kind` on `square`, relative to its owner.
fn placement(kind: PieceKind, file: i32, rank: i32) -> (i32, i32) {
    let centrality = 3 - center_distance(file, rank);
    match kind {
        PieceKind::Pawn => {
            let central_file = (file == 3 || file == 4) as i32;
            (4 * rank + 10 * central_file * (rank >= 3) as i32, 12 * rank)
        }
        PieceKind::Knight => (12 * centrality - 10, 8 * centrality - 8),
        PieceKind::Bishop => (6 * centrality, 4 * centrality),
        PieceKind::Rook => {
            let seventh = (rank == 6) as i32;
            (20 * seventh, 10 * seventh)
        }
        PieceKind::Queen => (2 * centrality, 8 * centrality),
        PieceKind::King => {
            let sheltered = (rank == 0 && file != 3 && file != 4) as i32;
            (20 * sheltered - 15 * rank, 12 * centrality - 10)
        }
    }
}

/// Tapered value of `piece` standing on `square`.
#[inline(always)]
fn piece_score(piece: Piece, square: Square, endgame_weight: i32) -> i32 {
    let index = square.index() as i32;
    let file = index % 8;
    let rank = if piece.color().is_white() {
        index / 8
    } else {
        7 - index / 8
    };

    let (mg, eg) = placement(piece.kind(), file, rank);
    let value = value_of(piece.kind());
    Score::new(value + mg)
        .lerp(Score::new(value + eg), endgame_weight)
        .inner()
}

/// Material on the board for both sides. Kings are worth nothing here.
#[inline(always)]
fn material_remaining(game: &Game) -> i32 {
    game.board()
        .into_iter()
        .map(|(_, piece)| value_of(piece.kind()))
        .sum()
}

/// Share of the starting material that has been traded off, as a percentage.
#[inline(always)]
fn endgame_weight(game: &Game) -> i32 {
    let remaining = (INITIAL_MATERIAL_VALUE - material_remaining(game)).max(0);
    (remaining * 100 / INITIAL_MATERIAL_VALUE).min(100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::parse_fen;

    #[test]
    fn test_startpos_is_balanced() {
        let game = Game::default();
        assert_eq!(Evaluator.evaluate(&game), Score::DRAW);
        assert_eq!(endgame_weight(&game), 0);
    }

    #[test]
    fn test_symmetry() {
        // Mirrored positions must evaluate identically for the side to move
        let white = parse_fen("4k3/8/8/8/3P4/2N5/8/4K3 w - - 0 1").unwrap();
        let black = parse_fen("4k3/8/2n5/3p4/8/8/8/4K3 b - - 0 1").unwrap();
        assert_eq!(Evaluator.evaluate(&white), Evaluator.evaluate(&black));
        assert!(Evaluator.evaluate(&white) > Score::PAWN);
    }

    #[test]
    fn test_display_does_not_panic() {
        let game = Game::default();
        let shown = Evaluation::new(&game).to_string();
        assert!(shown.contains("Endgame: 0%"));
    }
}
