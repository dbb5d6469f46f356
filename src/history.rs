/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::ops::Index;

use chessie::{Move, Piece};

use crate::{
    position::{color_index, kind_index},
    Depth,
};

/// Largest magnitude a history score may reach.
const MAX_HISTORY: i32 = 16_384;

/// Stores bonuses and penalties for moving a piece to a square.
///
/// Used to order quiet moves that caused cutoffs elsewhere in the tree. One table per search thread.
#[derive(Debug, Clone)]
pub struct HistoryTable(Box<[[[i32; 64]; 6]; 2]>);

impl HistoryTable {
    /// Clear the history table, removing all scores.
    #[inline(always)]
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Bonus earned by a move that was best at `depth`.
    #[inline(always)]
    pub fn bonus(depth: Depth) -> i32 {
        let plies = depth.plies().max(1);
        (plies * plies).min(400) * 8
    }

    /// Applies a bonus (or, if negative, a penalty) to `piece` moving to the destination of `mv`.
    ///
    /// Uses the "history gravity" formula from <https://www.chessprogramming.org/History_Heuristic#History_Bonuses>
    #[inline(always)]
    pub fn update(&mut self, piece: Piece, mv: &Move, bonus: i32) {
        let slot = &mut self.0[color_index(piece.color())][kind_index(piece.kind())][mv.to().index()];
        let clamped = bonus.clamp(-MAX_HISTORY, MAX_HISTORY);
        *slot += clamped - *slot * clamped.abs() / MAX_HISTORY;
    }

    /// Score of `piece` moving to the destination of `mv`.
    #[inline(always)]
    pub fn get(&self, piece: Piece, mv: &Move) -> i32 {
        self.0[color_index(piece.color())][kind_index(piece.kind())][mv.to().index()]
    }
}

impl Default for HistoryTable {
    #[inline(always)]
    fn default() -> Self {
        Self(Box::new([[[0; 64]; 6]; 2]))
    }
}

/// The two most recent quiet moves that caused a cutoff at one ply.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Killers([Option<Move>; 2]);

impl Killers {
    /// Records `mv`, pushing out the older killer unless `mv` is already the newest.
    #[inline(always)]
    pub fn push(&mut self, mv: Move) {
        if self.0[0] != Some(mv) {
            self.0[1] = self.0[0];
            self.0[0] = Some(mv);
        }
    }

    /// Returns `true` if `mv` is one of the stored killers.
    #[inline(always)]
    pub fn contains(&self, mv: &Move) -> bool {
        self.0.contains(&Some(*mv))
    }

    #[inline(always)]
    pub fn clear(&mut self) {
        self.0 = [None; 2];
    }
}

impl Index<usize> for Killers {
    type Output = Option<Move>;
    #[inline(always)]
    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

#[cfg(test)]
mod tests {
    use chessie::{Color, Game, PieceKind};

    use super::*;

    #[test]
    fn test_history_gravity() {
        let game = Game::default();
        let mv = game.get_legal_moves()[0];
        let piece = Piece::new(Color::White, PieceKind::Pawn);
        let mut history = HistoryTable::default();

        for _ in 0..1000 {
            history.update(piece, &mv, MAX_HISTORY);
        }
        assert!(history.get(piece, &mv) <= MAX_HISTORY);
        assert!(history.get(piece, &mv) > 0);

        history.update(piece, &mv, -2 * MAX_HISTORY);
        assert!(history.get(piece, &mv) >= -MAX_HISTORY);

        history.clear();
        assert_eq!(history.get(piece, &mv), 0);
    }

    #[test]
    fn test_killers() {
        let game = Game::default();
        let moves = game.get_legal_moves();
        let mut killers = Killers::default();

        killers.push(moves[0]);
        killers.push(moves[0]);
        assert_eq!(killers[0], Some(moves[0]));
        assert_eq!(killers[1], None);

        killers.push(moves[1]);
        assert_eq!(killers[0], Some(moves[1]));
        assert_eq!(killers[1], Some(moves[0]));
        assert!(killers.contains(&moves[0]));
        assert!(!killers.contains(&moves[2]));
    }
}
