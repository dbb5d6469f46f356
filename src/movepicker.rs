/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use arrayvec::ArrayVec;
use chessie::{Game, Move, PieceKind};

use crate::{
    position::{is_tactical, kind_index, value_of},
    see_ge, HistoryTable, Killers, Occupancy,
};

/// Upper bound on the number of legal moves in any position.
pub const MAX_MOVES: usize = 256;

/// Move ordering stage a move was produced in.
///
/// Pruning decisions depend on how "promising" the stage that produced a move was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    /// The best move recorded in the transposition table.
    HashMove,

    /// Captures and promotions that do not lose material.
    WinningCaptures,

    /// Quiet moves that caused a cutoff at the same ply elsewhere in the tree.
    Killers,

    /// Remaining quiet moves, ordered by the history heuristic.
    History,

    /// Captures that lose material according to static exchange evaluation.
    LosingCaptures,
}

/// A move along with the stage it belongs to and its rank within that stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoredMove {
    pub mv: Move,
    pub phase: Phase,
    pub score: i32,
}

impl ScoredMove {
    /// Sort key; lower sorts first.
    #[inline(always)]
    fn key(&self) -> (Phase, i32) {
        (self.phase, -self.score)
    }
}

/// [MVV-LVA](https://www.chessprogramming.org/MVV-LVA) score of `attacker` capturing `victim`.
#[inline(always)]
pub const fn mvv_lva(attacker: PieceKind, victim: PieceKind) -> i32 {
    10 * value_of(victim) - value_of(attacker) + kind_index(attacker) as i32
}

/// Yields legal moves of a position in phase order, best ranked first within each phase.
///
/// Moves are scored once on construction and selected lazily, so a cutoff on an early move
/// avoids sorting the rest.
#[derive(Debug, Clone)]
pub struct MovePicker {
    moves: ArrayVec<ScoredMove, MAX_MOVES>,
    current: usize,
    legal: usize,
}

impl MovePicker {
    /// Ordering for a full-width node.
    ///
    /// Moves in `excludes` are never produced, but still count towards [`MovePicker::legal_moves`].
    pub fn new(
        game: &Game,
        occ: &Occupancy,
        hash_move: Option<Move>,
        killers: &Killers,
        history: &HistoryTable,
        excludes: &[Move],
    ) -> Self {
        let mut moves = ArrayVec::new();
        let mut legal = 0;

        for mv in game.get_legal_moves() {
            legal += 1;
            if excludes.contains(&mv) {
                continue;
            }

            let scored = if Some(mv) == hash_move {
                ScoredMove {
                    mv,
                    phase: Phase::HashMove,
                    score: 0,
                }
            } else if is_tactical(&mv) {
                Self::score_tactical(occ, mv)
            } else if killers.contains(&mv) {
                ScoredMove {
                    mv,
                    phase: Phase::Killers,
                    score: (killers[0] == Some(mv)) as i32,
                }
            } else {
                let score = game
                    .piece_at(mv.from())
                    .map_or(0, |piece| history.get(piece, &mv));
                ScoredMove {
                    mv,
                    phase: Phase::History,
                    score,
                }
            };

            moves.push(scored);
        }

        Self {
            moves,
            current: 0,
            legal,
        }
    }

    /// Ordering for quiescence: captures and promotions only, best MVV-LVA first.
    ///
    /// Losing captures are kept, since quiescence prunes them with its own margin.
    pub fn tactical(game: &Game, occ: &Occupancy) -> Self {
        let mut moves = ArrayVec::new();
        let mut legal = 0;

        for mv in game.get_legal_moves() {
            legal += 1;
            if is_tactical(&mv) {
                let score = match (occ.mover_of(&mv), occ.victim_of(&mv)) {
                    (Some(attacker), Some(victim)) => mvv_lva(attacker, victim),
                    _ => mv.promotion().map_or(0, value_of),
                };
                moves.push(ScoredMove {
                    mv,
                    phase: Phase::WinningCaptures,
                    score,
                });
            }
        }

        Self {
            moves,
            current: 0,
            legal,
        }
    }

    fn score_tactical(occ: &Occupancy, mv: Move) -> ScoredMove {
        let score = match (occ.mover_of(&mv), occ.victim_of(&mv)) {
            (Some(attacker), Some(victim)) => mvv_lva(attacker, victim),
            _ => mv.promotion().map_or(0, value_of),
        };
        let phase = if see_ge(occ, &mv, 0) {
            Phase::WinningCaptures
        } else {
            Phase::LosingCaptures
        };

        ScoredMove { mv, phase, score }
    }

    /// Number of legal moves in the position, including excluded ones.
    #[inline(always)]
    pub fn legal_moves(&self) -> usize {
        self.legal
    }

    /// Number of moves not yet produced.
    #[inline(always)]
    pub fn remaining(&self) -> usize {
        self.moves.len() - self.current
    }

    /// Produces every remaining move at once, in the order [`Iterator::next`] would have.
    ///
    /// Used before a node is shared between threads, which cannot pull from one picker concurrently.
    pub fn materialize(&mut self) -> Vec<ScoredMove> {
        let mut rest = self.moves[self.current..].to_vec();
        rest.sort_by_key(ScoredMove::key);
        self.current = self.moves.len();
        rest
    }
}

impl Iterator for MovePicker {
    type Item = ScoredMove;

    fn next(&mut self) -> Option<Self::Item> {
        // No more moves left
        if self.current >= self.moves.len() {
            return None;
        }

        // Find the index of the next best move
        let mut best_index = self.current;
        for i in (self.current + 1)..self.moves.len() {
            if self.moves[i].key() < self.moves[best_index].key() {
                best_index = i;
            }
        }

        // Swap, if necessary
        if best_index != self.current {
            self.moves.swap(self.current, best_index);
        }

        let next = self.moves[self.current];
        self.current += 1;
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::{parse_fen, parse_move};

    const KIWIPETE: &str = "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1";

    #[test]
    fn test_phase_order() {
        let game = parse_fen(KIWIPETE).unwrap();
        let occ = Occupancy::new(&game);
        let hash_move = parse_move(&game, "a2a3").ok();
        let mut killers = Killers::default();
        let killer = parse_move(&game, "g2g3").unwrap();
        killers.push(killer);

        let picker = MovePicker::new(
            &game,
            &occ,
            hash_move,
            &killers,
            &HistoryTable::default(),
            &[],
        );
        assert_eq!(picker.legal_moves(), 48);

        let moves = picker.collect::<Vec<_>>();
        assert_eq!(moves.len(), 48);
        assert_eq!(Some(moves[0].mv), hash_move);

        // Phases never go backwards
        for pair in moves.windows(2) {
            assert!(
                pair[0].phase <= pair[1].phase,
                "{:?} came before {:?}",
                pair[0],
                pair[1]
            );
        }

        // Bishop takes bishop is the best capture here
        assert_eq!(moves[1].mv.to_string(), "e2a6");
        assert!(moves.iter().any(|m| m.mv == killer && m.phase == Phase::Killers));
    }

    #[test]
    fn test_excludes_and_materialize() {
        let game = parse_fen(KIWIPETE).unwrap();
        let occ = Occupancy::new(&game);
        let excluded = parse_move(&game, "e2a6").unwrap();

        let mut picker = MovePicker::new(
            &game,
            &occ,
            None,
            &Killers::default(),
            &HistoryTable::default(),
            &[excluded],
        );
        assert_eq!(picker.legal_moves(), 48);
        assert_eq!(picker.remaining(), 47);

        let first = picker.next().unwrap();
        let rest = picker.materialize();
        assert_eq!(rest.len(), 46);
        assert_eq!(picker.remaining(), 0);
        assert!(rest.iter().all(|m| m.mv != excluded && m.mv != first.mv));
    }

    #[test]
    fn test_tactical_only() {
        let game = parse_fen(KIWIPETE).unwrap();
        let occ = Occupancy::new(&game);
        let captures = MovePicker::tactical(&game, &occ).collect::<Vec<_>>();

        assert_eq!(captures.len(), 8);
        assert!(captures.iter().all(|m| m.mv.is_capture()));
        assert!(captures.windows(2).all(|w| w[0].score >= w[1].score));
    }
}
