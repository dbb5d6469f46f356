/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::{sync::atomic::Ordering, thread};

use chessie::{Game, Move, PieceKind};
use rand::{
    distr::{weighted::WeightedIndex, Distribution},
    SeedableRng,
};
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::{
    extensions::Candidate,
    movepicker::{MovePicker, Phase, ScoredMove},
    node::NodeFlags,
    position::{hash_of, is_normal, is_tactical, piece_count},
    search::{Search, Window},
    tune, Depth, HistoryTable, Killers, Occupancy, Score,
};

/// A legal move at the root, with the score it last received in a wide iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RootMove {
    pub mv: Move,

    /// Ordering stage the move would be produced in at an interior node.
    pub phase: Phase,

    /// Score from the last iteration that searched every root move with an open window, or `-MATE` if none has.
    pub score: Score,
}

/// Every legal move of the root position, best first.
#[derive(Debug, Clone, Default)]
pub(crate) struct RootMoves(Vec<RootMove>);

impl RootMoves {
    pub(crate) fn new(game: &Game) -> Self {
        let occ = Occupancy::new(game);
        let mut picker = MovePicker::new(
            game,
            &occ,
            None,
            &Killers::default(),
            &HistoryTable::default(),
            &[],
        );

        let moves = picker
            .materialize()
            .into_iter()
            .map(|scored| RootMove {
                mv: scored.mv,
                phase: scored.phase,
                score: -Score::MATE,
            })
            .collect();
        Self(moves)
    }

    #[inline(always)]
    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }

    #[inline(always)]
    pub(crate) fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &RootMove> {
        self.0.iter()
    }

    /// Records the score `mv` received.
    pub(crate) fn set_score(&mut self, mv: Move, score: Score) {
        if let Some(root_move) = self.0.iter_mut().find(|root_move| root_move.mv == mv) {
            root_move.score = score;
        }
    }

    /// Sorts the moves by score, then puts `best` first.
    pub(crate) fn reorder(&mut self, best: Option<Move>) {
        self.0.sort_by(|a, b| b.score.cmp(&a.score));
        if let Some(index) = best.and_then(|best| self.0.iter().position(|root_move| root_move.mv == best)) {
            self.0[..=index].rotate_right(1);
        }
    }

    /// Returns the first move if it leads the second by at least `threshold`.
    ///
    /// Capturing the opponent's last piece is never easy, since the ending it leads to needs a real search.
    pub(crate) fn easy_move(&self, game: &Game, threshold: i32) -> Option<Move> {
        let [first, second, ..] = self.0.as_slice() else {
            return None;
        };
        if first.score < second.score + threshold {
            return None;
        }

        let occ = Occupancy::new(game);
        let us = game.side_to_move();
        let takes_last_piece = is_normal(&first.mv)
            && occ
                .victim_of(&first.mv)
                .is_some_and(|victim| victim != PieceKind::Pawn)
            && piece_count(game, us.opponent()) == 1;

        (!takes_last_piece).then_some(first.mv)
    }

    /// Picks a deliberately weaker move for play at reduced `strength`, drawn from a generator seeded with `seed`.
    ///
    /// Moves within a margin of the best are candidates. The margin grows as strength falls, and moves closer to
    /// the best are more likely to be picked. Returns `None` if no root move has been scored.
    pub(crate) fn suboptimal(&self, strength: u32, seed: u64) -> Option<(Move, Score)> {
        let mut scored: Vec<&RootMove> = self.0.iter().filter(|m| m.score > -Score::MATE).collect();
        scored.sort_by(|a, b| b.score.cmp(&a.score));
        let best = scored.first()?.score;

        let margin = (100 - strength.min(100) as i32) * Score::PAWN.inner() / 25;
        let weights: Vec<u64> = scored
            .iter()
            .map_while(|m| {
                let gap = (best - m.score).inner();
                (gap <= margin).then(|| (margin - gap + 1) as u64)
            })
            .collect();

        let Ok(distribution) = WeightedIndex::new(&weights) else {
            return scored.first().map(|m| (m.mv, m.score));
        };
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let chosen = scored[distribution.sample(&mut rng)];
        Some((chosen.mv, chosen.score))
    }
}

impl Search {
    /// Searches the root position to `iteration` plies inside `[alpha, beta]`.
    ///
    /// Moves in `excludes` are skipped. During the first few iterations every move is searched with the window's
    /// lower bound, so `root` learns a real score for each of them.
    pub(crate) fn ply0(
        &mut self,
        game: &Game,
        root: &mut RootMoves,
        alpha: Score,
        beta: Score,
        iteration: usize,
        excludes: &[Move],
    ) -> Score {
        let depth = Depth::new(iteration as i32);
        let wide = iteration <= tune::easy_plies!();
        let in_check = game.is_in_check();
        let legal = root.len();

        self.nodes[0].enter(alpha, beta, 0, depth, NodeFlags::NONE);
        self.nodes[0].best_score = alpha;
        self.nodes[0].in_check = in_check;
        self.ctx.fail_high_root.store(false, Ordering::Relaxed);
        self.count_node();
        self.record_key(0, hash_of(game, false));

        let occ = Occupancy::new(game);
        let moves: Vec<ScoredMove> = root
            .iter()
            .filter(|root_move| !excludes.contains(&root_move.mv))
            .map(|root_move| ScoredMove {
                mv: root_move.mv,
                phase: root_move.phase,
                score: 0,
            })
            .collect();

        let mut hi = beta;
        let mut next = 0;
        while next < moves.len() {
            if self.nodes[0].cutoff || self.stopped() {
                break;
            }

            let index = next;
            let scored = moves[index];
            next += 1;

            let mv = scored.mv;
            let child = game.with_move_made(mv);
            let candidate = Candidate {
                mv,
                phase: scored.phase,
                index,
                gives_check: child.is_in_check(),
            };
            let Some(extend) = self.calc_extensions(game, &occ, 0, &candidate, legal) else {
                continue;
            };

            self.link_child(0, Some(mv));
            let lo = if wide { alpha } else { self.nodes[0].best_score };
            let score = self.search_move(&child, 0, depth, extend, Window { lo, hi, beta });
            if self.stopped() {
                break;
            }

            let node = &mut self.nodes[0];
            let _ = node.done.try_push(mv);
            node.num_try += 1;
            if wide {
                root.set_score(mv, score);
            }
            if score > self.nodes[0].best_score && self.update_root_move(mv, score) {
                self.ctx.fail_high_root.store(false, Ordering::Relaxed);
                break;
            }
            self.ctx.fail_high_root.store(false, Ordering::Relaxed);

            // Reduced strength spends time instead of searching
            if !self.ctx.wait_time.is_zero() {
                thread::sleep(self.ctx.wait_time);
            }

            hi = self.nodes[0].best_score + 1;

            if self.ctx.options.threads > 1 && next < moves.len() && depth >= self.ctx.split_depth() {
                let rest = || moves[next..].to_vec();
                if let Some(sp) = self.split(game, 0, moves.len() - next, rest, next, legal) {
                    if wide {
                        for &(mv, score) in &sp.state().root_scores {
                            root.set_score(mv, score);
                        }
                    }
                    break;
                }
            }
        }

        self.flush_nodes();
        if self.nodes[0].cutoff {
            return self.nodes[0].best_score;
        }

        if legal == 0 {
            let score = if in_check {
                Score::mated_in(0)
            } else {
                self.ctx.draw_score(game)
            };
            self.nodes[0].best_score = score;
            return score;
        }

        if !in_check && self.nodes[0].best.is_some_and(|mv| !is_tactical(&mv)) {
            self.update_history_at_root(game, depth);
        }
        self.nodes[0].best_score
    }

    /// Records `mv` as the best root move. Returns `true` on a beta cutoff.
    ///
    /// On a cutoff the PV is just the move, so that it is searched first by the next attempt.
    fn update_root_move(&mut self, mv: Move, score: Score) -> bool {
        if self.update_move(0, mv, score) {
            self.nodes[0].pv.set(mv);
            return true;
        }
        false
    }

    fn update_history_at_root(&mut self, game: &Game, depth: Depth) {
        let node = &mut self.nodes[0];
        let Some(best) = node.best else {
            return;
        };
        node.killers.push(best);
        if let Some(piece) = game.piece_at(best.from()) {
            self.history.update(piece, &best, HistoryTable::bonus(depth));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::{parse_fen, parse_move};

    #[test]
    fn test_reorder() {
        let game = Game::default();
        let mut root = RootMoves::new(&game);
        assert_eq!(root.len(), 20);

        let e4 = parse_move(&game, "e2e4").unwrap();
        let d4 = parse_move(&game, "d2d4").unwrap();
        root.set_score(e4, Score::new(30));
        root.set_score(d4, Score::new(40));

        // Sorted by score, but the previous best goes first
        root.reorder(Some(e4));
        let order: Vec<Move> = root.iter().take(2).map(|m| m.mv).collect();
        assert_eq!(order, vec![e4, d4]);

        root.reorder(None);
        assert_eq!(root.iter().next().map(|m| m.mv), Some(d4));
    }

    #[test]
    fn test_easy_move() {
        // Taking the hanging queen is far better than anything else
        let game = parse_fen("4k3/8/8/3q4/8/8/3R4/4K3 w - - 0 1").unwrap();
        let mut root = RootMoves::new(&game);
        let capture = parse_move(&game, "d2d5").unwrap();
        for m in root.clone().iter() {
            root.set_score(m.mv, Score::new(-800));
        }
        root.set_score(capture, Score::new(500));
        root.reorder(Some(capture));

        // The queen is Black's last piece, so the resulting ending still deserves a full search
        assert_eq!(root.easy_move(&game, 200), None);

        // With a knight left over, winning the queen is simply the best move
        let game = parse_fen("1n2k3/8/8/3q4/8/8/3R4/3RK3 w - - 0 1").unwrap();
        let mut root = RootMoves::new(&game);
        let capture = parse_move(&game, "d2d5").unwrap();
        for m in root.clone().iter() {
            root.set_score(m.mv, Score::new(-800));
        }
        root.set_score(capture, Score::new(500));
        root.reorder(Some(capture));
        assert_eq!(root.easy_move(&game, 200), Some(capture));
    }

    #[test]
    fn test_suboptimal() {
        let game = Game::default();
        let mut root = RootMoves::new(&game);
        let moves: Vec<Move> = root.iter().map(|m| m.mv).collect();
        for (i, mv) in moves.iter().enumerate() {
            root.set_score(*mv, Score::new(50 - 10 * i as i32));
        }

        // Full strength only ever plays the best move
        for seed in 0..32 {
            assert_eq!(root.suboptimal(100, seed).map(|(mv, _)| mv), Some(moves[0]));
        }

        // Weak play stays within the margin of the best score
        let margin = 50 * Score::PAWN.inner() / 25;
        for seed in 0..32 {
            let (_, score) = root.suboptimal(50, seed).unwrap();
            assert!(
                (Score::new(50) - score).inner() <= margin,
                "score {score} is further than {margin} from the best"
            );
        }

        assert_eq!(RootMoves::default().suboptimal(50, 1), None);
    }

    #[test]
    fn test_suboptimal_is_repeatable() {
        let game = Game::default();
        let mut root = RootMoves::new(&game);
        let moves: Vec<Move> = root.iter().map(|m| m.mv).collect();
        for mv in &moves {
            root.set_score(*mv, Score::new(10));
        }

        // Equal scores at low strength: the seed alone decides, and decides the same way every time
        let picks: Vec<_> = (0..64).map(|seed| root.suboptimal(20, seed)).collect();
        let again: Vec<_> = (0..64).map(|seed| root.suboptimal(20, seed)).collect();
        assert_eq!(picks, again);

        let mut distinct: Vec<Move> = picks.iter().flatten().map(|(mv, _)| *mv).collect();
        distinct.sort_by_key(|mv| mv.to_string());
        distinct.dedup();
        assert!(distinct.len() > 1, "64 seeds always picked {distinct:?}");
    }
}
