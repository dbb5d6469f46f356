/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::sync::OnceLock;

use chessie::{Game, Move, PieceKind};

use crate::{
    attacks,
    movepicker::Phase,
    node::{Extensions, Threat},
    position::{is_normal, men_count, piece_count, value_of},
    search::Search,
    see_ge, tune, Depth, Occupancy, Score, DEPTH_INCREMENT,
};

/// Late move reductions in fractional units, indexed by `[pv][depth in plies][move index]`.
type ReductionTable = [[[u8; 64]; 64]; 2];

static REDUCTIONS: OnceLock<Box<ReductionTable>> = OnceLock::new();

/// Builds the reduction table.
///
/// Reductions grow with the logarithm of both depth and move index, are smaller in PV nodes,
/// never exceed `depth / 2.5` and always leave at least a ply to search. Only whole plies are reduced.
fn reductions() -> &'static ReductionTable {
    REDUCTIONS.get_or_init(|| {
        let mut table = Box::new([[[0; 64]; 64]; 2]);
        let divisors = [tune::lmr_non_pv_divisor!(), tune::lmr_pv_divisor!()];

        for (pv, divisor) in divisors.into_iter().enumerate() {
            for depth in 2..64 {
                let d = depth as f64;
                for index in 1..64 {
                    let f = tune::lmr_base!() + d.ln() * ((index + 1) as f64).ln();
                    let r = (f / divisor + 0.5)
                        .floor()
                        .min(d - 1.0 - 1.0 / DEPTH_INCREMENT as f64)
                        .min(d / 2.5);

                    if r >= 1.0 {
                        table[pv][depth][index] = (DEPTH_INCREMENT * r as i32) as u8;
                    }
                }
            }
        }

        table
    })
}

/// Depth by which to reduce the `move_index`th move of a node searched to `depth`.
#[inline(always)]
pub fn lmr_reduction(pv: bool, depth: Depth, move_index: usize) -> Depth {
    let plies = depth.plies().clamp(0, 63) as usize;
    Depth::from_units(reductions()[pv as usize][plies][move_index.min(63)] as i32)
}

/// Returns `true` if `threat`, found after a null move, is connected to the move `last` that led to the node.
///
/// `occ` is the position after `last` was played. When a reduced move turns out to enable a threat,
/// the reduction was unsafe.
pub fn moves_related(occ: &Occupancy, last: &Move, threat: &Threat) -> bool {
    let (last_from, last_to) = (last.from().index(), last.to().index());
    let (threat_from, threat_to) = (threat.mv.from().index(), threat.mv.to().index());

    // The threatening piece just moved, or it captures on the square just vacated
    if last_to == threat_from || last_from == threat_to {
        return true;
    }

    // The last move opened a line for a slider
    if matches!(
        threat.piece,
        PieceKind::Bishop | PieceKind::Rook | PieceKind::Queen
    ) && attacks::between(threat_from, threat_to) & (1 << last_from) != 0
    {
        return true;
    }

    // The piece that just moved now attacks the threat's destination
    occ.piece_at(last_to).is_some_and(|piece| {
        occ.attacks_of(piece, last_to, occ.occupied()) & (1 << threat_to) != 0
    })
}

/// A move about to be searched, with what the move loop already knows about it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Candidate {
    pub mv: Move,
    pub phase: Phase,

    /// Position of the move in the node's ordering, starting from zero.
    pub index: usize,
    pub gives_check: bool,
}

impl Search {
    /// Decides how deep to search `candidate` from the node at `ply`.
    ///
    /// Returns the extension (negative for a reduction) to apply, or `None` if the move should not be searched.
    /// The node's [`Extensions`] are updated to say which adjustments were made.
    pub(crate) fn calc_extensions(
        &mut self,
        game: &Game,
        occ: &Occupancy,
        ply: usize,
        candidate: &Candidate,
        legal: usize,
    ) -> Option<Depth> {
        let mv = &candidate.mv;
        let us = game.side_to_move();
        let node = &mut self.nodes[ply];
        let pv = node.is_pv();
        let depth = node.depth;
        node.extensions = Extensions::NONE;

        let mut extend = Depth::ZERO;
        let mut prune_ok = !node.in_check;

        if node.in_check {
            // Few replies to check
            if legal == 1 {
                extend += Depth::ONE;
                node.extensions |= Extensions::FORCED;
            } else if legal == 2 {
                extend += Depth::HALF;
                node.extensions |= Extensions::FORCED;
            }
        }

        // Checks that do not lose more than a pawn
        if candidate.gives_check && see_ge(occ, mv, -Score::PAWN.inner()) {
            extend += if pv {
                Depth::THREE_QUARTERS
            } else {
                Depth::HALF
            };
            node.extensions |= Extensions::CHECK;
        }

        if occ.is_pawn_push_to_seventh(mv) {
            extend += Depth::ONE;
            node.extensions |= Extensions::PAWN_PUSH;
        } else if is_normal(mv)
            && occ
                .victim_of(mv)
                .is_some_and(|victim| victim != PieceKind::Pawn)
            && piece_count(game, us.opponent()) == 1
            && piece_count(game, us) == 0
        {
            // Capturing the last piece leaves a pawn ending, which needs precise play
            extend += Depth::HALF;
            node.extensions |= Extensions::CAPTURE;
        }

        if extend > Depth::ZERO {
            return Some(extend.min(Depth::ONE));
        }
        if !self.ctx.pruning {
            return Some(Depth::ZERO);
        }

        prune_ok &= node.num_try > 0
            && !mv.is_capture()
            && is_normal(mv)
            && !occ.is_passed_pawn_push(mv, 4)
            && !node.alpha.is_mate()
            && men_count(game) > 6;

        if !pv && ply > 0 && prune_ok {
            if let Some(threat) = node.threat {
                prune_ok = !addresses_threat(occ, mv, &threat);
            }
        }

        if !pv && ply > 0 && prune_ok {
            // Futility pruning
            if depth <= tune::futility_depth!() {
                let margins = tune::futility_margins!();
                let margin = Score::PAWN * margins[depth.plies().clamp(0, 3) as usize];
                if node.eval == Score::INVALID {
                    node.static_eval = self.ctx.evaluator.evaluate(game);
                    node.eval = node.static_eval;
                }
                if node.eval < node.beta - margin {
                    return None;
                }
            }

            // Late move pruning
            if depth <= tune::lmp_depth!() && candidate.phase >= Phase::History {
                let counts = tune::lmp_move_counts!();
                if candidate.index >= counts[depth.plies().clamp(0, 10) as usize] {
                    return None;
                }
            }
        }

        // Moves that lose material according to SEE
        if !pv
            && depth <= tune::see_pruning_depth!()
            && node.num_try > 0
            && candidate.phase > Phase::WinningCaptures
            && !node.alpha.is_mate()
            && !see_ge(occ, mv, 0)
        {
            return None;
        }

        // Late move reductions
        if depth.units() >= tune::lmr_depth!()
            && candidate.index > 1 + 2 * pv as usize
            && candidate.phase == Phase::History
            && !occ.is_passed_pawn_push(mv, 5)
        {
            let reduction = lmr_reduction(pv, depth, candidate.index);
            if reduction > Depth::ZERO {
                node.extensions |= Extensions::LMR;
                return Some(-reduction);
            }
        }

        Some(Depth::ZERO)
    }
}

/// Returns `true` if `mv` does something about `threat`: moves the threatened piece away, blocks a slider
/// safely, or defends the threatened square against a capture worth defending.
fn addresses_threat(occ: &Occupancy, mv: &Move, threat: &Threat) -> bool {
    let threat_from = threat.mv.from().index();
    let threat_to = threat.mv.to().index();

    if mv.from().index() == threat_to || mv.to().index() == threat_to {
        return true;
    }

    let slider = matches!(
        threat.piece,
        PieceKind::Bishop | PieceKind::Rook | PieceKind::Queen
    );
    if slider
        && attacks::between(threat_from, threat_to) & (1 << mv.to().index()) != 0
        && see_ge(occ, mv, 0)
    {
        return true;
    }

    let worth_defending = threat.mv.promotion().is_some()
        || threat.victim.is_some_and(|victim| {
            value_of(victim) >= value_of(threat.piece) || threat.piece == PieceKind::King
        });
    worth_defending && occ.move_attacks(mv, threat_to)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::{parse_fen, parse_move};

    #[test]
    fn test_reduction_table() {
        // Too shallow or too early to reduce
        assert_eq!(lmr_reduction(false, Depth::new(1), 10), Depth::ZERO);
        assert_eq!(lmr_reduction(false, Depth::new(8), 0), Depth::ZERO);

        // Reductions are whole plies, grow with the move index, and are smaller in PV nodes
        let late = lmr_reduction(false, Depth::new(10), 30);
        let early = lmr_reduction(false, Depth::new(10), 4);
        assert!(late >= early);
        assert!(late > Depth::ZERO);
        assert_eq!(late.units() % DEPTH_INCREMENT, 0);
        assert!(lmr_reduction(true, Depth::new(10), 30) <= late);

        // Never more than depth / 2.5
        for plies in 2..64 {
            let r = lmr_reduction(false, Depth::new(plies), 63);
            assert!(
                r.units() as f64 <= Depth::new(plies).units() as f64 / 2.5,
                "reduction {r:?} too large at depth {plies}"
            );
        }
    }

    #[test]
    fn test_moves_related() {
        // White just played Ke1-d1; Black's rook threatens to capture on a1
        let game = parse_fen("r3k3/8/8/8/8/8/8/R2K4 b - - 1 1").unwrap();
        let occ = Occupancy::new(&game);
        let threat = Threat {
            mv: parse_move(&game, "a8a1").unwrap(),
            piece: PieceKind::Rook,
            victim: Some(PieceKind::Rook),
        };

        let before = parse_fen("r3k3/8/8/8/8/8/8/R3K3 w - - 0 1").unwrap();
        let king_move = parse_move(&before, "e1d1").unwrap();
        // The King left the rook undefended, but the move itself has no geometric link to the threat
        assert!(!moves_related(&occ, &king_move, &threat));

        let before = parse_fen("r3k3/8/8/8/8/8/R7/3K4 w - - 0 1").unwrap();
        let rook_move = parse_move(&before, "a2a1").unwrap();
        let game = before.with_move_made(rook_move);
        let occ = Occupancy::new(&game);
        // The rook moved off the line the threat travels along
        assert!(moves_related(&occ, &rook_move, &threat));
    }
}
