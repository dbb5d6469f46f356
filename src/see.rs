/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use chessie::{Move, PieceKind};

use crate::{
    attacks,
    position::{color_index, value_of},
    Occupancy,
};

/// Order in which recapturing pieces are tried: least valuable first.
const RECAPTURE_ORDER: [PieceKind; 5] = [
    PieceKind::Pawn,
    PieceKind::Knight,
    PieceKind::Bishop,
    PieceKind::Rook,
    PieceKind::Queen,
];

/// [Static Exchange Evaluation](https://www.chessprogramming.org/Static_Exchange_Evaluation):
/// returns `true` if the exchange sequence started by `mv` nets the mover at least `threshold` centipawns.
///
/// Castling always passes a zero threshold. Pins are ignored.
pub fn see_ge(occ: &Occupancy, mv: &Move, threshold: i32) -> bool {
    if mv.is_short_castle() || mv.is_long_castle() {
        return threshold <= 0;
    }

    let from = mv.from().index();
    let to = mv.to().index();
    let Some(mover) = occ.piece_at(from) else {
        return threshold <= 0;
    };

    // What we win immediately, plus what a promotion adds
    let mut swap = occ.victim_of(mv).map_or(0, value_of) - threshold;
    if let Some(promotion) = mv.promotion() {
        swap += value_of(promotion) - value_of(PieceKind::Pawn);
    }
    if swap < 0 {
        return false;
    }

    // Now assume the opponent recaptures for free
    let moved_value = mv.promotion().map_or(value_of(mover.kind()), value_of);
    swap = moved_value - swap;
    if swap <= 0 && mover.kind() != PieceKind::King {
        return true;
    }

    let mut occupied = occ.occupied() ^ (1 << from) | (1 << to);
    if mv.is_en_passant() {
        // The captured pawn sits behind the destination
        let captured = if mover.color().is_white() { to - 8 } else { to + 8 };
        occupied &= !(1 << captured);
    }

    let diagonal = occ.kind(PieceKind::Bishop) | occ.kind(PieceKind::Queen);
    let orthogonal = occ.kind(PieceKind::Rook) | occ.kind(PieceKind::Queen);

    let mut stm = color_index(mover.color());
    let mut attackers = occ.attackers_to(to, occupied);
    // `1` while the side that made the last capture is ahead
    let mut res = 1;

    loop {
        stm ^= 1;
        attackers &= occupied;
        let stm_attackers = attackers & occ.color(stm);
        if stm_attackers == 0 {
            break;
        }
        res ^= 1;

        let next = RECAPTURE_ORDER
            .iter()
            .find(|&&kind| stm_attackers & occ.kind(kind) != 0);

        let Some(&kind) = next else {
            // Only the King is left to recapture; it may do so only if the square is no longer defended
            return if attackers & !occ.color(stm) != 0 {
                res == 0
            } else {
                res != 0
            };
        };

        swap = value_of(kind) - swap;
        if swap < res {
            break;
        }

        let bb = stm_attackers & occ.kind(kind);
        occupied ^= bb & bb.wrapping_neg();

        // Sliders behind the piece just removed join in
        if matches!(kind, PieceKind::Pawn | PieceKind::Bishop | PieceKind::Queen) {
            attackers |= attacks::bishop_attacks(to, occupied) & diagonal;
        }
        if matches!(kind, PieceKind::Rook | PieceKind::Queen) {
            attackers |= attacks::rook_attacks(to, occupied) & orthogonal;
        }
    }

    res != 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::{parse_fen, parse_move};

    fn see(fen: &str, mv: &str, threshold: i32) -> bool {
        let game = parse_fen(fen).unwrap();
        let mv = parse_move(&game, mv).unwrap();
        see_ge(&Occupancy::new(&game), &mv, threshold)
    }

    #[test]
    fn test_free_capture() {
        // Rook takes an undefended pawn
        let fen = "1k1r4/1pp4p/p7/4p3/8/P5P1/1PP4P/2K1R3 w - - 0 1";
        assert!(see(fen, "e1e5", 0));
        assert!(see(fen, "e1e5", 100));
        assert!(!see(fen, "e1e5", 101));
    }

    #[test]
    fn test_losing_capture() {
        // Queen takes a pawn defended by a pawn
        let fen = "4k3/8/3p4/4p3/8/8/8/4Q1K1 w - - 0 1";
        assert!(!see(fen, "e1e5", 0));
        assert!(see(fen, "e1e5", -900));
    }

    #[test]
    fn test_quiet_moves() {
        let fen = "4k3/8/3p4/8/8/8/8/4Q1K1 w - - 0 1";
        // Moving the queen onto a pawn-guarded square loses it
        assert!(!see(fen, "e1e5", 0));
        // A quiet move to a safe square is even
        assert!(see(fen, "e1e2", 0));
        assert!(!see(fen, "e1e2", 1));
    }
}
