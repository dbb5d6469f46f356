/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Attack sets on raw `u64` masks, indexed by square (`a1 = 0`, `h8 = 63`).
//!
//! Leaper attacks and the squares between two aligned squares are computed at compile time.
//! Slider attacks are generated by walking rays, which is plenty for the handful of queries per node
//! made by static exchange evaluation and the pruning logic.

/// File and rank deltas of the four diagonal directions.
const DIAGONALS: [(i8, i8); 4] = [(1, 1), (1, -1), (-1, 1), (-1, -1)];

/// File and rank deltas of the four orthogonal directions.
const ORTHOGONALS: [(i8, i8); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];

const KNIGHT_DELTAS: [(i8, i8); 8] = [
    (1, 2),
    (2, 1),
    (2, -1),
    (1, -2),
    (-1, -2),
    (-2, -1),
    (-2, 1),
    (-1, 2),
];

const KING_DELTAS: [(i8, i8); 8] = [
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];

/// Index of the White side in tables keyed by color.
pub const WHITE: usize = 0;

/// Index of the Black side in tables keyed by color.
pub const BLACK: usize = 1;

/// Returns the square `(file + df, rank + dr)`, if it is on the board.
#[inline(always)]
const fn offset(square: usize, df: i8, dr: i8) -> Option<usize> {
    let file = (square % 8) as i8 + df;
    let rank = (square / 8) as i8 + dr;
    if file < 0 || file > 7 || rank < 0 || rank > 7 {
        None
    } else {
        Some((rank * 8 + file) as usize)
    }
}

const fn leaper_table(deltas: &[(i8, i8); 8]) -> [u64; 64] {
    let mut table = [0; 64];
    let mut square = 0;
    while square < 64 {
        let mut i = 0;
        while i < deltas.len() {
            if let Some(to) = offset(square, deltas[i].0, deltas[i].1) {
                table[square] |= 1 << to;
            }
            i += 1;
        }
        square += 1;
    }
    table
}

const fn pawn_table() -> [[u64; 64]; 2] {
    let mut table = [[0; 64]; 2];
    let mut square = 0;
    while square < 64 {
        let mut df = -1;
        while df <= 1 {
            if let Some(to) = offset(square, df, 1) {
                table[WHITE][square] |= 1 << to;
            }
            if let Some(to) = offset(square, df, -1) {
                table[BLACK][square] |= 1 << to;
            }
            df += 2;
        }
        square += 1;
    }
    table
}

const fn between_table() -> [[u64; 64]; 64] {
    let mut table = [[0; 64]; 64];
    let directions = [
        DIAGONALS[0],
        DIAGONALS[1],
        DIAGONALS[2],
        DIAGONALS[3],
        ORTHOGONALS[0],
        ORTHOGONALS[1],
        ORTHOGONALS[2],
        ORTHOGONALS[3],
    ];

    let mut from = 0;
    while from < 64 {
        let mut d = 0;
        while d < directions.len() {
            let (df, dr) = directions[d];
            let mut path = 0u64;
            let mut current = offset(from, df, dr);
            while let Some(to) = current {
                table[from][to] = path;
                path |= 1 << to;
                current = offset(to, df, dr);
            }
            d += 1;
        }
        from += 1;
    }
    table
}

static KNIGHT_ATTACKS: [u64; 64] = leaper_table(&KNIGHT_DELTAS);
static KING_ATTACKS: [u64; 64] = leaper_table(&KING_DELTAS);
static PAWN_ATTACKS: [[u64; 64]; 2] = pawn_table();
static BETWEEN: [[u64; 64]; 64] = between_table();

/// Squares a knight on `square` attacks.
#[inline(always)]
pub fn knight_attacks(square: usize) -> u64 {
    KNIGHT_ATTACKS[square]
}

/// Squares a king on `square` attacks.
#[inline(always)]
pub fn king_attacks(square: usize) -> u64 {
    KING_ATTACKS[square]
}

/// Squares a pawn of `color` (see [`WHITE`] and [`BLACK`]) on `square` attacks.
#[inline(always)]
pub fn pawn_attacks(color: usize, square: usize) -> u64 {
    PAWN_ATTACKS[color][square]
}

/// Squares strictly between `a` and `b`, or `0` if they do not share a line.
#[inline(always)]
pub fn between(a: usize, b: usize) -> u64 {
    BETWEEN[a][b]
}

#[inline(always)]
fn slide(square: usize, occupied: u64, directions: &[(i8, i8); 4]) -> u64 {
    let mut attacks = 0;
    for &(df, dr) in directions {
        let mut current = offset(square, df, dr);
        while let Some(to) = current {
            attacks |= 1 << to;
            if occupied & (1 << to) != 0 {
                break;
            }
            current = offset(to, df, dr);
        }
    }
    attacks
}

/// Squares a bishop on `square` attacks, given the `occupied` squares.
#[inline(always)]
pub fn bishop_attacks(square: usize, occupied: u64) -> u64 {
    slide(square, occupied, &DIAGONALS)
}

/// Squares a rook on `square` attacks, given the `occupied` squares.
#[inline(always)]
pub fn rook_attacks(square: usize, occupied: u64) -> u64 {
    slide(square, occupied, &ORTHOGONALS)
}

/// Squares in front of a pawn of `color` on `square`, on its own and both adjacent files.
///
/// A pawn is passed if no enemy pawn stands on this mask.
pub fn passed_pawn_mask(color: usize, square: usize) -> u64 {
    let file = square % 8;
    let rank = square / 8;

    let mut files = 0x0101_0101_0101_0101u64 << file;
    if file > 0 {
        files |= 0x0101_0101_0101_0101u64 << (file - 1);
    }
    if file < 7 {
        files |= 0x0101_0101_0101_0101u64 << (file + 1);
    }

    let ahead = if color == WHITE {
        if rank == 7 {
            0
        } else {
            u64::MAX << (8 * (rank + 1))
        }
    } else {
        (1u64 << (8 * rank)) - 1
    };

    files & ahead
}

#[cfg(test)]
mod tests {
    use super::*;

    const A1: usize = 0;
    const B1: usize = 1;
    const D4: usize = 27;
    const E4: usize = 28;
    const H8: usize = 63;

    #[test]
    fn test_leapers() {
        assert_eq!(knight_attacks(A1).count_ones(), 2);
        assert_eq!(knight_attacks(D4).count_ones(), 8);
        assert_eq!(king_attacks(A1).count_ones(), 3);
        assert_eq!(king_attacks(E4).count_ones(), 8);

        // A White pawn on e4 attacks d5 and f5
        assert_eq!(pawn_attacks(WHITE, E4), (1 << 35) | (1 << 37));
        // A Black pawn on a1 attacks nothing
        assert_eq!(pawn_attacks(BLACK, A1), 0);
    }

    #[test]
    fn test_sliders_stop_at_blockers() {
        assert_eq!(rook_attacks(A1, 0).count_ones(), 14);
        assert_eq!(bishop_attacks(A1, 0).count_ones(), 7);

        // A blocker on b1 is attacked, but nothing behind it is
        let attacks = rook_attacks(A1, 1 << B1);
        assert_ne!(attacks & (1 << B1), 0);
        assert_eq!(attacks & (1 << 2), 0);
    }

    #[test]
    fn test_between() {
        // a1-h8 diagonal has six squares between its ends
        assert_eq!(between(A1, H8).count_ones(), 6);
        assert_eq!(between(A1, H8), between(H8, A1));
        assert_eq!(between(A1, B1), 0);
        // Not aligned
        assert_eq!(between(B1, D4), 0);
    }

    #[test]
    fn test_passed_pawn_mask() {
        // White pawn on e4: d5..f8 is 3 files * 4 ranks
        assert_eq!(passed_pawn_mask(WHITE, E4).count_ones(), 12);
        // Black pawn on e4: d1..f3
        assert_eq!(passed_pawn_mask(BLACK, E4).count_ones(), 9);
        assert_eq!(passed_pawn_mask(WHITE, H8), 0);
    }
}
