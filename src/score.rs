/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::fmt;

use crate::MAX_PLY;

/// Value of a position in [centipawns](https://www.chessprogramming.org/Centipawns), or a distance to mate.
///
/// Every score produced by the search lies within `[-MATE, MATE]`.
#[derive(Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Score(pub i32);

impl Score {
    /// Magnitude of a checkmate on the board.
    pub const MATE: Self = Self(32_000);

    /// Any score at or beyond this magnitude encodes a forced mate.
    pub const MATE_RANGE: Self = Self(Self::MATE.0 - 256);

    /// Score of a draw, before any rating bias is applied.
    pub const DRAW: Self = Self(0);

    /// Value of a single pawn.
    pub const PAWN: Self = Self(100);

    /// Sentinel returned for a move that turned out to be illegal. Never stored.
    pub const INVALID: Self = Self(Self::MATE.0 + 1);

    /// Mate at the deepest ply the search can reach, [`MAX_PLY`].
    pub const LOWEST_MATE: Self = Self(Self::MATE.0 - MAX_PLY as i32);

    /// Constructs a new [`Score`] from a raw centipawn value.
    #[inline(always)]
    pub const fn new(score: i32) -> Self {
        Self(score)
    }

    /// Score for being mated at `ply`.
    #[inline(always)]
    pub const fn mated_in(ply: usize) -> Self {
        Self(-(Self::MATE.0 - ply as i32))
    }

    /// Score for delivering mate at `ply`.
    #[inline(always)]
    pub const fn mate_in(ply: usize) -> Self {
        Self(Self::MATE.0 - ply as i32)
    }

    /// Returns the inner `i32` value.
    #[inline(always)]
    pub const fn inner(&self) -> i32 {
        self.0
    }

    /// Returns `true` if the score is a mate score.
    #[inline(always)]
    pub const fn is_mate(&self) -> bool {
        self.0.abs() >= Self::MATE_RANGE.0 && self.0.abs() <= Self::MATE.0
    }

    /// Plies from the current node until the game ends in mate.
    #[inline(always)]
    pub const fn plies_to_mate(&self) -> i32 {
        Self::MATE.0 - self.0.abs()
    }

    /// Full moves until mate, negative when the side to move is the one getting mated.
    #[inline(always)]
    pub const fn moves_to_mate(&self) -> i32 {
        let plies = self.plies_to_mate();
        if self.0 > 0 {
            (plies + 1) / 2
        } else {
            -plies / 2
        }
    }

    /// Moves a mate score `shift` plies further from (positive) or closer to (negative) the mate.
    #[inline(always)]
    const fn shift_mate(self, shift: i32) -> Self {
        if self.0 >= Self::MATE_RANGE.0 {
            Self(self.0 - shift)
        } else if self.0 <= -Self::MATE_RANGE.0 {
            Self(self.0 + shift)
        } else {
            self
        }
    }

    /// Converts a score stored for a node into one relative to the root, given the node sits at `ply`.
    ///
    /// Used when reading mate scores out of the transposition table.
    #[inline(always)]
    pub const fn relative(self, ply: usize) -> Self {
        self.shift_mate(ply as i32)
    }

    /// Inverse of [`Score::relative`]: strips the distance from the root off a mate score found at `ply`.
    ///
    /// Used when writing mate scores into the transposition table.
    #[inline(always)]
    pub const fn absolute(self, ply: usize) -> Self {
        self.shift_mate(-(ply as i32))
    }

    #[inline(always)]
    pub const fn abs(self) -> Self {
        Self(self.0.abs())
    }

    /// The score in pawns, for display.
    #[inline(always)]
    pub fn normalize(&self) -> f32 {
        self.0 as f32 / Self::PAWN.0 as f32
    }

    /// Blends `self` towards `other`, where `t` is a percentage in `[0, 100]`.
    #[inline(always)]
    pub const fn lerp(self, other: Self, t: i32) -> Self {
        Self(self.0 + (other.0 - self.0) * t / 100)
    }
}

/// Implements an arithmetic operator and its assigning form, against both [`Score`] and raw centipawns.
macro_rules! score_ops {
    ($($op:ident::$f:ident, $op_assign:ident::$f_assign:ident;)*) => {$(
        impl std::ops::$op<Score> for Score {
            type Output = Score;
            #[inline(always)]
            fn $f(self, rhs: Score) -> Score {
                Score(std::ops::$op::$f(self.0, rhs.0))
            }
        }

        impl std::ops::$op<i32> for Score {
            type Output = Score;
            #[inline(always)]
            fn $f(self, rhs: i32) -> Score {
                Score(std::ops::$op::$f(self.0, rhs))
            }
        }

        impl std::ops::$op_assign<Score> for Score {
            #[inline(always)]
            fn $f_assign(&mut self, rhs: Score) {
                *self = std::ops::$op::$f(*self, rhs);
            }
        }

        impl std::ops::$op_assign<i32> for Score {
            #[inline(always)]
            fn $f_assign(&mut self, rhs: i32) {
                *self = std::ops::$op::$f(*self, rhs);
            }
        }
    )*};
}

score_ops! {
    Add::add, AddAssign::add_assign;
    Sub::sub, SubAssign::sub_assign;
    Mul::mul, MulAssign::mul_assign;
    Div::div, DivAssign::div_assign;
}

impl std::ops::Neg for Score {
    type Output = Self;

    #[inline(always)]
    fn neg(self) -> Self {
        Self(-self.0)
    }
}

impl PartialEq<i32> for Score {
    #[inline(always)]
    fn eq(&self, other: &i32) -> bool {
        self.0 == *other
    }
}

impl PartialOrd<i32> for Score {
    #[inline(always)]
    fn partial_cmp(&self, other: &i32) -> Option<std::cmp::Ordering> {
        Some(self.0.cmp(other))
    }
}

impl fmt::Display for Score {
    /// Formats as `cp <n>` or `mate <n>`, the way protocol layers usually expect.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.is_mate() {
            true => write!(f, "mate {}", self.moves_to_mate()),
            false => write!(f, "cp {}", self.0),
        }
    }
}

impl fmt::Debug for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;
        if self.is_mate() {
            write!(f, " (mate, {} plies)", self.plies_to_mate())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_absolute() {
        let plies = 3;

        // A mate found 5 plies below a node that sits at ply 3
        let our_mate = Score::mate_in(5 + plies);
        let their_mate = Score::mated_in(5 + plies);

        let our_stored = our_mate.absolute(plies);
        assert_eq!(our_stored, Score::mate_in(5));

        let their_stored = their_mate.absolute(plies);
        assert_eq!(their_stored, Score::mated_in(5));

        // Read back at a different ply
        assert_eq!(our_stored.relative(7), Score::mate_in(12));
        assert_eq!(their_stored.relative(7), Score::mated_in(12));

        // Round trip
        assert_eq!(our_stored.relative(plies), our_mate);
        assert_eq!(their_stored.relative(plies), their_mate);
    }

    #[test]
    fn test_non_mate_untouched() {
        let score = Score::new(250);
        assert_eq!(score.absolute(10), score);
        assert_eq!(score.relative(10), score);
        assert!(!score.is_mate());
        assert!(!Score::INVALID.is_mate(), "INVALID must not look like a mate");
    }

    #[test]
    fn test_moves_to_mate() {
        assert_eq!(Score::mate_in(1).moves_to_mate(), 1);
        assert_eq!(Score::mate_in(3).moves_to_mate(), 2);
        assert_eq!(Score::mated_in(2).moves_to_mate(), -1);
        assert_eq!(format!("{}", Score::mate_in(3)), "mate 2");
        assert_eq!(format!("{}", Score::new(-40)), "cp -40");
    }
}
