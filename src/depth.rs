/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::{fmt, ops::AddAssign};

/// Maximum number of plies the search may descend from the root.
pub const MAX_PLY: usize = 64;

/// Number of fractional units that make up a single ply.
pub const DEPTH_INCREMENT: i32 = 4;

/// Remaining search depth below a node.
///
/// Uses [fractional plies](https://www.chessprogramming.org/Ply#Fractional_Plies),
/// with [`DEPTH_INCREMENT`] units per ply, so extensions and reductions may be a quarter of a ply.
#[derive(Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Depth(i32);

impl Depth {
    /// A depth of zero plies.
    pub const ZERO: Self = Self(0);

    /// A depth of one ply.
    pub const ONE: Self = Self(DEPTH_INCREMENT);

    /// Half of a ply.
    pub const HALF: Self = Self(DEPTH_INCREMENT / 2);

    /// Three quarters of a ply.
    pub const THREE_QUARTERS: Self = Self(3 * DEPTH_INCREMENT / 4);

    /// Deepest depth that can be represented in the transposition table.
    pub const MAX: Self = Self::new(MAX_PLY as i32 - 1);

    /// Constructs a new [`Depth`] that is `n` whole plies deep.
    #[inline(always)]
    pub const fn new(n: i32) -> Self {
        Self(n * DEPTH_INCREMENT)
    }

    /// Constructs a [`Depth`] directly from fractional units.
    #[inline(always)]
    pub const fn from_units(units: i32) -> Self {
        Self(units)
    }

    /// Returns the raw number of fractional units.
    #[inline(always)]
    pub const fn units(&self) -> i32 {
        self.0
    }

    /// Returns the number of plies this depth represents, truncating any fractional depth.
    #[inline(always)]
    pub const fn plies(&self) -> i32 {
        self.0 / DEPTH_INCREMENT
    }

    /// Returns the number of plies this depth represents, rounding to the nearest whole depth.
    #[inline(always)]
    pub fn rounded(&self) -> i32 {
        (self.0 as f32 / DEPTH_INCREMENT as f32).round() as i32
    }

    /// Returns `true` if no depth remains, meaning quiescence search takes over.
    #[inline(always)]
    pub const fn is_exhausted(&self) -> bool {
        self.0 <= 0
    }
}

macro_rules! impl_binary_op {
    ($trait:tt, $fn:ident) => {
        impl std::ops::$trait for Depth {
            type Output = Self;

            #[inline(always)]
            fn $fn(self, rhs: Self) -> Self::Output {
                Self(self.0.$fn(rhs.0))
            }
        }
    };
}

impl_binary_op!(Add, add);
impl_binary_op!(Sub, sub);

impl std::ops::Add<i32> for Depth {
    type Output = Depth;
    #[inline(always)]
    fn add(self, rhs: i32) -> Self::Output {
        Self(self.0 + Self::new(rhs).0)
    }
}

impl std::ops::Sub<i32> for Depth {
    type Output = Depth;
    #[inline(always)]
    fn sub(self, rhs: i32) -> Self::Output {
        Self(self.0 - Self::new(rhs).0)
    }
}

impl std::ops::Mul<i32> for Depth {
    type Output = Depth;
    #[inline(always)]
    fn mul(self, rhs: i32) -> Self::Output {
        Self(self.0 * rhs)
    }
}

impl std::ops::Div<i32> for Depth {
    type Output = Depth;
    #[inline(always)]
    fn div(self, rhs: i32) -> Self::Output {
        Self(self.0 / rhs)
    }
}

impl std::ops::Neg for Depth {
    type Output = Depth;
    #[inline(always)]
    fn neg(self) -> Self::Output {
        Self(-self.0)
    }
}

impl AddAssign for Depth {
    #[inline(always)]
    fn add_assign(&mut self, rhs: Self) {
        self.0.add_assign(rhs.0);
    }
}

impl std::ops::SubAssign for Depth {
    #[inline(always)]
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl PartialEq<i32> for Depth {
    #[inline(always)]
    fn eq(&self, other: &i32) -> bool {
        self.0.eq(&Self::new(*other).0)
    }
}

impl PartialOrd<i32> for Depth {
    #[inline(always)]
    fn partial_cmp(&self, other: &i32) -> Option<std::cmp::Ordering> {
        self.0.partial_cmp(&(other * DEPTH_INCREMENT))
    }
}

impl fmt::Display for Depth {
    #[inline(always)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.plies().fmt(f)
    }
}

impl fmt::Debug for Depth {
    #[inline(always)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self} ({}/{DEPTH_INCREMENT})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_math() {
        let mut depth = Depth::ZERO;
        assert_eq!(depth, Depth::new(0));

        depth += Depth::ONE;
        assert_eq!(depth, Depth::new(1));

        depth = depth + 5;
        assert_eq!(depth, Depth::new(6));

        depth = depth * 2;
        assert_eq!(depth, Depth::new(12));

        depth = depth / 3;
        assert_eq!(depth, Depth::new(4));

        depth = depth - 3;
        assert_eq!(depth, Depth::ONE);
    }

    #[test]
    fn test_fractional() {
        let depth = Depth::ONE + Depth::HALF;
        assert_eq!(depth.plies(), 1);
        assert_eq!(depth.rounded(), 2);
        assert!(depth > 1);
        assert!(depth < 2);

        let depth = Depth::THREE_QUARTERS - Depth::ONE;
        assert!(depth.is_exhausted(), "{depth:?} should be exhausted");
        assert_eq!(depth.units(), -1);
    }

    #[test]
    fn test_max_fits_in_table() {
        // Stored depths are biased by two units and packed into a byte.
        assert!(Depth::MAX.units() + 2 <= u8::MAX as i32);
    }
}
