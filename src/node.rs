/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::ops::{BitOr, BitOrAssign, Index, IndexMut};

use arrayvec::ArrayVec;
use chessie::{Move, PieceKind};

use crate::{movepicker::MAX_MOVES, Depth, Killers, Score, MAX_PLY};

/// Number of nodes in a thread's stack: one per ply, plus room for the node below the deepest one.
pub const NODE_STACK_SIZE: usize = MAX_PLY + 2;

/// Represents the best sequence of moves found during a search.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrincipalVariation(ArrayVec<Move, MAX_PLY>);

impl PrincipalVariation {
    /// An empty PV.
    pub const EMPTY: Self = Self(ArrayVec::new_const());

    /// clears the moves of `self`.
    #[inline(always)]
    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Replaces the contents of `self` with `mv` followed by the contents of `other`.
    ///
    /// Moves that do not fit are dropped.
    #[inline(always)]
    pub fn extend(&mut self, mv: Move, other: &Self) {
        self.clear();
        self.0.push(mv);
        let room = self.0.remaining_capacity().min(other.0.len());
        // Cannot fail: `room` never exceeds the remaining capacity
        let _ = self.0.try_extend_from_slice(&other.0[..room]);
    }

    /// Replaces the contents of `self` with the single move `mv`.
    #[inline(always)]
    pub fn set(&mut self, mv: Move) {
        self.clear();
        self.0.push(mv);
    }

    #[inline(always)]
    pub fn moves(&self) -> &[Move] {
        &self.0
    }
}

impl Default for PrincipalVariation {
    #[inline(always)]
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Properties of how a node is being searched.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeFlags(u8);

impl NodeFlags {
    pub const NONE: Self = Self(0);

    /// The node is an internal iterative deepening search of its own position.
    pub const IID: Self = Self(1);

    /// The node verifies a null move cutoff.
    pub const VERIFY: Self = Self(2);

    /// The move leading here was only a pass.
    pub const NULL_MOVE: Self = Self(4);

    /// The search result was exact and came from a terminal condition or the transposition table.
    pub const EXACT: Self = Self(8);

    #[inline(always)]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for NodeFlags {
    type Output = Self;
    #[inline(always)]
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for NodeFlags {
    #[inline(always)]
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Depth adjustments applied to the move currently being searched from a node.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Extensions(u8);

impl Extensions {
    pub const NONE: Self = Self(0);
    pub const CHECK: Self = Self(1);
    pub const FORCED: Self = Self(2);
    pub const PAWN_PUSH: Self = Self(4);
    pub const CAPTURE: Self = Self(8);
    pub const LMR: Self = Self(16);

    #[inline(always)]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOrAssign for Extensions {
    #[inline(always)]
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// The opponent's best reply to a null move: what they threaten to do if left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Threat {
    pub mv: Move,

    /// The piece making the threat.
    pub piece: PieceKind,

    /// The piece the threat would capture, if any.
    pub victim: Option<PieceKind>,
}

/// Mutable search state for one ply of one thread.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub alpha: Score,
    pub beta: Score,
    pub best: Option<Move>,
    pub best_score: Score,
    pub pv: PrincipalVariation,

    /// Moves searched so far, in order.
    pub done: ArrayVec<Move, MAX_MOVES>,

    /// Number of moves searched so far.
    pub num_try: usize,
    pub cutoff: bool,

    /// Static evaluation of the position.
    pub static_eval: Score,

    /// Static evaluation refined by the transposition table, used for pruning.
    pub eval: Score,

    pub flags: NodeFlags,

    /// Adjustments applied to the move currently being searched.
    pub extensions: Extensions,

    pub threat: Option<Threat>,

    /// The move that led to this node, `None` at the root or after a null move.
    pub last_move: Option<Move>,

    pub depth: Depth,
    pub ply: usize,
    pub in_check: bool,

    /// `true` if an odd number of null moves lead to this node.
    pub null_parity: bool,

    /// Plies since the last null move (or since the root), limiting repetition scans.
    pub plies_since_null: usize,
    pub killers: Killers,
}

impl NodeInfo {
    /// `true` if searched with a window wider than zero.
    #[inline(always)]
    pub fn is_pv(&self) -> bool {
        self.beta > self.alpha + 1
    }

    /// Resets the per-visit fields before a node is searched.
    pub fn enter(&mut self, alpha: Score, beta: Score, ply: usize, depth: Depth, flags: NodeFlags) {
        self.alpha = alpha;
        self.beta = beta;
        self.best = None;
        self.best_score = -Score::MATE;
        self.pv.clear();
        self.done.clear();
        self.num_try = 0;
        self.cutoff = false;
        self.static_eval = Score::INVALID;
        self.eval = Score::INVALID;
        self.flags = flags;
        self.extensions = Extensions::NONE;
        self.threat = None;
        self.depth = depth;
        self.ply = ply;
    }
}

impl Default for NodeInfo {
    fn default() -> Self {
        Self {
            alpha: -Score::MATE,
            beta: Score::MATE,
            best: None,
            best_score: -Score::MATE,
            pv: PrincipalVariation::EMPTY,
            done: ArrayVec::new(),
            num_try: 0,
            cutoff: false,
            static_eval: Score::INVALID,
            eval: Score::INVALID,
            flags: NodeFlags::NONE,
            extensions: Extensions::NONE,
            threat: None,
            last_move: None,
            depth: Depth::ZERO,
            ply: 0,
            in_check: false,
            null_parity: false,
            plies_since_null: 0,
            killers: Killers::default(),
        }
    }
}

/// A thread's per-ply search state, indexed by ply and allocated once per thread.
#[derive(Debug, Clone)]
pub struct NodeStack(Box<[NodeInfo]>);

impl NodeStack {
    pub fn new() -> Self {
        Self(vec![NodeInfo::default(); NODE_STACK_SIZE].into_boxed_slice())
    }

    /// Clears the killers of every ply.
    pub fn clear_killers(&mut self) {
        self.0.iter_mut().for_each(|node| node.killers.clear());
    }

    /// Mutable access to the nodes at `ply` and `ply + 1`.
    #[inline(always)]
    pub fn pair_mut(&mut self, ply: usize) -> (&mut NodeInfo, &mut NodeInfo) {
        let (lower, upper) = self.0.split_at_mut(ply + 1);
        (&mut lower[ply], &mut upper[0])
    }
}

impl Default for NodeStack {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<usize> for NodeStack {
    type Output = NodeInfo;
    #[inline(always)]
    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl IndexMut<usize> for NodeStack {
    #[inline(always)]
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.0[index]
    }
}
