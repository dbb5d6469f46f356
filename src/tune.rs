/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Search parameters.
//!
//! Every value is a macro so that a future tuning harness can swap it out without touching call sites.
//! Depths are expressed in whole plies unless stated otherwise.

/// Half-widths of successive aspiration windows, in centipawns. A final step opens the window to mate.
macro_rules! aspiration_steps {
    () => {
        [37, 75, 150, 300, 600, $crate::Score::MATE.inner()]
    };
}
pub(crate) use aspiration_steps;

/// Iterations at or below this depth use a wide, asymmetric window and score every root move.
macro_rules! easy_plies {
    () => {
        3
    };
}
pub(crate) use easy_plies;

/// Maximum remaining depth at which futility pruning is tried.
macro_rules! futility_depth {
    () => {
        3
    };
}
pub(crate) use futility_depth;

/// Futility margins in pawns, indexed by remaining depth in plies.
macro_rules! futility_margins {
    () => {
        [1, 2, 3, 5]
    };
}
pub(crate) use futility_margins;

/// Maximum remaining depth at which razoring is tried.
macro_rules! razor_depth {
    () => {
        3
    };
}
pub(crate) use razor_depth;

/// Base razoring margin, in centipawns. Every ply above one adds a pawn.
macro_rules! razor_margin {
    () => {
        300
    };
}
pub(crate) use razor_margin;

/// Static null move margins in pawns, indexed by remaining depth in fractional units.
macro_rules! static_null_margins {
    () => {
        [1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 4, 4, 5, 9, 9, 9]
    };
}
pub(crate) use static_null_margins;

/// Maximum remaining depth at which captures losing material are pruned.
macro_rules! see_pruning_depth {
    () => {
        3
    };
}
pub(crate) use see_pruning_depth;

/// Maximum remaining depth at which late move pruning is applied.
macro_rules! lmp_depth {
    () => {
        10
    };
}
pub(crate) use lmp_depth;

/// Number of moves searched before late move pruning kicks in, indexed by remaining depth in plies.
macro_rules! lmp_move_counts {
    () => {
        [3, 3, 5, 9, 15, 23, 33, 45, 59, 75, 93]
    };
}
pub(crate) use lmp_move_counts;

/// Minimum remaining depth, in fractional units, for late move reductions.
macro_rules! lmr_depth {
    () => {
        (5 * $crate::DEPTH_INCREMENT / 2)
    };
}
pub(crate) use lmr_depth;

/// Constant term of the reduction formula.
macro_rules! lmr_base {
    () => {
        0.3
    };
}
pub(crate) use lmr_base;

/// Divisor of the reduction formula in non-PV nodes.
macro_rules! lmr_non_pv_divisor {
    () => {
        1.5
    };
}
pub(crate) use lmr_non_pv_divisor;

/// Divisor of the reduction formula in PV nodes.
macro_rules! lmr_pv_divisor {
    () => {
        2.25
    };
}
pub(crate) use lmr_pv_divisor;

/// Null move reduction in plies, before the depth-dependent part.
macro_rules! null_move_reduction {
    () => {
        4
    };
}
pub(crate) use null_move_reduction;

/// Minimum remaining depth at which a null move cutoff is verified by a real search.
macro_rules! null_verify_depth {
    () => {
        6
    };
}
pub(crate) use null_verify_depth;

/// Minimum remaining depth at which internal iterative deepening is used.
macro_rules! iid_depth {
    () => {
        4
    };
}
pub(crate) use iid_depth;

/// Margin added to the gain of a capture before it is pruned in quiescence.
macro_rules! qsearch_futility_margin {
    () => {
        60
    };
}
pub(crate) use qsearch_futility_margin;

/// Quiescence only tries quiet checks when stand pat is within this margin of alpha.
macro_rules! qsearch_check_margin {
    () => {
        200
    };
}
pub(crate) use qsearch_check_margin;

/// Number of nodes accumulated locally before the shared counter is updated.
macro_rules! node_accum_threshold {
    () => {
        16
    };
}
pub(crate) use node_accum_threshold;

/// Default interval, in accumulated node batches, between time checks.
macro_rules! time_check_interval {
    () => {
        (4096 / $crate::tune::node_accum_threshold!())
    };
}
pub(crate) use time_check_interval;

/// Shallowest split depth the self-tuning may select, in plies.
macro_rules! min_split_depth {
    () => {
        5
    };
}
pub(crate) use min_split_depth;

/// Deepest split depth the self-tuning may select, in plies.
macro_rules! max_split_depth {
    () => {
        16
    };
}
pub(crate) use max_split_depth;

/// Target number of splits per second, per thread.
macro_rules! target_splits_per_thread {
    () => {
        120
    };
}
pub(crate) use target_splits_per_thread;

/// Ply limits applied when playing at reduced strength, indexed by `strength / 4`.
macro_rules! strength_ply_limits {
    () => {
        [1, 1, 1, 1, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 4, 6, 8, 9, 10, 11, 12, 13, 14, 16]
    };
}
pub(crate) use strength_ply_limits;
