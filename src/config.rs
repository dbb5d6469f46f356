/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::time::Duration;

use chessie::Move;

use crate::{TTable, MAX_PLY};

/// Engine-wide options, fixed for the duration of one search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOptions {
    /// Number of search threads, the calling thread included.
    pub threads: usize,

    /// Size of the transposition table, in megabytes.
    pub hash_mb: usize,

    /// Number of principal variations to report.
    pub multipv: usize,

    /// Playing strength in percent. Anything below 100 limits depth and adds delays.
    pub strength: u32,

    /// Consult the tablebase, if one is installed.
    pub use_tablebases: bool,

    /// Allow the search to report that it resigns.
    pub can_resign: bool,

    /// Resign when the score falls to this many centipawns or below.
    pub resign_threshold: i32,

    /// Plies of quiescence search in which quiet checking moves are tried.
    pub checks_in_qsearch: i32,

    /// Margin, in centipawns, by which a root move must lead the others to be an "easy move".
    pub easy_threshold: i32,
}

impl SearchOptions {
    /// Largest supported number of threads.
    pub const MAX_THREADS: usize = 64;

    /// Largest supported number of principal variations.
    pub const MAX_MULTIPV: usize = 10;

    /// Returns a copy with every field clamped into its supported range.
    pub fn validated(&self) -> Self {
        Self {
            threads: self.threads.clamp(1, Self::MAX_THREADS),
            hash_mb: self.hash_mb.clamp(TTable::MIN_SIZE, TTable::MAX_SIZE),
            multipv: self.multipv.clamp(1, Self::MAX_MULTIPV),
            strength: self.strength.min(100),
            use_tablebases: self.use_tablebases,
            can_resign: self.can_resign,
            resign_threshold: self.resign_threshold.min(0),
            checks_in_qsearch: self.checks_in_qsearch.clamp(0, 4),
            easy_threshold: self.easy_threshold.max(0),
        }
    }
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            threads: 1,
            hash_mb: TTable::DEFAULT_SIZE,
            multipv: 1,
            strength: 100,
            use_tablebases: true,
            can_resign: true,
            resign_threshold: -500,
            checks_in_qsearch: 1,
            easy_threshold: 200,
        }
    }
}

/// How a search decides when to stop.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchType {
    /// Search until the ply limit is reached.
    #[default]
    FixedDepth,

    /// Search for exactly the time limit.
    FixedTime,

    /// Search for about the time limit, with `extra_time` available when the root is unstable.
    TimeLimit,
}

/// Constraints on a single call to [`crate::SearchController::find_best_move`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchLimits {
    pub search_type: SearchType,

    /// Target time, in milliseconds. Ignored by [`SearchType::FixedDepth`].
    pub time_limit: u64,

    /// Extra time, in milliseconds, that [`SearchType::TimeLimit`] may spend on an unstable root.
    pub extra_time: u64,

    /// Maximum depth in plies.
    pub ply_limit: usize,

    /// The search runs while the opponent thinks. Disables resignation and time savings.
    pub background: bool,

    /// The search runs until stopped, even in positions that are already decided.
    pub infinite: bool,

    /// Root moves that must not be played.
    pub excludes: Vec<Move>,
}

impl SearchLimits {
    /// Search to `plies`.
    pub fn depth(plies: usize) -> Self {
        Self {
            ply_limit: plies,
            ..Default::default()
        }
    }

    /// Search for exactly `time`.
    pub fn fixed_time(time: Duration) -> Self {
        Self {
            search_type: SearchType::FixedTime,
            time_limit: time.as_millis() as u64,
            ..Default::default()
        }
    }

    /// Search for about `time`, allowing `extra` on an unstable root.
    pub fn time_limit(time: Duration, extra: Duration) -> Self {
        Self {
            search_type: SearchType::TimeLimit,
            time_limit: time.as_millis() as u64,
            extra_time: extra.as_millis() as u64,
            ..Default::default()
        }
    }

    /// Maximum depth this search may reach.
    pub fn effective_ply_limit(&self) -> usize {
        match self.search_type {
            SearchType::FixedDepth => self.ply_limit.clamp(1, MAX_PLY - 1),
            SearchType::FixedTime | SearchType::TimeLimit => MAX_PLY - 1,
        }
    }
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self {
            search_type: SearchType::FixedDepth,
            time_limit: 0,
            extra_time: 0,
            ply_limit: MAX_PLY - 1,
            background: false,
            infinite: false,
            excludes: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_clamps() {
        let options = SearchOptions {
            threads: 0,
            multipv: 99,
            strength: 250,
            resign_threshold: 300,
            ..Default::default()
        }
        .validated();

        assert_eq!(options.threads, 1);
        assert_eq!(options.multipv, SearchOptions::MAX_MULTIPV);
        assert_eq!(options.strength, 100);
        assert_eq!(options.resign_threshold, 0);
        assert_eq!(SearchOptions::default().validated(), SearchOptions::default());
    }

    #[test]
    fn test_ply_limits() {
        assert_eq!(SearchLimits::depth(0).effective_ply_limit(), 1);
        assert_eq!(SearchLimits::depth(500).effective_ply_limit(), MAX_PLY - 1);
        assert_eq!(
            SearchLimits::fixed_time(Duration::from_millis(10)).effective_ply_limit(),
            MAX_PLY - 1
        );
    }
}
