/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::fmt;

use chessie::Move;

use crate::Score;

/// How a search ended, or what it concluded about the position.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchState {
    /// Nothing special happened.
    #[default]
    Normal,

    /// The search was stopped before reaching its limit.
    Terminated,

    /// The side to move is in check.
    Check,

    /// The side to move is checkmated.
    Checkmate,

    /// The side to move is stalemated.
    Stalemate,

    /// The position is a draw by rule.
    Draw,

    /// The score is bad enough to resign.
    Resigns,
}

/// One line of a multi-PV report.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PvLine {
    pub score: Score,
    pub depth: i32,
    pub pv: Vec<Move>,
}

/// Progress and result of a search, reported after every completed iteration.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Statistics {
    /// Score of the last search of the root.
    pub value: Score,

    /// Last score that was inside its aspiration window.
    pub display_value: Score,

    /// Depth of the iteration in progress.
    pub depth: i32,

    /// Deepest fully completed iteration.
    pub completed_depth: i32,

    pub nodes: u64,
    pub tb_hits: u64,
    pub splits: u64,
    pub elapsed_ms: u64,

    /// Principal variation of the best line.
    pub best_line: Vec<Move>,

    /// Lines found so far in a multi-PV search, best first.
    pub multipv: Vec<PvLine>,

    /// Index of the line being searched in a multi-PV search.
    pub multipv_index: usize,

    /// The last root search failed high.
    pub fail_high: bool,

    /// The last root search failed low.
    pub fail_low: bool,

    pub state: SearchState,

    /// Transposition table fill, in permille.
    pub hash_full: usize,
}

impl Statistics {
    /// The first move of the best line.
    #[inline(always)]
    pub fn best_move(&self) -> Option<Move> {
        self.best_line.first().copied()
    }

    /// Nodes searched per second.
    pub fn nps(&self) -> u64 {
        self.nodes * 1000 / self.elapsed_ms.max(1)
    }
}

impl fmt::Display for Statistics {
    /// Formats like a UCI `info` line.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "depth {} score {}",
            self.completed_depth.max(self.depth),
            self.display_value
        )?;
        if self.fail_high {
            write!(f, " lowerbound")?;
        } else if self.fail_low {
            write!(f, " upperbound")?;
        }
        write!(
            f,
            " nodes {} nps {} time {} hashfull {}",
            self.nodes,
            self.nps(),
            self.elapsed_ms,
            self.hash_full
        )?;
        if self.tb_hits > 0 {
            write!(f, " tbhits {}", self.tb_hits)?;
        }
        if !self.best_line.is_empty() {
            write!(f, " pv")?;
            for mv in &self.best_line {
                write!(f, " {mv}")?;
            }
        }
        Ok(())
    }
}
