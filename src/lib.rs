/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

/// Attack masks for every piece, computed without the board's own generator.
mod attacks;

/// Command-line interface of the `tadpole` binary.
mod cli;

/// Engine options and per-search limits.
mod config;

/// Iterative deepening, time management, and the state shared by all search threads.
mod controller;

/// Search depth in fractional plies.
mod depth;

/// Errors that cross the boundary of the crate.
mod error;

/// Evaluation of chess positions.
mod eval;

/// Per-move extensions, reductions and pruning decisions.
mod extensions;

/// History and killer move heuristics.
mod history;

/// Phase-ordered move selection.
mod movepicker;

/// Per-ply search state.
mod node;

/// Helpers over the board representation.
mod position;

/// Search of the root position.
mod root;

/// Scores and mate distances.
mod score;

/// The recursive alpha-beta search run by every thread.
mod search;

/// Static exchange evaluation.
mod see;

/// Nodes shared between threads.
mod split;

/// Reports on a search's progress and outcome.
mod stats;

/// Endgame tablebase collaborator.
mod tablebase;

/// The pool of search threads.
mod threads;

/// Transposition table.
mod ttable;

/// Tunable search parameters.
mod tune;

pub use cli::*;
pub use config::*;
pub use controller::{PostFunction, SearchController, SearchResult, StopHandle, TerminateFunction};
pub use depth::*;
pub use error::*;
pub use eval::*;
pub use history::*;
pub use position::{hash_of, parse_fen, parse_move, PlayedGame};
pub use score::*;
pub use stats::*;
pub use tablebase::*;
pub use ttable::*;

use position::Occupancy;
use see::see_ge;
