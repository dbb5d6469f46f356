/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use thiserror::Error;

/// Errors that can cross the boundary of the search core.
///
/// Conditions internal to a search (illegal moves found after the fact, cancellation) never surface here.
#[derive(Debug, Error)]
pub enum TadpoleError {
    /// A position could not be parsed.
    #[error("invalid FEN {fen:?}: {reason}")]
    InvalidFen { fen: String, reason: String },

    /// A move string did not name a legal move in the given position.
    #[error("illegal move {mv:?} in position {fen:?}")]
    IllegalMove { mv: String, fen: String },

    /// Worker threads could not be created; the pool kept `available` workers.
    #[error("failed to spawn search threads: requested {requested}, running with {available}")]
    ThreadSpawn { requested: usize, available: usize },

    /// The transposition table could not be allocated.
    #[error("failed to allocate {bytes} bytes for the transposition table")]
    HashAllocation { bytes: usize },

    /// The position has no legal moves to search.
    #[error("no legal moves available")]
    NoLegalMoves,
}
