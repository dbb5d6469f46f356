/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use chessie::Game;

use crate::Score;

/// An endgame tablebase the search may consult for positions with few pieces.
pub trait Tablebase: Send + Sync {
    /// Largest number of men (Kings and pawns included) this tablebase covers.
    fn max_pieces(&self) -> usize;

    /// Exact score of `game` from the side-to-move's perspective, with mate scores relative to the probed
    /// position, or `None` if the position is not covered.
    fn probe(&self, game: &Game) -> Option<Score>;
}
