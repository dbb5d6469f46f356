/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex,
};

use chessie::{Game, Move};
use log::trace;

use crate::{
    controller::SearchContext,
    extensions::Candidate,
    movepicker::{MovePicker, ScoredMove},
    node::{NodeInfo, PrincipalVariation},
    search::{Search, Window},
    threads::lock,
    Occupancy, Score,
};

/// Most split points a single thread may be nested in.
pub const MAX_SPLIT_STACK: usize = 16;

/// The part of a split point that threads update as they finish moves.
#[derive(Debug)]
pub(crate) struct SplitState {
    /// Moves left to search when the split was made, in order.
    moves: Vec<ScoredMove>,

    /// Index into `moves` of the next move to hand out.
    next: usize,

    /// Ordinal, in the node's move ordering, of `moves[0]`.
    base_index: usize,

    pub best_score: Score,
    pub best: Option<Move>,
    pub pv: PrincipalVariation,
    pub num_try: usize,
    pub done: Vec<Move>,

    /// Moves searched here with their scores, when the split is at the root.
    pub root_scores: Vec<(Move, Score)>,
}

/// A node whose remaining moves are searched by several threads at once.
///
/// The node's parameters are copied in when the split is made, so helpers never touch the master's stack.
/// Everything that changes afterwards sits behind one lock.
pub(crate) struct SplitPoint {
    /// Thread that created the split and will continue the node's search once it is done.
    pub master: usize,

    /// Split point the master was working for when it split, if any.
    pub parent: Option<Arc<SplitPoint>>,

    pub ctx: Arc<SearchContext>,
    pub game: Game,

    /// Keys from the start of the game up to and including the split node.
    pub keys: Vec<u64>,
    pub root_index: usize,
    pub ply: usize,

    /// The split node as it was when the split was made.
    pub node: NodeInfo,

    /// Number of legal moves of the split node.
    pub legal: usize,

    state: Mutex<SplitState>,
    cutoff: AtomicBool,

    /// Bitmask of the threads still working here, the master excluded.
    slaves: AtomicU64,
}

impl SplitPoint {
    /// Returns `true` if this split point, or any it is nested in, has failed high.
    pub(crate) fn is_cut_off(&self) -> bool {
        let mut current = Some(self);
        while let Some(sp) = current {
            if sp.cutoff.load(Ordering::Acquire) {
                return true;
            }
            current = sp.parent.as_deref();
        }
        false
    }

    /// Returns `true` if `ancestor` is this split point or one it is nested in.
    pub(crate) fn descends_from(&self, ancestor: &SplitPoint) -> bool {
        let mut current = Some(self);
        while let Some(sp) = current {
            if std::ptr::eq(sp, ancestor) {
                return true;
            }
            current = sp.parent.as_deref();
        }
        false
    }

    /// Returns `true` while any helper is still searching here.
    #[inline(always)]
    pub(crate) fn has_slaves(&self) -> bool {
        self.slaves.load(Ordering::Acquire) != 0
    }

    pub(crate) fn add_slave(&self, id: usize) {
        self.slaves.fetch_or(1 << id, Ordering::AcqRel);
    }

    pub(crate) fn remove_slave(&self, id: usize) {
        self.slaves.fetch_and(!(1 << id), Ordering::AcqRel);
    }

    /// Hands out the next unsearched move, with its ordinal and the node's best score and move count so far.
    fn next_move(&self) -> Option<(ScoredMove, usize, Score, usize)> {
        let mut state = lock(&self.state);
        let scored = *state.moves.get(state.next)?;
        let index = state.base_index + state.next;
        state.next += 1;
        Some((scored, index, state.best_score, state.num_try))
    }

    /// Locks and returns the shared state.
    pub(crate) fn state(&self) -> std::sync::MutexGuard<'_, SplitState> {
        lock(&self.state)
    }
}

impl Search {
    /// Shares the rest of the node at `ply` with idle threads, if there are any.
    ///
    /// Returns `true` if the node was split, in which case every remaining move has been searched and the node's
    /// best score, best move, PV and searched moves reflect the work of all threads.
    pub(crate) fn maybe_split(
        &mut self,
        game: &Game,
        ply: usize,
        picker: &mut MovePicker,
        index: usize,
        legal: usize,
    ) -> bool {
        let remaining = picker.remaining();
        self.split(game, ply, remaining, || picker.materialize(), index, legal)
            .is_some()
    }

    /// Shares the `remaining` moves that `take_moves` produces, returning the finished split point so the root can
    /// read its move scores.
    ///
    /// `take_moves` is only called if the node is actually split.
    pub(crate) fn split(
        &mut self,
        game: &Game,
        ply: usize,
        remaining: usize,
        take_moves: impl FnOnce() -> Vec<ScoredMove>,
        index: usize,
        legal: usize,
    ) -> Option<Arc<SplitPoint>> {
        if self.split_stack.len() >= MAX_SPLIT_STACK || self.stopped() {
            return None;
        }

        let pool = Arc::clone(&self.ctx.pool);
        let sp = {
            let _checkout = lock(&pool.checkout);

            let wanted = remaining.saturating_sub(1);
            let helpers = pool.available(self.id, &self.split_stack, wanted);
            if helpers.is_empty() {
                return None;
            }

            let node = &self.nodes[ply];
            let state = SplitState {
                moves: take_moves(),
                next: 0,
                base_index: index,
                best_score: node.best_score,
                best: node.best,
                pv: node.pv.clone(),
                num_try: node.num_try,
                done: node.done.to_vec(),
                root_scores: Vec::new(),
            };
            let sp = Arc::new(SplitPoint {
                master: self.id,
                parent: self.split_stack.last().cloned(),
                ctx: Arc::clone(&self.ctx),
                game: *game,
                keys: self.keys[..=self.root_index + ply].to_vec(),
                root_index: self.root_index,
                ply,
                node: node.clone(),
                legal,
                state: Mutex::new(state),
                cutoff: AtomicBool::new(false),
                slaves: AtomicU64::new(0),
            });

            for &id in &helpers {
                pool.assign(id, &sp);
            }
            trace!(
                "thread {} split at ply {ply}, depth {}, helpers {helpers:?}",
                self.id,
                node.depth
            );
            sp
        };
        self.ctx.splits.fetch_add(1, Ordering::Relaxed);

        self.split_stack.push(Arc::clone(&sp));
        self.search_smp(&sp);
        self.wait_for_slaves(&sp);
        self.split_stack.pop();

        let state = sp.state();
        let node = &mut self.nodes[ply];
        node.best_score = state.best_score;
        node.best = state.best;
        node.pv = state.pv.clone();
        node.num_try = state.num_try;
        node.done.clear();
        let _ = node.done.try_extend_from_slice(&state.done);
        node.cutoff = state.best_score >= node.beta;
        drop(state);

        Some(sp)
    }

    /// Searches moves of a split point until none are left or the split point is no longer needed.
    pub(crate) fn search_smp(&mut self, sp: &SplitPoint) {
        let ply = sp.ply;
        let game = &sp.game;
        let occ = Occupancy::new(game);
        let depth = sp.node.depth;
        let beta = sp.node.beta;

        while !self.stopped() {
            let Some((scored, index, best_score, num_try)) = sp.next_move() else {
                break;
            };

            let node = &mut self.nodes[ply];
            node.best_score = best_score;
            node.num_try = num_try;

            let mv = scored.mv;
            let child = game.with_move_made(mv);
            let candidate = Candidate {
                mv,
                phase: scored.phase,
                index,
                gives_check: child.is_in_check(),
            };
            let Some(extend) = self.calc_extensions(game, &occ, ply, &candidate, sp.legal) else {
                continue;
            };

            self.link_child(ply, Some(mv));
            let window = Window {
                lo: best_score,
                hi: best_score + 1,
                beta,
            };
            let score = self.search_move(&child, ply, depth, extend, window);
            if self.stopped() {
                break;
            }

            let mut state = sp.state();
            state.done.push(mv);
            state.num_try += 1;
            if ply == 0 {
                state.root_scores.push((mv, score));
                self.ctx.fail_high_root.store(false, Ordering::Relaxed);
            }

            if score > state.best_score {
                state.best_score = score;
                state.best = Some(mv);
                if score >= beta {
                    state.pv.set(mv);
                } else {
                    state.pv.extend(mv, &self.nodes[ply + 1].pv);
                }

                // Siblings stop at their next move
                if score >= beta || score >= Score::MATE - 1 - ply as i32 {
                    sp.cutoff.store(true, Ordering::Release);
                    break;
                }
            }
        }
    }

    /// Searches a split point as a helper, on behalf of its master.
    pub(crate) fn join_split(&mut self, sp: &Arc<SplitPoint>) {
        if !Arc::ptr_eq(&self.ctx, &sp.ctx) {
            self.ctx = Arc::clone(&sp.ctx);
        }
        let epoch = self.ctx.pool.history_epoch.load(Ordering::Acquire);
        if self.history_epoch != epoch {
            self.clear();
            self.history_epoch = epoch;
        }
        self.keys.clear();
        self.keys.extend_from_slice(&sp.keys);
        self.root_index = sp.root_index;
        self.nodes[sp.ply] = sp.node.clone();

        self.split_stack.clear();
        self.split_stack.push(Arc::clone(sp));
        self.search_smp(sp);
        self.split_stack.pop();
        self.flush_nodes();
    }

    /// Blocks until every helper of `sp` has finished, helping at split points created below it meanwhile.
    fn wait_for_slaves(&mut self, sp: &Arc<SplitPoint>) {
        let pool = Arc::clone(&self.ctx.pool);
        while let Some(work) = pool.wait_as_master(self.id, sp) {
            let ctx = Arc::clone(&self.ctx);
            let id = self.id;
            let helper = self
                .helper
                .get_or_insert_with(|| Box::new(Search::new(ctx, id)));
            helper.join_split(&work);
            pool.finish(id, &work, false);
        }
    }
}
