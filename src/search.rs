/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::sync::{atomic::Ordering, Arc};

use chessie::{Game, Move, PieceKind};

use crate::{
    controller::SearchContext,
    extensions::{moves_related, Candidate},
    movepicker::MovePicker,
    node::{Extensions, NodeFlags, NodeStack, Threat},
    position::{hash_of, is_tactical, men_count, pack_move, piece_count, unpack_move, value_of},
    see_ge,
    split::SplitPoint,
    ttable::{
        Bound, EntryFlags, Probe, TTableEntry, QSEARCH_CHECK_DEPTH, QSEARCH_NO_CHECK_DEPTH,
    },
    tune, Depth, HistoryTable, Occupancy, Score, DEPTH_INCREMENT, MAX_PLY,
};

/// Bounds used when searching one move of a node.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Window {
    /// Best score found so far in the node.
    pub lo: Score,

    /// Upper bound of the first, usually zero-width, search.
    pub hi: Score,

    /// The node's real upper bound, used if the first search fails high.
    pub beta: Score,
}

/// One search thread: its node stack, history, and the keys of the line it is searching.
///
/// A [`Search`] is owned by exactly one thread. Everything shared between threads lives in the [`SearchContext`].
pub(crate) struct Search {
    pub(crate) ctx: Arc<SearchContext>,

    /// Index of the thread that owns this search. `0` is the thread that called the controller.
    pub(crate) id: usize,

    pub(crate) nodes: NodeStack,
    pub(crate) history: HistoryTable,

    /// Keys of every position from the start of the game to the current node.
    pub(crate) keys: Vec<u64>,

    /// Index into `keys` of the root position.
    pub(crate) root_index: usize,

    /// Split points this thread is currently working on, innermost last.
    pub(crate) split_stack: Vec<Arc<SplitPoint>>,

    /// Search used when this thread helps at one of its own split points.
    pub(crate) helper: Option<Box<Search>>,

    /// Generation of the pool's history clearing that `history` reflects.
    pub(crate) history_epoch: u64,

    node_accum: u32,
    node_batches: u32,
}

impl Search {
    pub(crate) fn new(ctx: Arc<SearchContext>, id: usize) -> Self {
        Self {
            ctx,
            id,
            nodes: NodeStack::new(),
            history: HistoryTable::default(),
            keys: Vec::with_capacity(2 * MAX_PLY),
            root_index: 0,
            split_stack: Vec::new(),
            helper: None,
            history_epoch: 0,
            node_accum: 0,
            node_batches: 0,
        }
    }

    /// Prepares to search a new root, whose game history is `keys` (the root itself last).
    pub(crate) fn set_root(&mut self, ctx: Arc<SearchContext>, keys: &[u64]) {
        self.ctx = ctx;
        self.keys.clear();
        self.keys.extend_from_slice(keys);
        self.root_index = keys.len().saturating_sub(1);
        self.split_stack.clear();
        self.node_accum = 0;
        self.node_batches = 0;

        let root = &mut self.nodes[0];
        root.last_move = None;
        root.null_parity = false;
        root.plies_since_null = usize::MAX;
    }

    /// Forgets everything learned about move ordering.
    pub(crate) fn clear(&mut self) {
        self.history.clear();
        self.nodes.clear_killers();
    }

    /// Counts a node, periodically publishing the count and checking the clock.
    #[inline(always)]
    pub(crate) fn count_node(&mut self) {
        self.node_accum += 1;
        if self.node_accum >= tune::node_accum_threshold!() {
            self.flush_nodes();
            self.node_batches += 1;
            if self.node_batches >= self.ctx.time_check_interval.load(Ordering::Relaxed) {
                self.node_batches = 0;
                self.ctx.check_time();
            }
        }
    }

    /// Adds the locally accumulated node count to the shared total.
    pub(crate) fn flush_nodes(&mut self) {
        self.ctx
            .nodes
            .fetch_add(self.node_accum as u64, Ordering::Relaxed);
        self.node_accum = 0;
    }

    /// Returns `true` if the whole search was stopped, or if the subtree this thread works on is no longer needed.
    #[inline(always)]
    pub(crate) fn stopped(&self) -> bool {
        self.ctx.is_stopped() || self.split_stack.last().is_some_and(|sp| sp.is_cut_off())
    }

    #[inline(always)]
    fn evaluate(&self, game: &Game) -> Score {
        self.ctx.evaluator.evaluate(game)
    }

    /// Records the key of the node at `ply`.
    #[inline(always)]
    pub(crate) fn record_key(&mut self, ply: usize, hash: u64) {
        self.keys.truncate(self.root_index + ply);
        self.keys.push(hash);
    }

    /// Prepares the node below `ply` to be reached by `mv`, or by a null move if `mv` is `None`.
    #[inline(always)]
    pub(crate) fn link_child(&mut self, ply: usize, mv: Option<Move>) {
        let (node, child) = self.nodes.pair_mut(ply);
        child.last_move = mv;
        if mv.is_some() {
            child.null_parity = node.null_parity;
            child.plies_since_null = node.plies_since_null.saturating_add(1);
        } else {
            child.null_parity = !node.null_parity;
            child.plies_since_null = 0;
        }
    }

    /// Prepares the node below `ply` to search the same position again, as razoring and verification do.
    #[inline(always)]
    fn link_same(&mut self, ply: usize) {
        let (node, child) = self.nodes.pair_mut(ply);
        child.last_move = node.last_move;
        child.null_parity = node.null_parity;
        child.plies_since_null = 0;
    }

    /// Returns `true` if the node at `ply` repeats an earlier position with the same side to move.
    ///
    /// The scan stops at the last irreversible move, or the last null move, whichever is closer.
    fn is_repetition(&self, game: &Game, ply: usize) -> bool {
        let index = self.root_index + ply;
        let current = self.keys[index];
        let window = (game.halfmove() as usize)
            .min(self.nodes[ply].plies_since_null)
            .min(index);

        (2..=window)
            .step_by(2)
            .any(|back| self.keys[index - back] == current)
    }

    /// Draw by repetition, fifty-move rule or insufficient material.
    ///
    /// A position that is checkmate is not a fifty-move draw.
    fn is_draw(&self, game: &Game, ply: usize) -> bool {
        if self.is_repetition(game, ply) || game.can_draw_by_insufficient_material() {
            return true;
        }

        game.can_draw_by_fifty()
            && !(game.is_in_check() && game.get_legal_moves().is_empty())
    }

    /// Returns `true` if the tablebase should be probed at this node.
    fn using_tablebase(&self, game: &Game, ply: usize, depth: Depth) -> bool {
        let Some(tablebase) = self.ctx.tablebase.as_ref() else {
            return false;
        };
        if !self.ctx.options.use_tablebases || men_count(game) as usize > tablebase.max_pieces() {
            return false;
        }

        let iteration = self.ctx.iteration_depth.load(Ordering::Relaxed) as i32;
        ply <= 2 || depth.units() >= 3 * Depth::new(iteration).units() / 4
    }

    /// Searches the child at `ply`, dropping into quiescence once `depth` runs out.
    #[inline(always)]
    pub(crate) fn search_child(
        &mut self,
        game: &Game,
        alpha: Score,
        beta: Score,
        ply: usize,
        depth: Depth,
    ) -> Score {
        if depth.is_exhausted() {
            self.quiesce(game, alpha, beta, ply, 0)
        } else {
            self.search(game, alpha, beta, ply, depth, NodeFlags::NONE)
        }
    }

    /// Searches `child`, reached from the node at `ply`, with [Principal Variation Search](https://www.chessprogramming.org/Principal_Variation_Search).
    ///
    /// The first search uses `window.hi` and the adjusted depth. If it beats the node's best score, a reduced
    /// move is searched again at full depth and then, if needed, with the full window.
    /// `window.lo` is normally the node's best score, but the root may search from its original alpha instead.
    pub(crate) fn search_move(
        &mut self,
        child: &Game,
        ply: usize,
        depth: Depth,
        extend: Depth,
        window: Window,
    ) -> Score {
        let Window { lo, hi, beta } = window;
        let best = self.nodes[ply].best_score;
        let mut score = -self.search_child(child, -hi, -lo, ply + 1, depth + extend - Depth::ONE);

        if score > best
            && (extend < Depth::ZERO || hi < beta)
            && !self.nodes[ply + 1].flags.contains(NodeFlags::EXACT)
            && !self.stopped()
        {
            // A new best move at the root may need more time to resolve
            if ply == 0 {
                self.ctx.fail_high_root.store(true, Ordering::Relaxed);
            }

            if extend < -Depth::ONE && hi == lo + 1 {
                self.nodes[ply].extensions = Extensions::NONE;
                score = -self.search_child(child, -hi, -lo, ply + 1, depth - Depth::ONE);
            }
            if score > best && !self.stopped() {
                self.nodes[ply].extensions = Extensions::NONE;
                score = -self.search_child(child, -beta, -lo, ply + 1, depth - Depth::ONE);
            }
        }

        score
    }

    /// Records `mv` as the best move of the node at `ply`.
    ///
    /// Returns `true` if the move causes a beta cutoff.
    #[inline(always)]
    pub(crate) fn update_move(&mut self, ply: usize, mv: Move, score: Score) -> bool {
        let (node, child) = self.nodes.pair_mut(ply);
        node.best_score = score;
        node.best = Some(mv);
        if score >= node.beta {
            node.cutoff = true;
            return true;
        }
        node.pv.extend(mv, &child.pv);
        false
    }

    /// Full-width [alpha-beta](https://www.chessprogramming.org/Alpha-Beta) search of the node at `ply > 0`.
    ///
    /// Returns a fail-hard bounded score from the side-to-move's perspective. If the search is stopped the result is
    /// `alpha` and nothing is written to the transposition table.
    pub(crate) fn search(
        &mut self,
        game: &Game,
        alpha: Score,
        beta: Score,
        ply: usize,
        depth: Depth,
        flags: NodeFlags,
    ) -> Score {
        self.nodes[ply].enter(alpha, beta, ply, depth, flags);
        self.nodes[ply].best_score = alpha;
        self.count_node();

        if self.stopped() {
            return alpha;
        }
        if ply >= MAX_PLY - 1 {
            return self.evaluate(game);
        }

        let hash = hash_of(game, self.nodes[ply].null_parity);
        self.record_key(ply, hash);

        if self.is_draw(game, ply) {
            let score = self.ctx.draw_score(game);
            let node = &mut self.nodes[ply];
            node.flags |= NodeFlags::EXACT;
            node.best_score = score;
            return score;
        }

        let pv_node = self.nodes[ply].is_pv();
        let using_tb = self.using_tablebase(game, ply, depth);
        let age = self.ctx.age;

        let probe = self.ctx.tt.probe(hash, depth, age);
        let entry = probe.entry().copied();
        let mut hash_move = entry
            .and_then(|entry| entry.best)
            .and_then(|packed| unpack_move(game, packed));

        // Tablebase values are exact, anything else only cuts outside of PV nodes
        let usable_hit = match probe {
            Probe::Hit(hit) if hit.flags.contains(EntryFlags::TB) || !(using_tb || pv_node) => {
                Some(hit)
            }
            _ => None,
        };

        if let Some(hit) = usable_hit {
            let value = hit.value.relative(ply);
            match hit.bound {
                Bound::Valid => {
                    let node = &mut self.nodes[ply];
                    if value > alpha && value < beta {
                        if let Some(mv) = hash_move {
                            node.pv.set(mv);
                        }
                    }
                    node.flags |= NodeFlags::EXACT;
                    node.best_score = value;
                    return value;
                }
                Bound::UpperBound if value <= alpha => return value,
                Bound::LowerBound if value >= beta => {
                    if let Some(mv) = hash_move.filter(|mv| !is_tactical(mv)) {
                        if let Some(piece) = game.piece_at(mv.from()) {
                            self.history.update(piece, &mv, HistoryTable::bonus(depth));
                        }
                    }
                    return value;
                }
                _ => {}
            }
        }

        if using_tb {
            if let Some(score) = self.ctx.tablebase.as_ref().and_then(|tb| tb.probe(game)) {
                self.ctx.tb_hits.fetch_add(1, Ordering::Relaxed);
                self.ctx.tt.store(
                    hash,
                    TTableEntry {
                        depth: Depth::MAX,
                        age,
                        bound: Bound::Valid,
                        flags: EntryFlags::TB,
                        value: score,
                        static_value: Score::INVALID,
                        best: None,
                    },
                );

                let value = score.relative(ply);
                let node = &mut self.nodes[ply];
                node.flags |= NodeFlags::EXACT;
                node.best_score = value;
                return value;
            }
        }

        let in_check = game.is_in_check();
        let static_eval = match entry {
            Some(entry) if entry.static_value != Score::INVALID => entry.static_value,
            _ => self.evaluate(game),
        };

        // A bound that is tighter than the static evaluation makes a better pruning estimate
        let mut eval = static_eval;
        if let Some(hit) = usable_hit {
            let value = hit.value.relative(ply);
            let wanted = if value > eval {
                Bound::LowerBound
            } else {
                Bound::UpperBound
            };
            if hit.bound == wanted {
                eval = value;
            }
        }

        {
            let node = &mut self.nodes[ply];
            node.in_check = in_check;
            node.static_eval = static_eval;
            node.eval = eval;
        }

        let us = game.side_to_move();
        let prune_ok = self.ctx.pruning && !in_check && !pv_node && piece_count(game, us) > 0;

        // Static null move pruning
        if prune_ok && depth <= 3 && beta < Score::MATE_RANGE {
            let margins = tune::static_null_margins!();
            let margin = Score::PAWN * margins[depth.units().clamp(0, 15) as usize];
            if eval > beta + margin {
                return eval - margin;
            }
        }

        // Razoring
        if prune_ok && depth <= tune::razor_depth!() && beta < Score::MATE_RANGE {
            let extra = (depth - Depth::ONE).units().max(0) * Score::PAWN.inner() / DEPTH_INCREMENT;
            let threshold = beta - tune::razor_margin!() - extra;
            if eval < threshold {
                self.link_same(ply);
                let value = self.quiesce(game, threshold - 1, threshold, ply + 1, 0);
                if self.stopped() {
                    return alpha;
                }
                if value < threshold {
                    return value;
                }
            }
        }

        // Null move pruning, with verification at high depth
        if prune_ok
            && depth >= 2
            && !flags.contains(NodeFlags::IID)
            && !flags.contains(NodeFlags::VERIFY)
            && !flags.contains(NodeFlags::NULL_MOVE)
            && !alpha.is_mate()
            && game.halfmove() <= 98
            && game.ep_square().is_none()
        {
            let null_depth = depth - tune::null_move_reduction!() - depth / 6;
            if !entry.is_some_and(|entry| entry.avoid_null(null_depth, beta)) {
                let mut passed = *game;
                passed.toggle_side_to_move();
                self.link_child(ply, None);

                let value = if null_depth.is_exhausted() {
                    -self.quiesce(&passed, -beta, -beta + 1, ply + 1, 0)
                } else {
                    -self.search(&passed, -beta, -beta + 1, ply + 1, null_depth, NodeFlags::NULL_MOVE)
                };
                if self.stopped() {
                    return alpha;
                }

                if value >= beta {
                    let mut value = value;
                    if depth >= tune::null_verify_depth!() {
                        self.link_same(ply);
                        value = self.search(game, alpha, beta, ply + 1, depth - 5, NodeFlags::VERIFY);
                        if self.stopped() {
                            return alpha;
                        }
                    }

                    if value >= beta {
                        // Do not trust mate scores from a position where we passed
                        let value = if value >= Score::MATE - ply as i32 {
                            beta
                        } else {
                            value
                        };
                        self.nodes[ply].best_score = value;
                        self.store_result(hash, ply, depth, hash_move, 0);
                        return value;
                    }
                } else if let Some(threat_move) = self.nodes[ply + 1].best {
                    let passed_occ = Occupancy::new(&passed);
                    if let Some(piece) = passed_occ.mover_of(&threat_move) {
                        let threat = Threat {
                            mv: threat_move,
                            piece,
                            victim: passed_occ.victim_of(&threat_move),
                        };
                        self.nodes[ply].threat = Some(threat);

                        // A reduced move that created this threat deserves a full-depth search
                        let reduced = self.nodes[ply - 1].extensions.contains(Extensions::LMR);
                        if reduced {
                            if let Some(last) = self.nodes[ply].last_move {
                                if moves_related(&Occupancy::new(game), &last, &threat) {
                                    return alpha;
                                }
                            }
                        }
                    }
                }
            }
        }

        // Internal iterative deepening
        if hash_move.is_none() && depth >= tune::iid_depth!() {
            let mut iid_depth = (depth - 2).min(depth / 2);
            if !pv_node {
                iid_depth -= Depth::ONE;
            }

            let threat = self.nodes[ply].threat;
            let value = self.search(game, alpha, beta, ply, iid_depth, flags | NodeFlags::IID);
            if self.stopped() {
                return alpha;
            }
            if self.nodes[ply].flags.contains(NodeFlags::EXACT) {
                return value;
            }

            let node = &mut self.nodes[ply];
            hash_move = node.best;
            node.enter(alpha, beta, ply, depth, flags);
            node.best_score = alpha;
            node.in_check = in_check;
            node.static_eval = static_eval;
            node.eval = eval;
            node.threat = threat;
            self.nodes[ply + 1].pv.clear();
        }

        let occ = Occupancy::new(game);
        let mut picker = MovePicker::new(
            game,
            &occ,
            hash_move,
            &self.nodes[ply].killers,
            &self.history,
            &[],
        );
        let legal = picker.legal_moves();
        let can_split = self.ctx.options.threads > 1 && !in_check && depth >= self.ctx.split_depth();
        let mut hi = beta;
        let mut index = 0;

        while let Some(scored) = picker.next() {
            if self.nodes[ply].cutoff || self.stopped() {
                break;
            }

            let mv = scored.mv;
            let child = game.with_move_made(mv);
            let candidate = Candidate {
                mv,
                phase: scored.phase,
                index,
                gives_check: child.is_in_check(),
            };
            index += 1;

            let Some(extend) = self.calc_extensions(game, &occ, ply, &candidate, legal) else {
                continue;
            };

            self.link_child(ply, Some(mv));
            let window = Window {
                lo: self.nodes[ply].best_score,
                hi,
                beta,
            };
            let score = self.search_move(&child, ply, depth, extend, window);
            if self.stopped() {
                break;
            }

            let node = &mut self.nodes[ply];
            let _ = node.done.try_push(mv);
            node.num_try += 1;
            if score > node.best_score && self.update_move(ply, mv, score) {
                break;
            }
            if score >= Score::MATE - 1 - ply as i32 {
                // Mating line found, nothing is better
                self.nodes[ply].cutoff = true;
                break;
            }
            hi = self.nodes[ply].best_score + 1;

            if can_split && picker.remaining() > 0 && self.maybe_split(game, ply, &mut picker, index, legal) {
                break;
            }
        }

        if self.stopped() {
            return alpha;
        }

        if legal == 0 {
            let score = if in_check {
                Score::mated_in(ply)
            } else {
                self.ctx.draw_score(game)
            };
            let node = &mut self.nodes[ply];
            node.flags |= NodeFlags::EXACT;
            node.best_score = score;
            return score;
        }

        if !in_check {
            self.update_history(game, ply, depth);
        }
        self.store_result(hash, ply, depth, hash_move, legal);
        self.nodes[ply].best_score
    }

    /// Rewards the best quiet move of the node at `ply`, penalizing the quiet moves tried before it on a cutoff.
    fn update_history(&mut self, game: &Game, ply: usize, depth: Depth) {
        let node = &mut self.nodes[ply];
        let Some(best) = node.best.filter(|mv| !is_tactical(mv)) else {
            return;
        };
        node.killers.push(best);

        let bonus = HistoryTable::bonus(depth);
        let cutoff = node.best_score >= node.beta;
        for mv in node.done.iter().filter(|mv| !is_tactical(mv)) {
            let delta = if *mv == best {
                bonus
            } else if cutoff {
                -bonus
            } else {
                continue;
            };
            if let Some(piece) = game.piece_at(mv.from()) {
                self.history.update(piece, mv, delta);
            }
        }
    }

    /// Stores the result of the node at `ply` in the transposition table.
    fn store_result(&mut self, hash: u64, ply: usize, depth: Depth, hash_move: Option<Move>, legal: usize) {
        let node = &mut self.nodes[ply];
        let value = node.best_score;

        let bound = if value <= node.alpha {
            node.best = hash_move;
            Bound::UpperBound
        } else if value >= node.beta {
            Bound::LowerBound
        } else {
            Bound::Valid
        };
        let flags = match legal {
            1 => EntryFlags::FORCED,
            2 => EntryFlags::FORCED2,
            _ => EntryFlags::NONE,
        };

        let entry = TTableEntry {
            depth,
            age: self.ctx.age,
            bound,
            flags,
            value: value.absolute(ply),
            static_value: node.static_eval,
            best: node.best.or(hash_move).map(pack_move),
        };
        self.ctx.tt.store(hash, entry);
    }

    /// [Quiescence search](https://www.chessprogramming.org/Quiescence_Search): resolves captures, promotions and,
    /// for the first plies, quiet checks, so that the static evaluation is only trusted in quiet positions.
    ///
    /// `qdepth` starts at `0` and decreases with each quiescence ply.
    pub(crate) fn quiesce(&mut self, game: &Game, alpha: Score, beta: Score, ply: usize, qdepth: i32) -> Score {
        self.nodes[ply].enter(alpha, beta, ply, Depth::ZERO, NodeFlags::NONE);
        self.nodes[ply].best_score = alpha;
        self.count_node();

        if self.stopped() {
            return alpha;
        }
        if ply >= MAX_PLY - 1 {
            return self.evaluate(game);
        }

        let hash = hash_of(game, self.nodes[ply].null_parity);
        self.record_key(ply, hash);

        if self.is_draw(game, ply) {
            let score = self.ctx.draw_score(game);
            let node = &mut self.nodes[ply];
            node.flags |= NodeFlags::EXACT;
            node.best_score = score;
            return score;
        }

        let in_check = game.is_in_check();
        self.nodes[ply].in_check = in_check;

        let checks_allowed = qdepth >= 1 - self.ctx.options.checks_in_qsearch;
        let tt_depth = if in_check || checks_allowed {
            QSEARCH_CHECK_DEPTH
        } else {
            QSEARCH_NO_CHECK_DEPTH
        };
        let pv_node = beta > alpha + 1;

        let probe = self.ctx.tt.probe(hash, tt_depth, self.ctx.age);
        let entry = probe.entry().copied();
        let mut hash_move = entry
            .and_then(|entry| entry.best)
            .and_then(|packed| unpack_move(game, packed));

        if let Probe::Hit(hit) = probe {
            if !pv_node {
                let value = hit.value.relative(ply);
                match hit.bound {
                    Bound::Valid => {
                        if value > alpha && value < beta {
                            if let Some(mv) = hash_move {
                                self.nodes[ply].pv.set(mv);
                            }
                        }
                        return value;
                    }
                    Bound::UpperBound if value <= alpha => return value,
                    Bound::LowerBound if value >= beta => return value,
                    _ => {}
                }
            }
        }

        // Without checks, only a tactical hash move is worth trying out of order
        if !in_check && !checks_allowed && !hash_move.is_some_and(|mv| is_tactical(&mv)) {
            hash_move = None;
        }

        if in_check {
            return self.quiesce_evasions(game, ply, qdepth, hash, tt_depth, hash_move);
        }

        let had_eval = entry.is_some_and(|entry| entry.static_value != Score::INVALID);
        let static_eval = match entry {
            Some(entry) if had_eval => entry.static_value,
            _ => self.evaluate(game),
        };
        let mut eval = static_eval;
        if let Probe::Hit(hit) = probe {
            let value = hit.value.relative(ply);
            let wanted = if value > eval {
                Bound::LowerBound
            } else {
                Bound::UpperBound
            };
            if hit.bound == wanted {
                eval = value;
            }
        }

        {
            let node = &mut self.nodes[ply];
            node.static_eval = static_eval;
            node.eval = eval;
        }

        // Stand pat
        if eval > alpha {
            self.nodes[ply].best_score = eval;
            if eval >= beta {
                if !had_eval {
                    self.ctx.tt.store(
                        hash,
                        TTableEntry {
                            depth: tt_depth,
                            age: self.ctx.age,
                            bound: Bound::Eval,
                            flags: EntryFlags::NONE,
                            value: eval.absolute(ply),
                            static_value: static_eval,
                            best: None,
                        },
                    );
                }
                return eval;
            }
        }

        let occ = Occupancy::new(game);
        let opponent_pieces = piece_count(game, game.side_to_move().opponent());
        let margin = tune::qsearch_futility_margin!();
        let mut cutoff = false;

        if let Some(mv) = hash_move {
            let prunable = !pv_node && self.is_futile_capture(&occ, &mv, opponent_pieces);
            let optimistic = eval + calc_gain(&occ, &mv) + margin;
            if prunable && optimistic < alpha {
                let node = &mut self.nodes[ply];
                node.best_score = node.best_score.max(optimistic);
            } else {
                cutoff = self.quiesce_move(game, mv, ply, qdepth);
            }
        }

        if !cutoff {
            for scored in MovePicker::tactical(game, &occ) {
                let mv = scored.mv;
                if Some(mv) == hash_move {
                    continue;
                }

                if self.is_futile_capture(&occ, &mv, opponent_pieces) {
                    let gain = calc_gain(&occ, &mv);
                    let optimistic = eval + gain + margin;
                    if optimistic < alpha {
                        let node = &mut self.nodes[ply];
                        node.best_score = node.best_score.max(optimistic);
                        continue;
                    }

                    // A capture that may lose the capturing piece must win enough to reach alpha
                    let risked = occ.mover_of(&mv).map_or(0, value_of);
                    let needed = (alpha - eval - margin).inner().max(0);
                    if gain - risked <= 0 && !see_ge(&occ, &mv, needed) {
                        continue;
                    }
                }

                if self.quiesce_move(game, mv, ply, qdepth) {
                    cutoff = true;
                    break;
                }
            }
        }

        if !cutoff && checks_allowed && eval >= alpha - tune::qsearch_check_margin!() {
            for mv in game.get_legal_moves() {
                if is_tactical(&mv) || Some(mv) == hash_move {
                    continue;
                }
                if !game.with_move_made(mv).is_in_check() {
                    continue;
                }
                if !occ.is_discovered_check(&mv) && !see_ge(&occ, &mv, 0) {
                    continue;
                }

                if self.quiesce_move(game, mv, ply, qdepth) {
                    break;
                }
            }
        }

        if self.stopped() {
            return alpha;
        }

        self.store_quiesce(hash, ply, tt_depth, hash_move);
        self.nodes[ply].best_score
    }

    /// Quiescence when in check: every evasion is tried, but late quiet evasions are skipped outside PV nodes.
    fn quiesce_evasions(
        &mut self,
        game: &Game,
        ply: usize,
        qdepth: i32,
        hash: u64,
        tt_depth: Depth,
        hash_move: Option<Move>,
    ) -> Score {
        let occ = Occupancy::new(game);
        let picker = MovePicker::new(
            game,
            &occ,
            hash_move,
            &self.nodes[ply].killers,
            &self.history,
            &[],
        );
        let legal = picker.legal_moves();
        if legal == 0 {
            let node = &mut self.nodes[ply];
            node.flags |= NodeFlags::EXACT;
            node.best_score = Score::mated_in(ply);
            return node.best_score;
        }

        let pv_node = self.nodes[ply].is_pv();
        let beta = self.nodes[ply].beta;
        let mut quiet_tried = 0;

        for scored in picker {
            let mv = scored.mv;
            if !pv_node
                && quiet_tried > (1 + qdepth).max(0)
                && !beta.is_mate()
                && legal > 2
                && !is_tactical(&mv)
                && !game.with_move_made(mv).is_in_check()
            {
                continue;
            }

            self.nodes[ply].num_try += 1;
            if self.quiesce_move(game, mv, ply, qdepth) {
                break;
            }
            if !is_tactical(&mv) {
                quiet_tried += 1;
            }
        }

        if self.stopped() {
            return self.nodes[ply].alpha;
        }

        self.store_quiesce(hash, ply, tt_depth, hash_move);
        self.nodes[ply].best_score
    }

    /// Returns `true` if `mv` is a capture or promotion that futility pruning may skip.
    #[inline(always)]
    fn is_futile_capture(&self, occ: &Occupancy, mv: &Move, opponent_pieces: u32) -> bool {
        !occ.is_discovered_check(mv)
            && (occ.victim_of(mv) == Some(PieceKind::Pawn) || opponent_pieces > 1)
    }

    /// Searches `mv` from the quiescence node at `ply`. Returns `true` if the node is done.
    fn quiesce_move(&mut self, game: &Game, mv: Move, ply: usize, qdepth: i32) -> bool {
        let child = game.with_move_made(mv);
        self.link_child(ply, Some(mv));

        let (best, beta) = (self.nodes[ply].best_score, self.nodes[ply].beta);
        let score = -self.quiesce(&child, -beta, -best, ply + 1, qdepth - 1);
        if self.stopped() {
            return true;
        }

        if score > best {
            if self.update_move(ply, mv, score) {
                return true;
            }
            if score >= Score::MATE - 1 - ply as i32 {
                return true;
            }
        }
        false
    }

    fn store_quiesce(&mut self, hash: u64, ply: usize, tt_depth: Depth, hash_move: Option<Move>) {
        let node = &self.nodes[ply];
        let value = node.best_score;
        let (bound, best) = if value <= node.alpha {
            (Bound::UpperBound, hash_move)
        } else if value >= node.beta {
            (Bound::LowerBound, node.best.or(hash_move))
        } else {
            (Bound::Valid, node.best.or(hash_move))
        };

        let entry = TTableEntry {
            depth: tt_depth,
            age: self.ctx.age,
            bound,
            flags: EntryFlags::NONE,
            value: value.absolute(ply),
            static_value: node.static_eval,
            best: best.map(pack_move),
        };
        self.ctx.tt.store(hash, entry);
    }
}

/// Optimistic material gain of a capture or promotion, in centipawns.
///
/// Capturing a pawn about to promote, or pushing one's own pawn to the seventh, counts for half a pawn more.
pub(crate) fn calc_gain(occ: &Occupancy, mv: &Move) -> i32 {
    let mut gain = occ.victim_of(mv).map_or(0, value_of);
    if occ.is_pawn_on_seventh(mv.to().index()) {
        gain += Score::PAWN.inner() / 2;
    }

    match mv.promotion() {
        Some(kind) => gain += value_of(kind) - value_of(PieceKind::Pawn),
        None if occ.is_pawn_push_to_seventh(mv) => gain += Score::PAWN.inner() / 2,
        None => {}
    }
    gain
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::{parse_fen, parse_move};

    #[test]
    fn test_calc_gain() {
        let game = parse_fen("4k3/1P6/8/3p4/4P3/8/8/4K3 w - - 0 1").unwrap();
        let occ = Occupancy::new(&game);

        let capture = parse_move(&game, "e4d5").unwrap();
        assert_eq!(calc_gain(&occ, &capture), value_of(PieceKind::Pawn));

        let promotion = parse_move(&game, "b7b8q").unwrap();
        assert_eq!(
            calc_gain(&occ, &promotion),
            value_of(PieceKind::Queen) - value_of(PieceKind::Pawn)
        );
    }
}
