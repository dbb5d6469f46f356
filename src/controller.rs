/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::{
    sync::{
        atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use chessie::{Color, Game, Move};
use log::{debug, info, warn};

use crate::{
    position::{hash_of, material_level, men_count, unpack_move},
    root::RootMoves,
    search::Search,
    threads::{PoolShared, ThreadPool},
    tune, Depth, Evaluate, Evaluator, PlayedGame, PvLine, Score, SearchLimits, SearchOptions,
    SearchState, SearchType, Statistics, TTable, Tablebase, DEPTH_INCREMENT, MAX_PLY,
};

/// Called with a snapshot of the statistics after every completed iteration.
pub type PostFunction = Box<dyn Fn(&Statistics) + Send + Sync>;

/// Polled after every completed iteration. Returning `true` stops the search.
pub type TerminateFunction = Box<dyn Fn(&Statistics) -> bool + Send + Sync>;

/// State of one call to [`SearchController::find_best_move`], shared by every search thread.
///
/// Fields that change during the search are atomics, so threads never block each other to read them.
pub(crate) struct SearchContext {
    pub tt: Arc<TTable>,
    pub evaluator: Arc<dyn Evaluate>,
    pub tablebase: Option<Arc<dyn Tablebase>>,
    pub options: SearchOptions,
    pub search_type: SearchType,

    /// Milliseconds that may be added to the target when the root is unstable.
    pub extra_time: u64,

    /// Age stamped on transposition table entries written by this search.
    pub age: u8,
    pub start: Instant,

    /// Delay after each root move when playing at reduced strength.
    pub wait_time: Duration,

    /// Selective pruning and reductions are allowed. Off, the tree is searched full width.
    pub pruning: bool,

    /// Side the engine plays, for which draws are worth `rating_factor`.
    computer_side: Color,
    rating_factor: i32,

    terminate: Arc<AtomicBool>,

    /// Set when the search stopped itself, rather than being stopped from outside.
    halted: AtomicBool,

    /// Depth of the iteration in progress, in plies.
    pub iteration_depth: AtomicUsize,

    /// Shallowest depth, in fractional units, at which a node may be split.
    split_depth: AtomicI32,

    pub nodes: AtomicU64,
    pub tb_hits: AtomicU64,
    pub splits: AtomicU64,

    /// Milliseconds the search intends to use.
    pub time_target: AtomicU64,

    /// Milliseconds granted on top of the target.
    pub time_added: AtomicU64,

    /// Node batches between time checks.
    pub time_check_interval: AtomicU32,

    /// The root move being searched has failed high and is not yet resolved.
    pub fail_high_root: AtomicBool,

    /// The current aspiration window failed low.
    pub fail_low_root: AtomicBool,
    pub fail_high_extend: AtomicBool,
    pub fail_low_extend: AtomicBool,

    pub pool: Arc<PoolShared>,
    tuning: Mutex<SplitTuning>,
}

/// Last sample taken by the split depth tuning.
#[derive(Debug, Default)]
struct SplitTuning {
    elapsed_ms: u64,
    splits: u64,
}

impl SearchContext {
    /// Stops every thread of this search at its next check.
    #[inline(always)]
    pub(crate) fn stop(&self) {
        self.halted.store(true, Ordering::Relaxed);
        self.terminate.store(true, Ordering::Release);
    }

    #[inline(always)]
    pub(crate) fn is_stopped(&self) -> bool {
        self.terminate.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub(crate) fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Score of a drawn position with `game`'s side to move, biased by the rating difference.
    #[inline(always)]
    pub(crate) fn draw_score(&self, game: &Game) -> Score {
        if game.side_to_move() == self.computer_side {
            Score::new(self.rating_factor)
        } else {
            Score::new(-self.rating_factor)
        }
    }

    /// Shallowest depth at which a node may be split between threads.
    #[inline(always)]
    pub(crate) fn split_depth(&self) -> Depth {
        Depth::from_units(self.split_depth.load(Ordering::Relaxed))
    }

    /// Polled by the searching threads. Stops the search when its time is up, and tunes the split depth.
    pub(crate) fn check_time(&self) {
        let elapsed = self.elapsed_ms();
        if self.options.threads > 1 && elapsed > 100 {
            self.tune_split_depth(elapsed);
        }

        let target = self.time_target.load(Ordering::Relaxed);
        match self.search_type {
            SearchType::FixedDepth => {}
            SearchType::FixedTime => {
                if elapsed >= target {
                    self.stop();
                }
            }
            SearchType::TimeLimit => {
                if self.extra_time > 0 && elapsed > target + self.time_added.load(Ordering::Relaxed) {
                    if self.fail_high_root.load(Ordering::Relaxed) {
                        self.time_added.store(self.extra_time, Ordering::Relaxed);
                        self.fail_high_extend.store(true, Ordering::Relaxed);
                    } else if self.fail_low_root.load(Ordering::Relaxed) {
                        self.time_added.store(self.extra_time, Ordering::Relaxed);
                        self.fail_low_extend.store(true, Ordering::Relaxed);
                    }
                }
                if elapsed > target + self.time_added.load(Ordering::Relaxed) {
                    self.stop();
                }
            }
        }
    }

    /// Moves the split depth so that the split rate stays near its per-thread target.
    fn tune_split_depth(&self, elapsed: u64) {
        // Only one thread needs to take the sample
        let Ok(mut last) = self.tuning.try_lock() else {
            return;
        };
        let splits = self.splits.load(Ordering::Relaxed);
        if elapsed < last.elapsed_ms + 50 || splits <= last.splits {
            return;
        }

        let per_sec = (splits - last.splits) * 1000 / (elapsed - last.elapsed_ms);
        let target = self.options.threads as u64 * tune::target_splits_per_thread!();
        let current = self.split_depth.load(Ordering::Relaxed);
        let adjusted = if per_sec > 3 * target / 2 {
            (current + DEPTH_INCREMENT / 2).min(tune::max_split_depth!() * DEPTH_INCREMENT)
        } else if per_sec < target / 2 {
            (current - DEPTH_INCREMENT / 2).max(tune::min_split_depth!() * DEPTH_INCREMENT)
        } else {
            current
        };

        if adjusted != current {
            debug!(
                "{per_sec} splits/s against a target of {target}, split depth {} -> {}",
                Depth::from_units(current),
                Depth::from_units(adjusted)
            );
            self.split_depth.store(adjusted, Ordering::Relaxed);
        }
        *last = SplitTuning { elapsed_ms: elapsed, splits };
    }
}

/// Lets another thread stop a running search.
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    /// Asks the search to stop. It returns the best move found so far.
    #[inline(always)]
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// What [`SearchController::find_best_move`] decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    /// The move to play, or `None` if the position has no legal moves or is already drawn.
    pub best_move: Option<Move>,
    pub stats: Statistics,
}

/// Owns everything that persists between searches: the transposition table, the threads and their
/// history tables, and the callbacks.
pub struct SearchController {
    options: SearchOptions,
    tt: Arc<TTable>,
    evaluator: Arc<dyn Evaluate>,
    tablebase: Option<Arc<dyn Tablebase>>,
    pool: ThreadPool,

    /// The root thread's search, kept so its history survives between moves.
    search: Option<Box<Search>>,

    age: u8,
    rating_factor: i32,
    pruning: bool,
    terminate: Arc<AtomicBool>,
    post: Option<PostFunction>,
    terminate_fn: Option<TerminateFunction>,
}

impl SearchController {
    /// Creates a controller with the default evaluator and no tablebase.
    ///
    /// If the requested memory or threads are not available, the controller runs with less and logs a warning.
    pub fn new(options: SearchOptions) -> Self {
        let options = options.validated();
        let (tt, err) = TTable::new(options.hash_mb);
        if let Some(err) = err {
            warn!("{err}; searching without a transposition table");
        }
        let (pool, err) = ThreadPool::new(options.threads);
        if let Some(err) = err {
            warn!("{err}");
        }

        Self {
            options,
            tt: Arc::new(tt),
            evaluator: Arc::new(Evaluator),
            tablebase: None,
            pool,
            search: None,
            age: 0,
            rating_factor: 0,
            pruning: true,
            terminate: Arc::new(AtomicBool::new(false)),
            post: None,
            terminate_fn: None,
        }
    }

    /// Replaces the evaluator used by every search thread.
    pub fn with_evaluator(mut self, evaluator: Arc<dyn Evaluate>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Installs a tablebase to probe positions with few pieces.
    pub fn with_tablebase(mut self, tablebase: Arc<dyn Tablebase>) -> Self {
        self.tablebase = Some(tablebase);
        self
    }

    #[inline(always)]
    pub fn options(&self) -> &SearchOptions {
        &self.options
    }

    /// The transposition table shared by every search thread.
    #[inline(always)]
    pub fn hash_table(&self) -> &TTable {
        &self.tt
    }

    /// Turns selective pruning and reductions on or off for later searches.
    #[cfg(test)]
    pub(crate) fn set_pruning(&mut self, pruning: bool) {
        self.pruning = pruning;
    }

    /// Number of search threads actually running.
    #[inline(always)]
    pub fn threads(&self) -> usize {
        self.pool.size()
    }

    /// Applies new options between searches.
    ///
    /// A thread count that cannot be satisfied keeps the previous one, and the error is returned.
    pub fn set_options(&mut self, options: SearchOptions) -> anyhow::Result<()> {
        let options = options.validated();
        if options.hash_mb != self.options.hash_mb {
            self.resize_hash(options.hash_mb);
        }
        let resized = self.pool.resize(options.threads);
        self.options = SearchOptions {
            threads: self.pool.size(),
            ..options
        };
        resized.map_err(|err| {
            warn!("{err}");
            err.into()
        })
    }

    /// Reallocates the transposition table with `mb` megabytes, discarding its contents.
    pub fn resize_hash(&mut self, mb: usize) {
        let (tt, err) = TTable::new(mb);
        if let Some(err) = err {
            warn!("{err}; searching without a transposition table");
        }
        self.tt = Arc::new(tt);
        self.options.hash_mb = mb;
    }

    /// Forgets everything learned by earlier searches.
    pub fn clear_hash_tables(&mut self) {
        self.tt.clear();
        self.age = 0;
        self.pool.clear_history();
    }

    /// Biases the draw score by the difference between the opponent's rating and ours.
    ///
    /// Against a weaker opponent draws are avoided, against a stronger one they are welcome.
    pub fn set_rating_diff(&mut self, diff: i32) {
        let pawn = Score::PAWN.inner();
        self.rating_factor = if diff > 100 {
            let mut factor = (pawn * (diff - 100) / 300).min(pawn);
            if diff > 400 {
                factor += (diff - 400) * pawn / 1000;
            }
            factor
        } else if diff < -100 {
            let mut factor = (pawn * (diff + 100) / 300).max(-pawn);
            if diff < -400 {
                factor += (400 + diff) * pawn / 1000;
            }
            factor
        } else {
            0
        };
    }

    /// Installs the callback that receives statistics after every iteration.
    pub fn set_post_function(&mut self, post: PostFunction) {
        self.post = Some(post);
    }

    /// Installs a callback that may stop the search after any iteration.
    pub fn set_terminate_function(&mut self, terminate: TerminateFunction) {
        self.terminate_fn = Some(terminate);
    }

    /// A handle through which another thread can stop the running search.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(Arc::clone(&self.terminate))
    }

    /// Stops the running search.
    pub fn stop(&self) {
        self.terminate.store(true, Ordering::Release);
    }

    /// Searches `played` within `limits`, blocking until a move is chosen.
    ///
    /// A move is returned whenever the position has one, even if the search is stopped before finishing its
    /// first iteration.
    pub fn find_best_move(&mut self, played: &PlayedGame, limits: &SearchLimits) -> SearchResult {
        let game = played.game();
        let start = Instant::now();
        self.terminate.store(false, Ordering::Release);
        self.age = if self.age == u8::MAX { 1 } else { self.age + 1 };

        let mut stats = Statistics::default();
        let root = RootMoves::new(game);
        if root.is_empty() {
            stats.state = if game.is_in_check() {
                SearchState::Checkmate
            } else {
                SearchState::Stalemate
            };
            stats.value = if game.is_in_check() {
                Score::mated_in(0)
            } else {
                Score::DRAW
            };
            stats.display_value = stats.value;
            info!("no legal moves: {:?}", stats.state);
            return SearchResult {
                best_move: None,
                stats,
            };
        }

        let ctx = Arc::new(self.context(game, limits, root.len(), start));
        if played.is_legal_draw() && !limits.infinite {
            stats.state = SearchState::Draw;
            stats.value = ctx.draw_score(game);
            stats.display_value = stats.value;
            info!("position is already drawn");
            return SearchResult {
                best_move: None,
                stats,
            };
        }

        let mut search = match self.search.take() {
            Some(search) => search,
            None => Box::new(Search::new(Arc::clone(&ctx), 0)),
        };
        let epoch = ctx.pool.history_epoch.load(Ordering::Acquire);
        if search.history_epoch != epoch {
            search.clear();
            search.history_epoch = epoch;
        }
        search.set_root(Arc::clone(&ctx), played.keys());

        let mut driver = Driver {
            ctx: &ctx,
            search: &mut search,
            game,
            limits,
            root,
            stats,
            post: self.post.as_deref(),
            terminate_fn: self.terminate_fn.as_deref(),
            value: Score::DRAW,
            ply_limit: strength_ply_limit(game, limits, &self.options),
            strength_factor: strength_factor(limits, &self.options),
            easy_move: None,
            easy_adjusted: false,
            depth_at_pv_change: 0,
            fail_low_factor: 0,
            fail_lows: 0,
        };
        driver.run();
        let Driver { mut stats, root, .. } = driver;
        self.search = Some(search);

        self.finish(game, &ctx, limits, &root, &mut stats);
        let best_move = stats.best_move().or_else(|| root.iter().next().map(|m| m.mv));
        info!(
            "bestmove {} score {} depth {} nodes {} time {}",
            best_move.map_or_else(|| "(none)".to_string(), |mv| mv.to_string()),
            stats.display_value,
            stats.completed_depth,
            stats.nodes,
            stats.elapsed_ms
        );

        SearchResult { best_move, stats }
    }

    /// Builds the shared state of one search.
    fn context(&self, game: &Game, limits: &SearchLimits, moves: usize, start: Instant) -> SearchContext {
        let options = &self.options;
        let timed = limits.search_type != SearchType::FixedDepth;
        let target = if timed { limits.time_limit } else { 0 };

        let mut interval = match target {
            t if timed && t < 100 => 1024 / tune::node_accum_threshold!(),
            t if timed && t < 1000 => 2048 / tune::node_accum_threshold!(),
            _ => tune::time_check_interval!(),
        };

        let factor = strength_factor(limits, options);
        let wait_time = if factor > 0.0 {
            interval /= 1 + 8 * factor as u32;
            Duration::from_secs_f64(0.3 * target as f64 / moves as f64 * factor / 1000.0)
        } else {
            Duration::ZERO
        };

        let us = game.side_to_move();
        let material = material_level(game, us);
        let mut split_depth = Depth::new(6) + Depth::HALF * (options.threads / 8) as i32;
        if material < 16 {
            split_depth += Depth::HALF;
        }
        if material < 12 {
            split_depth += Depth::ONE;
        }

        SearchContext {
            tt: Arc::clone(&self.tt),
            evaluator: Arc::clone(&self.evaluator),
            tablebase: self.tablebase.clone(),
            options: SearchOptions {
                threads: self.pool.size(),
                ..options.clone()
            },
            search_type: limits.search_type,
            extra_time: if limits.search_type == SearchType::TimeLimit {
                limits.extra_time
            } else {
                0
            },
            age: self.age,
            start,
            wait_time,
            pruning: self.pruning,
            computer_side: us,
            rating_factor: self.rating_factor,
            terminate: Arc::clone(&self.terminate),
            halted: AtomicBool::new(false),
            iteration_depth: AtomicUsize::new(0),
            split_depth: AtomicI32::new(split_depth.units()),
            nodes: AtomicU64::new(0),
            tb_hits: AtomicU64::new(0),
            splits: AtomicU64::new(0),
            time_target: AtomicU64::new(target),
            time_added: AtomicU64::new(0),
            time_check_interval: AtomicU32::new(interval.max(1)),
            fail_high_root: AtomicBool::new(false),
            fail_low_root: AtomicBool::new(false),
            fail_high_extend: AtomicBool::new(false),
            fail_low_extend: AtomicBool::new(false),
            pool: self.pool.shared(),
            tuning: Mutex::new(SplitTuning::default()),
        }
    }

    /// Fills in the final counters, decides on resignation and applies reduced strength.
    fn finish(
        &self,
        game: &Game,
        ctx: &SearchContext,
        limits: &SearchLimits,
        root: &RootMoves,
        stats: &mut Statistics,
    ) {
        stats.nodes = ctx.nodes.load(Ordering::Relaxed);
        stats.tb_hits = ctx.tb_hits.load(Ordering::Relaxed);
        stats.splits = ctx.splits.load(Ordering::Relaxed);
        stats.elapsed_ms = ctx.elapsed_ms();
        stats.hash_full = self.tt.pct_full();

        if ctx.is_stopped() && !ctx.halted.load(Ordering::Relaxed) {
            stats.state = SearchState::Terminated;
        }

        let resigns = self.options.can_resign
            && !limits.background
            && !matches!(stats.state, SearchState::Terminated)
            && 100 * stats.display_value.inner() / Score::PAWN.inner() <= self.options.resign_threshold;
        if resigns {
            stats.state = SearchState::Resigns;
        } else if stats.state == SearchState::Normal && game.is_in_check() {
            stats.state = SearchState::Check;
        }

        let weakened = self.options.strength < 100 && !limits.infinite;
        if weakened && stats.completed_depth <= tune::easy_plies!() {
            let seed = hash_of(game, false) ^ self.age as u64;
            if let Some((mv, score)) = root.suboptimal(self.options.strength, seed) {
                if stats.best_move() != Some(mv) {
                    debug!("playing {mv} ({score}) at strength {}", self.options.strength);
                    stats.best_line = vec![mv];
                    stats.value = score;
                    stats.display_value = score;
                }
            }
        }
    }
}

impl Default for SearchController {
    fn default() -> Self {
        Self::new(SearchOptions::default())
    }
}

impl std::fmt::Debug for SearchController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchController")
            .field("options", &self.options)
            .field("tt", &self.tt)
            .field("threads", &self.pool.size())
            .field("age", &self.age)
            .field("rating_factor", &self.rating_factor)
            .finish()
    }
}

/// Growth of the fail low factor after an iteration that failed low `fail_lows` times.
fn fail_low_penalty(fail_lows: u32, iteration: usize) -> u64 {
    if fail_lows == 0 {
        return 0;
    }
    (1u64 << fail_lows.min(32)) * iteration as u64 / 2
}

/// Strength adjustment of the time spent per root move, or `0.0` at full strength.
fn strength_factor(limits: &SearchLimits, options: &SearchOptions) -> f64 {
    if options.strength >= 100 || limits.infinite {
        return 0.0;
    }
    1.0 / limits.effective_ply_limit() as f64 + (100 - options.strength) as f64 / 250.0
}

/// Deepest iteration the search may start, after reduced strength is applied.
fn strength_ply_limit(game: &Game, limits: &SearchLimits, options: &SearchOptions) -> usize {
    let ply_limit = limits.effective_ply_limit();
    if options.strength > 95 || limits.infinite {
        return ply_limit;
    }

    let table = tune::strength_ply_limits!();
    let mut limit = table[(options.strength / 4) as usize];
    let material = material_level(game, Color::White) + material_level(game, Color::Black);
    if material < 16 && options.strength > 10 {
        limit += 2.min(1 + limit / 8);
    }
    ply_limit.min(limit)
}

/// Iterative deepening over the root moves: the loop of one [`SearchController::find_best_move`] call.
struct Driver<'a> {
    ctx: &'a SearchContext,
    search: &'a mut Search,
    game: &'a Game,
    limits: &'a SearchLimits,
    root: RootMoves,
    stats: Statistics,
    post: Option<&'a (dyn Fn(&Statistics) + Send + Sync)>,
    terminate_fn: Option<&'a (dyn Fn(&Statistics) -> bool + Send + Sync)>,

    /// Score of the last completed iteration.
    value: Score,
    ply_limit: usize,
    strength_factor: f64,

    easy_move: Option<Move>,
    easy_adjusted: bool,

    /// Iteration at which the best move last changed.
    depth_at_pv_change: usize,

    /// How badly the root has been failing low, in percent of the extra time to keep.
    fail_low_factor: u64,

    /// Fail lows in the iteration in progress.
    fail_lows: u32,
}

impl Driver<'_> {
    fn run(&mut self) {
        let legal_lines = self
            .root
            .iter()
            .filter(|m| !self.limits.excludes.contains(&m.mv))
            .count();
        let lines = self.ctx.options.multipv.min(legal_lines).max(1);

        for iteration in 1..=self.ply_limit {
            self.ctx.iteration_depth.store(iteration, Ordering::Relaxed);
            self.stats.depth = iteration as i32;

            let mut excludes = self.limits.excludes.clone();
            let mut found = Vec::with_capacity(lines);
            for index in 0..lines {
                self.stats.multipv_index = index;
                let guess = match index {
                    0 => self.value,
                    _ => self.stats.multipv.get(index).map_or(self.value, |line| line.score),
                };

                let Some(score) = self.aspiration(iteration, guess, &excludes) else {
                    return;
                };
                let pv = self.search.nodes[0].pv.moves().to_vec();
                if index == 0 {
                    self.value = score;
                }
                if let Some(&first) = pv.first() {
                    excludes.push(first);
                }
                found.push(PvLine {
                    score,
                    depth: iteration as i32,
                    pv,
                });
            }

            if lines > 1 {
                found.sort_by(|a, b| b.score.cmp(&a.score));
                self.stats.multipv = found;
            }
            self.stats.completed_depth = iteration as i32;
            self.root.reorder(self.stats.best_move());
            self.report();

            if self.ctx.is_stopped() {
                return;
            }
            if self.should_stop(iteration) {
                self.ctx.stop();
                return;
            }
        }
    }

    /// Searches the root at `iteration` plies in a window around `guess`, widening it until the score lands inside.
    ///
    /// Returns `None` if the search was stopped before the score was resolved.
    fn aspiration(&mut self, iteration: usize, guess: Score, excludes: &[Move]) -> Option<Score> {
        let steps = tune::aspiration_steps!();
        let d = iteration as i32;
        let mate_high = Score::MATE - d - 1;
        let mate_low = Score::new(d) - Score::MATE;
        let easy = self.ctx.options.easy_threshold;
        let narrow = iteration <= tune::easy_plies!();

        let (mut lo, mut hi) = if iteration == 1 {
            (-Score::MATE, Score::MATE)
        } else if narrow {
            (guess - easy, guess + easy + steps[0] / 2)
        } else {
            (guess - steps[0] / 2, guess + steps[0] / 2)
        };
        lo = lo.max(-Score::MATE);
        hi = hi.min(Score::MATE);

        let (mut high_step, mut low_step) = (0, 0);
        self.fail_lows = 0;
        let score = loop {
            let score = self.search.ply0(self.game, &mut self.root, lo, hi, iteration, excludes);
            if self.ctx.is_stopped() {
                return None;
            }

            let fail_high = score >= hi && hi < mate_high;
            let fail_low = score <= lo && lo > mate_low;
            self.update_stats(score, lo, fail_high, fail_low);
            self.ctx.fail_low_root.store(fail_low, Ordering::Relaxed);
            self.after_attempt(iteration);
            if self.ctx.is_stopped() {
                return (!fail_low).then_some(score);
            }

            let widen = if narrow { 2 * easy } else { 0 };
            if fail_high {
                high_step += 1;
                hi = match steps.get(high_step) {
                    Some(&step) if high_step + 1 < steps.len() => mate_high.min(lo + step + widen),
                    _ => mate_high,
                };
                debug!("depth {iteration} failed high at {score}, window [{lo}, {hi}]");
            } else if fail_low {
                low_step += 1;
                self.fail_lows += 1;
                lo = match steps.get(low_step) {
                    Some(&step) if low_step + 1 < steps.len() => mate_low.max(hi - step - widen),
                    _ => mate_low - 1,
                };
                debug!("depth {iteration} failed low at {score}, window [{lo}, {hi}]");
            } else {
                break score;
            }
        };
        self.fail_low_factor += fail_low_penalty(self.fail_lows, iteration);

        if self.ctx.fail_low_extend.swap(false, Ordering::Relaxed) {
            let added = self.ctx.extra_time * self.fail_low_factor.min(100) / 100;
            debug!("root recovered from a fail low, keeping {added} ms of extra time");
            self.ctx.time_added.store(added, Ordering::Relaxed);
        } else if self.ctx.fail_high_extend.swap(false, Ordering::Relaxed) {
            self.ctx.time_added.store(0, Ordering::Relaxed);
        }
        self.ctx.fail_low_root.store(false, Ordering::Relaxed);

        Some(score)
    }

    /// Records the outcome of one root search.
    fn update_stats(&mut self, score: Score, lo: Score, fail_high: bool, fail_low: bool) {
        let stats = &mut self.stats;
        stats.value = score;
        if score > lo {
            stats.display_value = score;
        }
        stats.fail_high = fail_high;
        stats.fail_low = fail_low;
        stats.nodes = self.ctx.nodes.load(Ordering::Relaxed);
        stats.tb_hits = self.ctx.tb_hits.load(Ordering::Relaxed);
        stats.splits = self.ctx.splits.load(Ordering::Relaxed);
        stats.elapsed_ms = self.ctx.elapsed_ms();

        // Only the main line updates the best line
        if stats.multipv_index > 0 {
            return;
        }
        let pv = self.search.nodes[0].pv.moves();
        if pv.is_empty() {
            return;
        }

        let mut line = pv.to_vec();
        if line.len() < 2 {
            extend_from_tt(self.game, &self.ctx.tt, self.ctx.age, &mut line);
        }
        if stats.best_move() != line.first().copied() {
            self.depth_at_pv_change = stats.depth as usize;
        }
        stats.best_line = line;
    }

    /// Checks that must happen even in the middle of resolving an aspiration window.
    fn after_attempt(&mut self, iteration: usize) {
        let ctx = self.ctx;
        let limits = self.limits;

        // A single legal reply needs no deeper search, unless it is hopeless and resigning is an option
        let hopeless = ctx.options.can_resign
            && 100 * self.stats.display_value.inner() / Score::PAWN.inner() <= ctx.options.resign_threshold;
        if iteration >= 2 && self.root.len() == 1 && !limits.background && !limits.infinite && !hopeless {
            ctx.stop();
        }

        let elapsed = ctx.elapsed_ms();
        if elapsed > 200 {
            let nps = self.stats.nodes * 1000 / elapsed;
            // Aim for a check every 10 ms of the whole search
            let batches = nps / 100 / tune::node_accum_threshold!() as u64 / ctx.options.threads as u64;
            let mut interval = batches.clamp(1, tune::time_check_interval!() as u64) as u32;
            let deadline = ctx.time_target.load(Ordering::Relaxed) + ctx.time_added.load(Ordering::Relaxed);
            if ctx.search_type != SearchType::FixedDepth && deadline.saturating_sub(elapsed) < 100 {
                interval /= 2;
            }
            interval /= 1 + 8 * self.strength_factor as u32;
            ctx.time_check_interval.store(interval.max(1), Ordering::Relaxed);
        }

        ctx.check_time();
    }

    /// Publishes the statistics of a completed iteration.
    fn report(&self) {
        info!("{}", self.stats);
        if let Some(post) = self.post {
            post(&self.stats);
        }
    }

    /// Decides, after `iteration` completed, whether deepening further is pointless.
    fn should_stop(&mut self, iteration: usize) -> bool {
        if self.terminate_fn.is_some_and(|terminate| terminate(&self.stats)) {
            return true;
        }
        if self.limits.infinite {
            return false;
        }
        let ctx = self.ctx;
        let d = iteration as i32;

        if iteration >= 3 && men_count(self.game) < 6 {
            let solved = ctx.options.use_tablebases
                && ctx
                    .tablebase
                    .as_ref()
                    .is_some_and(|tb| tb.probe(self.game).is_some());
            if solved {
                return true;
            }
        }

        if iteration == tune::easy_plies!() + 1 {
            self.easy_move = self.root.easy_move(self.game, ctx.options.easy_threshold);
            if let Some(mv) = self.easy_move {
                debug!("easy move {mv}");
            }
        }
        let elapsed = ctx.elapsed_ms();
        let target = ctx.time_target.load(Ordering::Relaxed);
        let easy = !self.limits.background
            && ctx.search_type == SearchType::TimeLimit
            && ctx.time_added.load(Ordering::Relaxed) == 0
            && !self.easy_adjusted
            && self.depth_at_pv_change <= tune::easy_plies!()
            && self.easy_move.is_some()
            && self.easy_move == self.stats.best_move()
            && self.fail_lows == 0
            && elapsed > target / 3;
        if easy {
            self.easy_adjusted = true;
            ctx.time_target.store(target / 3, Ordering::Relaxed);
            debug!("easy move, time target cut to {} ms", target / 3);
            ctx.check_time();
            if ctx.is_stopped() {
                return true;
            }
        }

        self.value <= Score::new(d) - Score::MATE || (d >= 2 && self.value >= Score::MATE - d - 1)
    }
}

/// Follows the transposition table from `game` to lengthen `line` to at least two moves.
fn extend_from_tt(game: &Game, tt: &TTable, age: u8, line: &mut Vec<Move>) {
    let mut position = *game;
    for &mv in line.iter() {
        position.make_move(mv);
    }

    while line.len() < 2 && line.len() < MAX_PLY {
        let probe = tt.probe(hash_of(&position, false), Depth::ZERO, age);
        let Some(mv) = probe
            .entry()
            .and_then(|entry| entry.best)
            .and_then(|packed| unpack_move(&position, packed))
        else {
            break;
        };
        line.push(mv);
        position.make_move(mv);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rating_factor() {
        let mut controller = SearchController::default();

        controller.set_rating_diff(0);
        assert_eq!(controller.rating_factor, 0);

        controller.set_rating_diff(400);
        assert_eq!(controller.rating_factor, Score::PAWN.inner());

        controller.set_rating_diff(-250);
        assert_eq!(controller.rating_factor, -50);

        // Beyond 400 points the bias keeps growing past a pawn
        controller.set_rating_diff(-600);
        assert_eq!(controller.rating_factor, -Score::PAWN.inner() - 20);
    }

    #[test]
    fn test_strength_ply_limit() {
        let game = Game::default();
        let limits = SearchLimits::depth(20);
        let full = SearchOptions::default();
        assert_eq!(strength_ply_limit(&game, &limits, &full), 20);

        let weak = SearchOptions {
            strength: 20,
            ..Default::default()
        };
        assert_eq!(strength_ply_limit(&game, &limits, &weak), 1);
        assert!(strength_factor(&limits, &weak) > 0.0);
        assert_eq!(strength_factor(&limits, &full), 0.0);

        // Endgames allow a little more depth
        let ending = crate::position::parse_fen("4k3/8/8/8/8/8/4P3/4K3 w - - 0 1").unwrap();
        let medium = SearchOptions {
            strength: 60,
            ..Default::default()
        };
        assert_eq!(strength_ply_limit(&ending, &limits, &medium), 7);
    }

    #[test]
    fn test_check_time_fixed() {
        let controller = SearchController::default();
        let game = Game::default();
        let limits = SearchLimits::fixed_time(Duration::ZERO);
        let ctx = controller.context(&game, &limits, 20, Instant::now());

        assert!(!ctx.is_stopped());
        ctx.check_time();
        assert!(ctx.is_stopped());
    }

    #[test]
    fn test_time_extension() {
        let controller = SearchController::default();
        let game = Game::default();
        let limits = SearchLimits::time_limit(Duration::ZERO, Duration::from_secs(60));
        let ctx = controller.context(&game, &limits, 20, Instant::now() - Duration::from_millis(5));

        // An unresolved fail high at the root earns the extra time
        ctx.fail_high_root.store(true, Ordering::Relaxed);
        ctx.check_time();
        assert!(!ctx.is_stopped());
        assert_eq!(ctx.time_added.load(Ordering::Relaxed), 60_000);
        assert!(ctx.fail_high_extend.load(Ordering::Relaxed));
    }

    #[test]
    fn test_draw_score_bias() {
        let mut controller = SearchController::default();
        controller.set_rating_diff(-400);
        let game = Game::default();
        let ctx = controller.context(&game, &SearchLimits::depth(1), 20, Instant::now());

        assert_eq!(ctx.draw_score(&game), Score::new(-Score::PAWN.inner()));
        let mut black = game;
        black.toggle_side_to_move();
        assert_eq!(ctx.draw_score(&black), Score::PAWN);
    }

    #[test]
    fn test_fail_low_penalty() {
        assert_eq!(fail_low_penalty(0, 9), 0);
        assert_eq!(fail_low_penalty(1, 9), 9);

        // Three fail lows in one iteration count once, not as 2 + 4 + 8
        assert_eq!(fail_low_penalty(3, 8), 32);
        assert_eq!(fail_low_penalty(40, 2), 1 << 32);
    }

    fn search_with_pruning(fen: &str, depth: usize, pruning: bool) -> SearchResult {
        let played = PlayedGame::from_fen(fen).unwrap();
        let mut controller = SearchController::default();
        controller.set_pruning(pruning);
        controller.find_best_move(&played, &SearchLimits::depth(depth))
    }

    #[test]
    fn test_pruning_keeps_tactics() {
        let wins = [
            // Free queen, for either side
            ("4k3/8/8/3q4/8/8/3R4/3RK3 w - - 0 1", "d2d5"),
            ("3rk3/3r4/8/8/3Q4/8/8/4K3 b - - 0 1", "d7d4"),
            // Back rank mate
            ("6k1/5ppp/8/8/8/8/5PPP/3R2K1 w - - 0 1", "d1d8"),
        ];

        for (fen, best) in wins {
            let played = PlayedGame::from_fen(fen).unwrap();
            let best = crate::parse_move(played.game(), best).ok();
            for depth in 2..=4 {
                let full = search_with_pruning(fen, depth, false);
                let pruned = search_with_pruning(fen, depth, true);

                assert_eq!(full.best_move, best, "full width missed {fen} at depth {depth}");
                assert_eq!(pruned.best_move, best, "pruned search missed {fen} at depth {depth}");
                assert_eq!(full.stats.value.is_mate(), pruned.stats.value.is_mate(), "{fen} at depth {depth}");
                assert!(pruned.stats.value > Score::PAWN * 5, "{fen} at depth {depth}: {}", pruned.stats.value);
            }
        }

        // Mate in two, found with and without pruning
        let fen = "7k/8/8/8/8/8/R7/1R4K1 w - - 0 1";
        for pruning in [false, true] {
            let result = search_with_pruning(fen, 5, pruning);
            assert_eq!(result.stats.value, Score::mate_in(3), "pruning {pruning}");
        }
    }
}
