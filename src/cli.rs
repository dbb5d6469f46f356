/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};

use crate::{
    parse_move, Evaluation, PlayedGame, SearchController, SearchLimits, SearchOptions, Statistics,
    TTable,
};

/// Depth every benchmark position is searched to, unless overridden.
pub const BENCH_DEPTH: usize = 8;

/// Positions searched by the `bench` command.
pub const BENCHMARK_FENS: [&str; 8] = [
    "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
    "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
    "8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1",
    "r3k2r/Pppp1ppp/1b3nbN/nP6/BBP1P3/q4N2/Pp1P2PP/R2Q1RK1 w kq - 0 1",
    "rnbq1k1r/pp1Pbppp/2p5/8/2B5/8/PPP1NnPP/RNBQK2R w KQ - 1 8",
    "r4rk1/1pp1qppp/p1np1n2/2b1p1B1/2B1P1b1/P1NP1N2/1PP1QPPP/R4RK1 w - - 0 10",
    "6k1/5ppp/8/8/8/8/5PPP/3R2K1 w - - 0 1",
    "8/8/4k3/8/2p5/8/B2P2K1/8 w - - 0 1",
];

/// A parallel alpha-beta search for chess positions.
#[derive(Debug, Clone, Parser)]
#[command(version, about, rename_all = "lower")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub options: OptionArgs,
}

/// Engine options shared by every command.
#[derive(Debug, Clone, Args)]
pub struct OptionArgs {
    /// Number of search threads.
    #[arg(short, long, global = true, default_value_t = 1)]
    pub threads: usize,

    /// Size of the transposition table, in megabytes.
    #[arg(long, global = true, default_value_t = TTable::DEFAULT_SIZE)]
    pub hash: usize,

    /// Number of principal variations to report.
    #[arg(long, global = true, default_value_t = 1)]
    pub multipv: usize,

    /// Playing strength in percent.
    #[arg(long, global = true, default_value_t = 100)]
    pub strength: u32,

    /// Plies of quiescence search in which quiet checks are tried.
    #[arg(long, global = true, default_value_t = 1)]
    pub qsearch_checks: i32,
}

impl From<&OptionArgs> for SearchOptions {
    fn from(args: &OptionArgs) -> Self {
        Self {
            threads: args.threads,
            hash_mb: args.hash,
            multipv: args.multipv,
            strength: args.strength,
            checks_in_qsearch: args.qsearch_checks,
            ..Default::default()
        }
    }
}

/// A command for the binary to run.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Search a position and print the best move.
    #[command(alias = "go")]
    Search {
        /// Position to search. Defaults to the standard starting position.
        #[arg(short, long)]
        fen: Option<String>,

        /// Moves, in UCI notation, played from the position before searching.
        #[arg(short, long, num_args = 1..)]
        moves: Vec<String>,

        /// Search to this many plies.
        #[arg(short, long, conflicts_with_all = ["movetime", "time"])]
        depth: Option<usize>,

        /// Search for exactly this many milliseconds.
        #[arg(long, conflicts_with = "time")]
        movetime: Option<u64>,

        /// Search for about this many milliseconds.
        #[arg(long)]
        time: Option<u64>,

        /// Milliseconds that `--time` may be exceeded by when the best move is unclear.
        #[arg(long, default_value_t = 0)]
        extra: u64,

        /// Root moves, in UCI notation, that must not be played.
        #[arg(long, num_args = 1..)]
        exclude: Vec<String>,
    },

    /// Search a fixed set of positions and report the total node count and speed.
    Bench {
        /// If set, the benchmarking results will be printed in a well-formatted table.
        #[arg(short, long, default_value = "false")]
        pretty: bool,

        /// Override the default benchmark depth.
        #[arg(short, long)]
        depth: Option<usize>,
    },

    /// Print an evaluation of a position.
    Eval {
        /// Position to evaluate. Defaults to the standard starting position.
        #[arg(short, long)]
        fen: Option<String>,

        /// If set, the value of every piece will be printed as well.
        #[arg(short, long, default_value = "false")]
        pretty: bool,
    },
}

impl Cli {
    /// Executes the parsed command.
    pub fn run(&self) -> Result<()> {
        let options = SearchOptions::from(&self.options);

        match &self.command {
            Command::Search {
                fen,
                moves,
                depth,
                movetime,
                time,
                extra,
                exclude,
            } => {
                let played = played_game(fen.as_deref(), moves)?;
                let mut limits = match (depth, movetime, time) {
                    (_, Some(ms), _) => SearchLimits::fixed_time(Duration::from_millis(*ms)),
                    (_, _, Some(ms)) => SearchLimits::time_limit(
                        Duration::from_millis(*ms),
                        Duration::from_millis(*extra),
                    ),
                    (Some(plies), _, _) => SearchLimits::depth(*plies),
                    (None, None, None) => SearchLimits::depth(BENCH_DEPTH),
                };
                limits.excludes = exclude
                    .iter()
                    .map(|mv| parse_move(played.game(), mv))
                    .collect::<Result<_, _>>()?;

                search(&played, &limits, options)
            }
            Command::Bench { pretty, depth } => bench(depth.unwrap_or(BENCH_DEPTH), *pretty, options),
            Command::Eval { fen, pretty } => {
                let played = played_game(fen.as_deref(), &[])?;
                let evaluation = Evaluation::new(played.game());
                if *pretty {
                    println!("{evaluation}");
                } else {
                    println!("{}", evaluation.score_for(played.game().side_to_move()));
                }
                Ok(())
            }
        }
    }
}

/// Builds the game described by `fen` followed by `moves`.
fn played_game(fen: Option<&str>, moves: &[String]) -> Result<PlayedGame> {
    let mut played = match fen {
        Some(fen) => PlayedGame::from_fen(fen)?,
        None => PlayedGame::default(),
    };
    for mv in moves {
        played
            .play_uci(mv)
            .with_context(|| format!("Failed to apply moves {moves:?}"))?;
    }
    Ok(played)
}

/// Executes the `search` command, printing every completed iteration and then the best move.
fn search(played: &PlayedGame, limits: &SearchLimits, options: SearchOptions) -> Result<()> {
    let mut controller = SearchController::new(options);
    controller.set_post_function(Box::new(|stats: &Statistics| println!("info {stats}")));

    let result = controller.find_best_move(played, limits);
    match result.best_move {
        Some(mv) => {
            let ponder = result.stats.best_line.get(1);
            match ponder {
                Some(ponder) => println!("bestmove {mv} ponder {ponder}"),
                None => println!("bestmove {mv}"),
            }
        }
        None => println!("bestmove (none) [{:?}]", result.stats.state),
    }
    Ok(())
}

/// Executes the `bench` command.
fn bench(depth: usize, pretty: bool, options: SearchOptions) -> Result<()> {
    let mut controller = SearchController::new(options);
    let limits = SearchLimits::depth(depth);
    let num_tests = BENCHMARK_FENS.len();
    let start = Instant::now();
    let mut nodes = 0;

    for (i, fen) in BENCHMARK_FENS.into_iter().enumerate() {
        println!("Benchmark position {}/{}: {fen}", i + 1, num_tests);

        let played = PlayedGame::from_fen(fen)?;
        controller.clear_hash_tables();
        let result = controller.find_best_move(&played, &limits);
        if result.best_move.is_none() {
            bail!("Benchmark position {fen:?} has no move to play");
        }
        println!(
            "{:>12} nodes {:>8} ms {:>10} nps  bestmove {}",
            result.stats.nodes,
            result.stats.elapsed_ms,
            result.stats.nps(),
            result.best_move.map_or_else(String::new, |mv| mv.to_string())
        );
        nodes += result.stats.nodes;
    }

    let elapsed = start.elapsed();
    let nps = (nodes as f32 / elapsed.as_secs_f32()) as u64;
    let m_nps = nodes as f32 / elapsed.as_secs_f32() / 1_000_000.0;
    let ms = elapsed.as_millis();

    if pretty {
        println!();
        println!("+--- Benchmark Complete ---+");
        println!("| time (ms)  : {ms:<12}|");
        println!("| nodes      : {nodes:<12}|");
        println!("| nps        : {nps:<12}|");
        println!("| Mnps       : {m_nps:<12.2}|");
        println!("+--------------------------+");
    } else {
        println!("{nodes} nodes {nps} nps");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_search() {
        let cli = Cli::try_parse_from([
            "tadpole", "search", "--depth", "3", "--moves", "e2e4", "e7e5", "--threads", "2",
        ])
        .unwrap();

        assert_eq!(cli.options.threads, 2);
        match cli.command {
            Command::Search { depth, moves, .. } => {
                assert_eq!(depth, Some(3));
                assert_eq!(moves, vec!["e2e4", "e7e5"]);
            }
            other => panic!("expected a search command, got {other:?}"),
        }
    }

    #[test]
    fn test_conflicting_limits() {
        let parsed = Cli::try_parse_from(["tadpole", "search", "--depth", "3", "--movetime", "100"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_bench_fens_are_valid() {
        for fen in BENCHMARK_FENS {
            assert!(PlayedGame::from_fen(fen).is_ok(), "invalid bench FEN {fen}");
        }
    }

    #[test]
    fn test_played_game_rejects_illegal_moves() {
        assert!(played_game(None, &["e2e5".to_string()]).is_err());
        let played = played_game(None, &["e2e4".to_string(), "c7c5".to_string()]).unwrap();
        assert_eq!(played.keys().len(), 3);
    }
}
