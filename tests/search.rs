/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use chessie::Game;
use tadpole::{
    hash_of, parse_move, Depth, EntryFlags, PlayedGame, Score, SearchController, SearchLimits,
    SearchOptions, SearchResult, SearchState, Tablebase,
};

fn search_fen(fen: &str, limits: &SearchLimits, options: SearchOptions) -> SearchResult {
    let played = PlayedGame::from_fen(fen).unwrap();
    SearchController::new(options).find_best_move(&played, limits)
}

fn assert_legal(fen: &str, result: &SearchResult) {
    let played = PlayedGame::from_fen(fen).unwrap();
    let mv = result
        .best_move
        .unwrap_or_else(|| panic!("No move found for {fen}"));
    assert!(
        played.game().get_legal_moves().contains(&mv),
        "{mv} is not legal in {fen}"
    );
}

#[test]
fn test_mate_in_two() {
    // 1. Ra7 Kg8 2. Rb8# (or the same with the rooks swapped)
    let fen = "7k/8/8/8/8/8/R7/1R4K1 w - - 0 1";
    let result = search_fen(fen, &SearchLimits::depth(5), SearchOptions::default());

    assert_legal(fen, &result);
    assert_eq!(
        result.stats.value,
        Score::mate_in(3),
        "expected mate in 2, got {}",
        result.stats.value
    );
    assert_eq!(result.stats.value.moves_to_mate(), 2);
}

#[test]
fn test_mate_in_one() {
    let fen = "6k1/5ppp/8/8/8/8/5PPP/3R2K1 w - - 0 1";
    let result = search_fen(fen, &SearchLimits::depth(3), SearchOptions::default());

    let played = PlayedGame::from_fen(fen).unwrap();
    assert_eq!(result.best_move, parse_move(played.game(), "d1d8").ok());
    assert_eq!(result.stats.value, Score::mate_in(1));
}

#[test]
fn test_wins_hanging_queen() {
    // Pruning must not hide a free queen
    let fen = "4k3/8/8/3q4/8/8/3R4/3RK3 w - - 0 1";
    for depth in 1..=4 {
        let result = search_fen(fen, &SearchLimits::depth(depth), SearchOptions::default());
        let played = PlayedGame::from_fen(fen).unwrap();
        assert_eq!(
            result.best_move,
            parse_move(played.game(), "d2d5").ok(),
            "depth {depth} missed the capture"
        );
        assert!(result.stats.value > Score::PAWN * 5, "depth {depth}: {}", result.stats.value);
    }
}

#[test]
fn test_score_bounds() {
    let fens = [
        "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
        "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
        "8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1",
    ];
    for fen in fens {
        let result = search_fen(fen, &SearchLimits::depth(4), SearchOptions::default());
        assert_legal(fen, &result);
        let value = result.stats.value;
        assert!(
            value >= -Score::MATE && value <= Score::MATE,
            "{value:?} out of range for {fen}"
        );
        assert_eq!(result.stats.completed_depth, 4);
        assert!(result.stats.nodes > 0);
    }
}

#[test]
fn test_checkmate_and_stalemate() {
    let mated = search_fen(
        "7k/6Q1/6K1/8/8/8/8/8 b - - 0 1",
        &SearchLimits::depth(3),
        SearchOptions::default(),
    );
    assert_eq!(mated.best_move, None);
    assert_eq!(mated.stats.state, SearchState::Checkmate);
    assert_eq!(mated.stats.value, -Score::MATE);

    let stalemate = search_fen(
        "7k/5Q2/6K1/8/8/8/8/8 b - - 0 1",
        &SearchLimits::depth(3),
        SearchOptions::default(),
    );
    assert_eq!(stalemate.best_move, None);
    assert_eq!(stalemate.stats.state, SearchState::Stalemate);
}

#[test]
fn test_draw_by_repetition() {
    let mut played = PlayedGame::default();
    for _ in 0..2 {
        for mv in ["g1f3", "g8f6", "f3g1", "f6g8"] {
            played.play_uci(mv).unwrap();
        }
    }
    assert!(played.is_legal_draw());

    let mut controller = SearchController::default();
    let result = controller.find_best_move(&played, &SearchLimits::depth(4));
    assert_eq!(result.best_move, None);
    assert_eq!(result.stats.state, SearchState::Draw);
    assert_eq!(result.stats.value, Score::DRAW);

    // Analysis still produces a move
    let limits = SearchLimits {
        infinite: true,
        ..SearchLimits::depth(3)
    };
    let result = controller.find_best_move(&played, &limits);
    assert!(result.best_move.is_some());
}

#[test]
fn test_draw_by_fifty_moves() {
    let fen = "4k3/8/8/8/8/8/4P3/4K3 w - - 100 80";
    let result = search_fen(fen, &SearchLimits::depth(4), SearchOptions::default());
    assert_eq!(result.stats.state, SearchState::Draw);
    assert_eq!(result.stats.value, Score::DRAW);
}

#[test]
fn test_draw_score_follows_rating() {
    let fen = "4k3/8/8/8/8/8/4P3/4K3 w - - 100 80";
    let played = PlayedGame::from_fen(fen).unwrap();
    let mut controller = SearchController::default();

    // Against a weaker opponent a draw is worth less than nothing
    controller.set_rating_diff(-400);
    let result = controller.find_best_move(&played, &SearchLimits::depth(2));
    assert_eq!(result.stats.value, -Score::PAWN);
}

#[test]
fn test_parallel_consistency() {
    let fen = "r4rk1/1pp1qppp/p1np1n2/2b1p1B1/2B1P1b1/P1NP1N2/1PP1QPPP/R4RK1 w - - 0 10";
    let limits = SearchLimits::depth(6);

    let single = search_fen(fen, &limits, SearchOptions::default());
    let options = SearchOptions {
        threads: 4,
        ..Default::default()
    };
    let parallel = search_fen(fen, &limits, options);

    assert_legal(fen, &single);
    assert_legal(fen, &parallel);
    // Thread timing changes the tree, so only closeness is required
    let diff = (single.stats.value - parallel.stats.value).abs();
    assert!(
        diff <= Score::PAWN * 2,
        "1 thread scored {}, 4 threads scored {}",
        single.stats.value,
        parallel.stats.value
    );
}

#[test]
fn test_parallel_finds_mate() {
    let options = SearchOptions {
        threads: 3,
        ..Default::default()
    };
    let result = search_fen(
        "7k/8/8/8/8/8/R7/1R4K1 w - - 0 1",
        &SearchLimits::depth(6),
        options,
    );
    assert_eq!(result.stats.value, Score::mate_in(3));
}

#[test]
fn test_multipv() {
    let fen = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";
    let options = SearchOptions {
        multipv: 3,
        ..Default::default()
    };
    let result = search_fen(fen, &SearchLimits::depth(3), options);

    let lines = &result.stats.multipv;
    assert_eq!(lines.len(), 3);
    assert!(lines.windows(2).all(|pair| pair[0].score >= pair[1].score));

    let mut firsts: Vec<_> = lines.iter().filter_map(|line| line.pv.first()).collect();
    firsts.dedup();
    assert_eq!(firsts.len(), 3, "lines must start with different moves: {lines:?}");
}

#[test]
fn test_excluded_moves() {
    let fen = "4k3/8/8/3q4/8/8/3R4/3RK3 w - - 0 1";
    let played = PlayedGame::from_fen(fen).unwrap();
    let capture = parse_move(played.game(), "d2d5").unwrap();
    let limits = SearchLimits {
        excludes: vec![capture],
        ..SearchLimits::depth(3)
    };

    let result = SearchController::default().find_best_move(&played, &limits);
    assert!(result.best_move.is_some());
    assert_ne!(result.best_move, Some(capture));
}

#[test]
fn test_single_reply() {
    // The King must take the rook
    let fen = "k7/8/8/8/8/8/6r1/7K w - - 0 1";
    let result = search_fen(fen, &SearchLimits::depth(20), SearchOptions::default());

    let played = PlayedGame::from_fen(fen).unwrap();
    assert_eq!(result.best_move, parse_move(played.game(), "h1g2").ok());
    assert!(result.stats.completed_depth <= 2);
}

#[test]
fn test_stop_handle() {
    let played = PlayedGame::default();
    let mut controller = SearchController::default();
    let handle = controller.stop_handle();
    let limits = SearchLimits {
        infinite: true,
        ..Default::default()
    };

    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        handle.stop();
    });
    let start = Instant::now();
    let result = controller.find_best_move(&played, &limits);
    stopper.join().unwrap();

    assert!(result.best_move.is_some());
    assert_eq!(result.stats.state, SearchState::Terminated);
    assert!(start.elapsed() < Duration::from_secs(10));
}

#[test]
fn test_fixed_time() {
    let played = PlayedGame::default();
    let limits = SearchLimits::fixed_time(Duration::from_millis(150));
    let start = Instant::now();
    let result = SearchController::default().find_best_move(&played, &limits);

    assert!(result.best_move.is_some());
    assert!(
        start.elapsed() < Duration::from_secs(2),
        "search overran its time: {:?}",
        start.elapsed()
    );
}

#[test]
fn test_post_and_terminate_functions() {
    let played = PlayedGame::default();
    let mut controller = SearchController::default();

    let posted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&posted);
    controller.set_post_function(Box::new(move |_| {
        counter.fetch_add(1, Ordering::Relaxed);
    }));
    controller.set_terminate_function(Box::new(|stats| stats.completed_depth >= 3));

    let result = controller.find_best_move(&played, &SearchLimits::depth(10));
    assert_eq!(result.stats.completed_depth, 3);
    assert_eq!(posted.load(Ordering::Relaxed), 3);
}

#[test]
fn test_resignation() {
    // A lone King against a Queen
    let fen = "4k3/8/8/8/8/8/q7/4K3 w - - 0 1";
    let result = search_fen(fen, &SearchLimits::depth(3), SearchOptions::default());
    assert_eq!(result.stats.state, SearchState::Resigns);
    assert!(result.best_move.is_some());

    let options = SearchOptions {
        can_resign: false,
        ..Default::default()
    };
    let result = search_fen(fen, &SearchLimits::depth(3), options);
    assert_ne!(result.stats.state, SearchState::Resigns);
}

#[test]
fn test_reduced_strength() {
    let fen = "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1";
    let options = SearchOptions {
        strength: 10,
        ..Default::default()
    };
    let result = search_fen(fen, &SearchLimits::depth(10), options);

    assert_legal(fen, &result);
    assert!(result.stats.completed_depth <= 2);
}

#[test]
fn test_clear_hash_tables() {
    let played = PlayedGame::default();
    let mut controller = SearchController::default();
    let first = controller.find_best_move(&played, &SearchLimits::depth(4));
    assert!(first.stats.hash_full > 0);

    controller.clear_hash_tables();
    let second = controller.find_best_move(&played, &SearchLimits::depth(4));
    assert!(second.best_move.is_some());

    controller.resize_hash(1);
    let third = controller.find_best_move(&played, &SearchLimits::depth(2));
    assert!(third.best_move.is_some());
}

#[test]
fn test_set_options_resizes_pool() {
    let mut controller = SearchController::default();
    let options = SearchOptions {
        threads: 3,
        ..Default::default()
    };
    controller.set_options(options).unwrap();
    assert_eq!(controller.threads(), 3);

    let result = controller.find_best_move(&PlayedGame::default(), &SearchLimits::depth(5));
    assert!(result.best_move.is_some());
}

#[test]
fn test_null_move_subtrees() {
    // Quiet positions where null moves are tried at every depth, and searched below one another
    let fens = [
        "r1bq1rk1/pp2bppp/2n1pn2/3p4/2PP4/2N1PN2/PP3PPP/R2QKB1R w KQ - 0 8",
        "r4rk1/1pp1qppp/p1np1n2/2b1p1B1/2B1P1b1/P1NP1N2/1PP1QPPP/R4RK1 w - - 0 10",
        "8/5pk1/6p1/8/8/6P1/5PK1/8 b - - 0 40",
    ];
    for fen in fens {
        let result = search_fen(fen, &SearchLimits::depth(7), SearchOptions::default());
        assert_legal(fen, &result);
        assert_eq!(result.stats.completed_depth, 7, "{fen}");
    }
}

/// Knows every position with at most three men: the side with the extra piece wins, bare Kings draw.
struct ThreeMen;

impl Tablebase for ThreeMen {
    fn max_pieces(&self) -> usize {
        3
    }

    fn probe(&self, game: &Game) -> Option<Score> {
        let men: Vec<_> = game.board().into_iter().map(|(_, piece)| piece).collect();
        if men.len() > 3 {
            return None;
        }
        let ours = men.iter().filter(|piece| piece.color() == game.side_to_move()).count();
        let theirs = men.len() - ours;
        Some(Score::new(1000 * (ours as i32 - theirs as i32)))
    }
}

#[test]
fn test_tablebase_positions() {
    let fen = "4k3/8/8/8/8/8/8/Q3K3 w - - 0 1";
    let played = PlayedGame::from_fen(fen).unwrap();
    let mut controller = SearchController::default().with_tablebase(Arc::new(ThreeMen));
    let result = controller.find_best_move(&played, &SearchLimits::depth(20));

    assert_legal(fen, &result);
    assert!(result.stats.tb_hits > 0);
    assert_eq!(result.stats.value, Score::new(1000));
    // A solved root needs no deep search
    assert!(result.stats.completed_depth <= 3, "searched {} plies", result.stats.completed_depth);

    // Tablebase scores are stored as exact, protected entries
    for mv in played.game().get_legal_moves() {
        let child = played.game().with_move_made(mv);
        let entry = controller
            .hash_table()
            .probe(hash_of(&child, false), Depth::ZERO, 0)
            .entry()
            .copied();
        let entry = entry.unwrap_or_else(|| panic!("{mv} was not stored"));
        assert!(entry.flags.contains(EntryFlags::TB), "{mv} has no tablebase entry");
    }
}

#[test]
fn test_nested_splits() {
    let fen = "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1";
    let options = SearchOptions {
        threads: 4,
        ..Default::default()
    };
    let start = Instant::now();
    let result = search_fen(fen, &SearchLimits::depth(10), options);

    assert_legal(fen, &result);
    assert_eq!(result.stats.completed_depth, 10);
    assert!(result.stats.splits > 0, "no node was split");
    assert!(start.elapsed() < Duration::from_secs(300));
}

#[test]
fn test_analysis_ignores_strength() {
    let fens = [
        "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
        "r1bqkbnr/pppp1ppp/2n5/4p3/4P3/5N2/PPPP1PPP/RNBQKB1R w KQkq - 2 3",
        "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
    ];
    let limits = SearchLimits {
        infinite: true,
        ..Default::default()
    };

    for fen in fens {
        let played = PlayedGame::from_fen(fen).unwrap();
        let mut best = Vec::new();
        for strength in [100, 0] {
            let mut controller = SearchController::new(SearchOptions {
                strength,
                ..Default::default()
            });
            controller.set_terminate_function(Box::new(|stats| stats.completed_depth >= 2));
            best.push(controller.find_best_move(&played, &limits).best_move);
        }
        assert!(best[0].is_some());
        assert_eq!(best[0], best[1], "a weakened move was played while analysing {fen}");
    }
}

