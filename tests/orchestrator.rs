//! Orchestrator behaviour against a scripted in-process engine.

mod common;

use std::thread;
use std::time::{Duration, Instant};

use chess_sparring::engine::Classification;
use chess_sparring::{
    EngineConfigPatch, EngineError, Evaluation, GameStatus, Move, Orchestrator, OrchestratorState,
    RulesError, RulesOracle, SessionSettings, Side,
};

use common::{config, fast_settings, init_logging, moves, FakeEngine, START};

const OPENING_LINES: [(u32, i32, &str); 3] = [(1, 35, "e2e4"), (2, 20, "d2d4"), (3, 15, "g1f3")];

fn ready(engine: &FakeEngine, rating: u32, accuracy: f64) -> Orchestrator {
    ready_with(engine, rating, accuracy, fast_settings())
}

fn ready_with(
    engine: &FakeEngine,
    rating: u32,
    accuracy: f64,
    settings: SessionSettings,
) -> Orchestrator {
    init_logging();
    let orchestrator =
        Orchestrator::with_seed(engine.launcher(), config(rating, accuracy), settings, 42);
    orchestrator.initialize().unwrap();
    orchestrator
}

#[test]
fn initialize_handshakes_and_applies_config() {
    let engine = FakeEngine::new("e2e4");
    let orchestrator = ready(&engine, 1450, 90.0);

    assert_eq!(orchestrator.state(), OrchestratorState::Ready);
    assert_eq!(
        engine.commands(),
        [
            "uci",
            "setoption name Skill Level value 7",
            "setoption name Contempt value 0",
            "setoption name Move Overhead value 30",
            "isready",
        ]
    );
    let identity = orchestrator.identity().unwrap();
    assert_eq!(identity.name.as_deref(), Some("Fakefish"));
    assert_eq!(identity.options.len(), 4);

    // already ready: no second launch
    orchestrator.initialize().unwrap();
    assert_eq!(engine.launches(), 1);
}

#[test]
fn full_accuracy_plays_the_engine_move() {
    let engine = FakeEngine::new("e2e4").with_lines(&OPENING_LINES);
    let orchestrator = ready(&engine, 2400, 100.0);
    let legal = moves(&["e2e4", "d2d4", "g1f3"]);

    let resolved = orchestrator.request_move(START, &legal).unwrap().wait().unwrap();

    assert_eq!(resolved.mv, legal[0]);
    assert!(!resolved.was_deliberately_suboptimal);
    assert_eq!(resolved.evaluation.variation_rank, 1);
    assert_eq!(resolved.evaluation.evaluation, Evaluation::Centipawns(35));
    assert_eq!(resolved.evaluation.search_depth, 12);
    assert_eq!(resolved.annotation.move_number, 1);
    assert_eq!(resolved.annotation.side, Side::White);
    assert_eq!(resolved.annotation.classification, Classification::Move);
    assert_eq!(resolved.delay_ms, 0);
    assert_eq!(orchestrator.state(), OrchestratorState::Ready);

    let commands = engine.commands();
    let go = commands.iter().position(|c| c == "go movetime 10").unwrap();
    assert_eq!(commands[go - 2], "setoption name MultiPV value 6");
    assert_eq!(commands[go - 1], "position startpos");
}

#[test]
fn zero_accuracy_substitutes_a_legal_move() {
    let engine = FakeEngine::new("e2e4").with_lines(&OPENING_LINES);
    let orchestrator = ready(&engine, 700, 0.0);
    let legal = moves(&["e2e4", "d2d4", "g1f3", "c2c4", "b1c3", "h2h3", "a2a3"]);

    for _ in 0..10 {
        let resolved = orchestrator.request_move(START, &legal).unwrap().wait().unwrap();
        assert_ne!(resolved.mv, legal[0]);
        assert!(legal.contains(&resolved.mv));
        assert!(resolved.was_deliberately_suboptimal);
        assert_eq!(resolved.evaluation.mv, resolved.mv);
        assert!(resolved.evaluation.variation_rank >= 2);
        assert!(resolved.annotation.classification >= Classification::Move);
    }
}

#[test]
fn black_moves_are_annotated_from_whites_side() {
    let engine = FakeEngine::new("e7e5").with_lines(&[(1, 10, "e7e5"), (2, -120, "f7f6")]);
    let orchestrator = ready(&engine, 2400, 100.0);
    let legal = moves(&["e7e5", "f7f6"]);

    let resolved = orchestrator
        .request_move("startpos moves e2e4", &legal)
        .unwrap()
        .wait()
        .unwrap();

    assert_eq!(resolved.mv, legal[0]);
    assert_eq!(resolved.annotation.side, Side::Black);
    assert_eq!(resolved.annotation.move_number, 1);
    assert_eq!(resolved.annotation.evaluation, Evaluation::Centipawns(-10));
    assert!(engine.count("position startpos moves e2e4") >= 1);
}

#[test]
fn second_request_is_rejected_until_cancelled() {
    let engine = FakeEngine::new("e2e4").with_lines(&OPENING_LINES).hanging(1);
    let orchestrator = ready(&engine, 2400, 100.0);
    let legal = moves(&["e2e4", "d2d4", "g1f3"]);

    let first = orchestrator.request_move(START, &legal).unwrap();
    assert_eq!(orchestrator.state(), OrchestratorState::Searching);
    assert!(engine.wait_for("go", 1));

    assert_eq!(
        orchestrator.request_move(START, &legal).unwrap_err(),
        EngineError::RequestInFlight
    );
    assert_eq!(
        orchestrator.request_candidates(START, 3).unwrap_err(),
        EngineError::RequestInFlight
    );

    orchestrator.cancel_current().unwrap();
    assert_eq!(orchestrator.state(), OrchestratorState::Ready);
    assert_eq!(first.wait(), Err(EngineError::Cancelled));
    assert!(engine.count("stop") >= 1);

    let second = orchestrator.request_move(START, &legal).unwrap();
    assert_eq!(second.wait().unwrap().mv, legal[0]);
    assert_eq!(orchestrator.state(), OrchestratorState::Ready);
}

#[test]
fn terminal_after_cancel_never_resolves_the_caller() {
    let engine = FakeEngine::new("e2e4").hanging(1);
    let orchestrator = ready(&engine, 2400, 100.0);
    let legal = moves(&["e2e4", "d2d4"]);

    let pending = orchestrator.request_move(START, &legal).unwrap();
    assert!(engine.wait_for("go", 1));
    orchestrator.cancel_current().unwrap();

    // the engine answers the stop with a bestmove; it must not leak through
    assert_eq!(
        pending.wait_timeout(Duration::from_secs(2)),
        Some(Err(EngineError::Cancelled))
    );
    assert!(!matches!(pending.try_result(), Some(Ok(_))));
}

#[test]
fn cancel_interrupts_the_thinking_delay() {
    let settings = SessionSettings {
        min_delay_ms: 3_000,
        max_delay_ms: 3_000,
        ..fast_settings()
    };
    let engine = FakeEngine::new("e2e4");
    let orchestrator = ready_with(&engine, 2400, 100.0, settings);

    let pending = orchestrator.request_move(START, &moves(&["e2e4"])).unwrap();
    assert!(engine.wait_for("go", 1));
    std::thread::sleep(Duration::from_millis(50));

    let cancelled_at = Instant::now();
    orchestrator.cancel_current().unwrap();
    assert_eq!(pending.wait(), Err(EngineError::Cancelled));
    assert!(cancelled_at.elapsed() < Duration::from_secs(1));
}

#[test]
fn delivery_waits_for_the_simulated_delay() {
    let settings = SessionSettings {
        min_delay_ms: 40,
        max_delay_ms: 400,
        ..fast_settings()
    };
    let engine = FakeEngine::new("e2e4");
    // at the rating ceiling the delay is exactly the minimum
    let orchestrator = ready_with(&engine, 2500, 100.0, settings);

    let started = Instant::now();
    let resolved = orchestrator
        .request_move(START, &moves(&["e2e4"]))
        .unwrap()
        .wait()
        .unwrap();
    assert_eq!(resolved.delay_ms, 40);
    assert!(started.elapsed() >= Duration::from_millis(40));
}

#[test]
fn cancel_without_a_search_is_rejected() {
    let engine = FakeEngine::new("e2e4");
    let orchestrator = Orchestrator::new(engine.launcher(), config(1500, 80.0), fast_settings());
    assert_eq!(orchestrator.cancel_current(), Err(EngineError::NotSearching));

    orchestrator.initialize().unwrap();
    assert_eq!(orchestrator.cancel_current(), Err(EngineError::NotSearching));
    assert_eq!(orchestrator.state(), OrchestratorState::Ready);
}

#[test]
fn requests_before_initialize_are_rejected() {
    let engine = FakeEngine::new("e2e4");
    let orchestrator = Orchestrator::new(engine.launcher(), config(1500, 80.0), fast_settings());
    let err = orchestrator
        .request_move(START, &moves(&["e2e4"]))
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState { .. }));
    assert_eq!(engine.launches(), 0);
}

#[test]
fn empty_legal_list_is_no_legal_move() {
    let engine = FakeEngine::new("e2e4");
    let orchestrator = ready(&engine, 1500, 80.0);
    assert_eq!(
        orchestrator.request_move(START, &[]).unwrap_err(),
        EngineError::NoLegalMove
    );
    assert_eq!(orchestrator.state(), OrchestratorState::Ready);
    assert_eq!(engine.count("go"), 0);
}

#[test]
fn engine_without_legal_move_reports_it() {
    let engine = FakeEngine::without_legal_move();
    let orchestrator = ready(&engine, 1500, 80.0);
    let err = orchestrator
        .request_move(START, &moves(&["e2e4"]))
        .unwrap()
        .wait()
        .unwrap_err();
    assert_eq!(err, EngineError::NoLegalMove);
    assert_eq!(orchestrator.state(), OrchestratorState::Ready);
}

#[test]
fn malformed_positions_are_rejected_up_front() {
    let engine = FakeEngine::new("e2e4");
    let orchestrator = ready(&engine, 1500, 80.0);
    let legal = moves(&["e2e4"]);

    assert!(matches!(
        orchestrator.request_move("garbage", &legal).unwrap_err(),
        EngineError::InvalidPosition { .. }
    ));
    assert!(matches!(
        orchestrator.request_move("startpos moves e2e9", &legal).unwrap_err(),
        EngineError::InvalidMoveText { .. }
    ));
    assert!(matches!(
        orchestrator.request_move("", &legal).unwrap_err(),
        EngineError::InvalidPosition { .. }
    ));
    assert_eq!(engine.count("position"), 0);
    assert_eq!(orchestrator.state(), OrchestratorState::Ready);
}

#[test]
fn candidates_are_ranked_and_never_synthesized() {
    // rank 3 is never reported
    let engine = FakeEngine::new("e2e4").with_lines(&[
        (1, 35, "e2e4"),
        (2, 20, "d2d4"),
        (4, -5, "b1c3"),
    ]);
    let orchestrator = ready(&engine, 1500, 80.0);

    let candidates = orchestrator.request_candidates(START, 4).unwrap().wait().unwrap();
    let ranks: Vec<u32> = candidates.iter().map(|c| c.variation_rank).collect();
    assert_eq!(ranks, [1, 2, 4]);
    assert_eq!(candidates[0].mv, "e2e4".parse::<Move>().unwrap());
    assert!(candidates.iter().all(|c| c.search_depth == 12));
    assert_eq!(orchestrator.state(), OrchestratorState::Ready);

    let top_two = orchestrator.request_candidates(START, 2).unwrap().wait().unwrap();
    assert_eq!(top_two.len(), 2);
    assert!(engine.count("setoption name MultiPV value 2") >= 1);

    assert!(orchestrator.request_candidates(START, 0).unwrap().wait().unwrap().is_empty());
}

#[test]
fn config_update_is_applied_at_once_when_ready() {
    let engine = FakeEngine::new("e2e4");
    let orchestrator = ready(&engine, 1500, 80.0);

    let updated = orchestrator
        .update_config(&EngineConfigPatch::rating(2000))
        .unwrap();
    assert_eq!(updated.search_skill_level, 13);
    assert_eq!(orchestrator.config(), updated);
    assert_eq!(engine.count("setoption name Skill Level value 13"), 1);
    assert_eq!(engine.count("isready"), 2);
}

#[test]
fn config_update_mid_search_waits_for_next_request() {
    let engine = FakeEngine::new("e2e4").hanging(1);
    let orchestrator = ready(&engine, 1500, 100.0);
    let legal = moves(&["e2e4", "d2d4"]);

    let first = orchestrator.request_move(START, &legal).unwrap();
    assert!(engine.wait_for("go", 1));

    let patch = EngineConfigPatch {
        strength_rating: Some(2000),
        contempt: Some(15),
        ..EngineConfigPatch::default()
    };
    let updated = orchestrator.update_config(&patch).unwrap();
    assert_eq!(updated.strength_rating, 2000);
    assert_eq!(orchestrator.config().contempt, 15);
    assert_eq!(engine.count("setoption name Contempt value 15"), 0);

    orchestrator.cancel_current().unwrap();
    assert_eq!(first.wait(), Err(EngineError::Cancelled));

    orchestrator.request_move(START, &legal).unwrap().wait().unwrap();
    let commands = engine.commands();
    let applied = commands
        .iter()
        .position(|c| c == "setoption name Contempt value 15")
        .unwrap();
    let last_go = commands.iter().rposition(|c| c.starts_with("go")).unwrap();
    assert!(applied < last_go);
    assert_eq!(engine.count("setoption name Skill Level value 13"), 1);
}

#[test]
fn config_update_after_cancel_follows_the_stopped_search() {
    let engine = FakeEngine::new("e2e4").hanging(1);
    let orchestrator = ready(&engine, 1500, 100.0);
    let legal = moves(&["e2e4", "d2d4"]);

    let first = orchestrator.request_move(START, &legal).unwrap();
    assert!(engine.wait_for("go", 1));
    orchestrator.cancel_current().unwrap();
    assert_eq!(first.wait(), Err(EngineError::Cancelled));

    orchestrator
        .update_config(&EngineConfigPatch::rating(2000))
        .unwrap();
    let commands = engine.commands();
    let stop = commands.iter().position(|c| c == "stop").unwrap();
    let applied = commands
        .iter()
        .position(|c| c == "setoption name Skill Level value 13")
        .unwrap();
    assert!(stop < applied);

    let resolved = orchestrator.request_move(START, &legal).unwrap().wait().unwrap();
    assert_eq!(resolved.mv, "e2e4".parse().unwrap());
    assert_eq!(engine.count("go"), 2);
}

#[test]
fn config_update_does_not_block_state_queries() {
    let engine = FakeEngine::new("e2e4");
    let orchestrator = ready(&engine, 1500, 80.0);
    engine.delay_ready(300);

    thread::scope(|scope| {
        let update = scope.spawn(|| orchestrator.update_config(&EngineConfigPatch::rating(2000)));
        assert!(engine.wait_for("isready", 2));

        let started = Instant::now();
        assert_eq!(orchestrator.state(), OrchestratorState::Ready);
        assert_eq!(orchestrator.config().strength_rating, 2000);
        assert!(started.elapsed() < Duration::from_millis(150));

        let updated = update.join().unwrap().unwrap();
        assert_eq!(updated.search_skill_level, 13);
    });
    assert_eq!(engine.count("setoption name Skill Level value 13"), 1);
}

#[test]
fn search_timeout_recovers_to_ready() {
    let engine = FakeEngine::new("e2e4").with_lines(&OPENING_LINES).hanging(1);
    let orchestrator = ready(&engine, 2400, 100.0);
    let legal = moves(&["e2e4", "d2d4", "g1f3"]);

    let err = orchestrator.request_move(START, &legal).unwrap().wait().unwrap_err();
    assert!(matches!(err, EngineError::EngineTimeout { .. }));
    assert!(err.is_retryable());
    assert_eq!(orchestrator.state(), OrchestratorState::Ready);

    // the late terminal of the timed-out search is skipped
    let resolved = orchestrator.request_move(START, &legal).unwrap().wait().unwrap();
    assert_eq!(resolved.mv, legal[0]);
}

#[test]
fn missing_handshake_leaves_orchestrator_uninitialized() {
    init_logging();
    let engine = FakeEngine::new("e2e4").silent();
    let orchestrator = Orchestrator::new(engine.launcher(), config(1500, 80.0), fast_settings());

    let err = orchestrator.initialize().unwrap_err();
    assert!(matches!(err, EngineError::EngineUnavailable { .. }));
    assert_eq!(orchestrator.state(), OrchestratorState::Uninitialized);
    assert!(orchestrator.identity().is_none());
}

#[test]
fn failed_launch_can_be_retried() {
    init_logging();
    let engine = FakeEngine::new("e2e4").failing_launches(1);
    let orchestrator = Orchestrator::new(engine.launcher(), config(1500, 80.0), fast_settings());

    assert!(orchestrator.initialize().unwrap_err().is_fatal());
    assert_eq!(orchestrator.state(), OrchestratorState::Uninitialized);

    orchestrator.initialize().unwrap();
    assert_eq!(orchestrator.state(), OrchestratorState::Ready);
    assert_eq!(engine.launches(), 1);
}

#[test]
fn engine_crash_requires_reinitialize() {
    let engine = FakeEngine::new("e2e4").dying(1);
    let orchestrator = ready(&engine, 2400, 100.0);
    let legal = moves(&["e2e4"]);

    let err = orchestrator.request_move(START, &legal).unwrap().wait().unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(orchestrator.state(), OrchestratorState::Uninitialized);
    assert!(matches!(
        orchestrator.request_move(START, &legal).unwrap_err(),
        EngineError::InvalidState { .. }
    ));

    orchestrator.initialize().unwrap();
    assert_eq!(engine.launches(), 2);
    let resolved = orchestrator.request_move(START, &legal).unwrap().wait().unwrap();
    assert_eq!(resolved.mv, legal[0]);
}

#[test]
fn dispose_rejects_pending_and_terminates() {
    let engine = FakeEngine::new("e2e4").hanging(1);
    let orchestrator = ready(&engine, 1500, 80.0);

    let pending = orchestrator.request_move(START, &moves(&["e2e4"])).unwrap();
    assert!(engine.wait_for("go", 1));
    orchestrator.dispose();

    assert_eq!(pending.wait(), Err(EngineError::Terminated));
    assert_eq!(orchestrator.state(), OrchestratorState::Terminated);
    assert_eq!(engine.count("quit"), 1);
    assert_eq!(
        orchestrator.request_move(START, &moves(&["e2e4"])).unwrap_err(),
        EngineError::Terminated
    );
    assert_eq!(orchestrator.cancel_current(), Err(EngineError::Terminated));
    assert!(orchestrator.update_config(&EngineConfigPatch::rating(900)).is_err());
    assert_eq!(orchestrator.initialize(), Err(EngineError::Terminated));

    orchestrator.dispose();
    assert_eq!(engine.count("quit"), 1);
}

#[test]
fn new_game_resynchronises() {
    let engine = FakeEngine::new("e2e4");
    let orchestrator = ready(&engine, 1500, 80.0);
    orchestrator.new_game().unwrap();
    let commands = engine.commands();
    assert_eq!(&commands[commands.len() - 2..], ["ucinewgame", "isready"]);
}

/// Rules oracle that only knows a fixed move list.
struct FixedRules {
    fen: String,
    legal: Vec<Move>,
}

impl RulesOracle for FixedRules {
    fn import_position(&mut self, fen: &str) -> Result<(), RulesError> {
        if fen.split_whitespace().count() != 6 {
            return Err(RulesError::InvalidPosition {
                input: fen.to_string(),
                reason: "expected six fields".to_string(),
            });
        }
        self.fen = fen.to_string();
        Ok(())
    }

    fn export_position(&self) -> String {
        self.fen.clone()
    }

    fn import_moves(&mut self, _text: &str) -> Result<(), RulesError> {
        Ok(())
    }

    fn export_moves(&self) -> String {
        String::new()
    }

    fn legal_moves(&self) -> Vec<Move> {
        self.legal.clone()
    }

    fn make_move(&mut self, _mv: Move) -> Result<(), RulesError> {
        Ok(())
    }

    fn undo_move(&mut self) -> Option<Move> {
        None
    }

    fn is_check(&self) -> bool {
        false
    }

    fn status(&self) -> GameStatus {
        GameStatus::Ongoing
    }
}

#[test]
fn request_move_with_uses_the_rules_oracle() {
    let fen = "r1bqkbnr/pppp1ppp/2n5/4p3/4P3/5N2/PPPP1PPP/RNBQKB1R w KQkq - 2 3";
    let engine = FakeEngine::new("f1b5").with_lines(&[(1, 30, "f1b5"), (2, 25, "f1c4")]);
    let orchestrator = ready(&engine, 2400, 100.0);
    let mut rules = FixedRules {
        fen: String::new(),
        legal: moves(&["f1b5", "f1c4", "d2d4"]),
    };

    let err = orchestrator
        .request_move_with(&mut rules, "not a fen")
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidPosition { .. }));
    assert_eq!(orchestrator.state(), OrchestratorState::Ready);

    let resolved = orchestrator
        .request_move_with(&mut rules, fen)
        .unwrap()
        .wait()
        .unwrap();
    assert_eq!(resolved.mv, "f1b5".parse::<Move>().unwrap());
    assert_eq!(resolved.annotation.move_number, 3);
    assert_eq!(engine.count(&format!("position fen {fen}")), 1);
    assert!(!rules.is_game_over());
}
