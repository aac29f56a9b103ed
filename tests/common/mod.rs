//! Scripted in-process UCI engine for integration tests.

#![allow(dead_code)]

use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use chess_sparring::uci::{parse_engine_line, EngineLine, EngineLink, Launcher, LineSink};
use chess_sparring::{EngineConfig, EngineError, Move, SessionSettings};

pub const START: &str = "startpos";

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn moves(list: &[&str]) -> Vec<Move> {
    list.iter().map(|m| m.parse().unwrap()).collect()
}

/// Short waits everywhere and no thinking delay.
pub fn fast_settings() -> SessionSettings {
    SessionSettings {
        handshake_timeout_ms: 500,
        ready_timeout_ms: 500,
        search_timeout_margin_ms: 200,
        node_search_timeout_ms: 500,
        stale_drain_timeout_ms: 300,
        ..SessionSettings::instant()
    }
}

pub fn config(rating: u32, accuracy: f64) -> EngineConfig {
    EngineConfig {
        accuracy,
        time_budget_ms: 10,
        ..EngineConfig::for_rating(rating)
    }
}

/// A fake engine: answers the handshake, then replays its scripted lines
/// for every `go`.
///
/// Clones share the command log and the countdowns, so a test keeps one
/// handle while the orchestrator owns a boxed clone.
#[derive(Clone)]
pub struct FakeEngine {
    name: String,
    options: Vec<String>,
    acknowledge_handshake: bool,
    infos: Vec<String>,
    best: Option<String>,
    hanging_searches: Arc<AtomicUsize>,
    dying_searches: Arc<AtomicUsize>,
    failing_launches: Arc<AtomicUsize>,
    launches: Arc<AtomicUsize>,
    ready_delay_ms: Arc<AtomicU64>,
    commands: Arc<Mutex<Vec<String>>>,
}

impl FakeEngine {
    pub fn new(best: &str) -> Self {
        FakeEngine {
            name: "Fakefish".to_string(),
            options: ["Skill Level", "Contempt", "Move Overhead", "MultiPV"]
                .iter()
                .map(ToString::to_string)
                .collect(),
            acknowledge_handshake: true,
            infos: Vec::new(),
            best: Some(best.to_string()),
            hanging_searches: Arc::new(AtomicUsize::new(0)),
            dying_searches: Arc::new(AtomicUsize::new(0)),
            failing_launches: Arc::new(AtomicUsize::new(0)),
            launches: Arc::new(AtomicUsize::new(0)),
            ready_delay_ms: Arc::new(AtomicU64::new(0)),
            commands: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Ranked lines as `(rank, centipawns, move)`, each reported at a
    /// shallow and then a deeper depth.
    pub fn with_lines(mut self, lines: &[(u32, i32, &str)]) -> Self {
        for depth in [6, 12] {
            for (rank, cp, mv) in lines {
                self.infos.push(format!(
                    "info depth {depth} seldepth {} multipv {rank} score cp {cp} nodes 4000 nps 400000 time 10 pv {mv}",
                    depth + 2
                ));
            }
        }
        self
    }

    /// Answer every search with `bestmove (none)`.
    pub fn without_legal_move() -> Self {
        FakeEngine {
            best: None,
            ..FakeEngine::new("0000")
        }
    }

    /// Never send `uciok`.
    pub fn silent(mut self) -> Self {
        self.acknowledge_handshake = false;
        self
    }

    /// The first `n` searches run until `stop`.
    pub fn hanging(self, n: usize) -> Self {
        self.hanging_searches.store(n, Ordering::SeqCst);
        self
    }

    /// The first `n` searches crash the engine.
    pub fn dying(self, n: usize) -> Self {
        self.dying_searches.store(n, Ordering::SeqCst);
        self
    }

    /// The first `n` launches fail.
    pub fn failing_launches(self, n: usize) -> Self {
        self.failing_launches.store(n, Ordering::SeqCst);
        self
    }

    /// From now on, answer `isready` only after `ms`.
    pub fn delay_ready(&self, ms: u64) {
        self.ready_delay_ms.store(ms, Ordering::SeqCst);
    }

    pub fn launcher(&self) -> Box<dyn Launcher> {
        Box::new(self.clone())
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.commands
            .lock()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// Block until `n` commands starting with `prefix` arrived.
    pub fn wait_for(&self, prefix: &str, n: usize) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if self.count(prefix) >= n {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    fn run(&self, commands: Receiver<String>, out: Sender<String>) {
        let mut multipv = 1;
        let mut searching = false;
        for line in commands {
            self.commands.lock().push(line.clone());
            let parts: Vec<&str> = line.split_whitespace().collect();
            match parts.first().copied() {
                Some("uci") => {
                    let _ = out.send(format!("id name {}", self.name));
                    let _ = out.send("id author Integration Tests".to_string());
                    for name in &self.options {
                        let _ = out.send(format!("option name {name} type spin default 1 min 0 max 500"));
                    }
                    if self.acknowledge_handshake {
                        let _ = out.send("uciok".to_string());
                    }
                }
                Some("isready") => {
                    let delay = self.ready_delay_ms.load(Ordering::SeqCst);
                    if delay > 0 {
                        thread::sleep(Duration::from_millis(delay));
                    }
                    let _ = out.send("readyok".to_string());
                }
                Some("setoption") => {
                    if let Some((name, Some(value))) = parse_setoption(&parts) {
                        if name.eq_ignore_ascii_case("MultiPV") {
                            multipv = value.parse().unwrap_or(1);
                        }
                    }
                }
                Some("go") => {
                    if countdown(&self.dying_searches) {
                        return;
                    }
                    if countdown(&self.hanging_searches) {
                        let _ = out.send("info string thinking hard".to_string());
                        searching = true;
                        continue;
                    }
                    self.answer(multipv, &out);
                }
                Some("stop") => {
                    if searching {
                        searching = false;
                        self.answer(multipv, &out);
                    }
                }
                Some("quit") => return,
                _ => {}
            }
        }
    }

    fn answer(&self, multipv: u32, out: &Sender<String>) {
        for info in &self.infos {
            if let EngineLine::Info(report) = parse_engine_line(info) {
                if report.multipv <= multipv {
                    let _ = out.send(info.clone());
                }
            }
        }
        let best = self.best.as_deref().unwrap_or("(none)");
        let _ = out.send(format!("bestmove {best}"));
    }
}

/// Split a `setoption name <name> value <value>` line into its parts.
fn parse_setoption(parts: &[&str]) -> Option<(String, Option<String>)> {
    if parts.first() != Some(&"setoption") {
        return None;
    }

    let mut name_parts: Vec<&str> = Vec::new();
    let mut value_parts: Vec<&str> = Vec::new();
    let mut in_value = None;

    for part in parts.iter().skip(1) {
        match *part {
            "name" if in_value.is_none() => in_value = Some(false),
            "value" if in_value == Some(false) => in_value = Some(true),
            _ => match in_value {
                Some(false) => name_parts.push(part),
                Some(true) => value_parts.push(part),
                None => {}
            },
        }
    }

    if name_parts.is_empty() {
        return None;
    }

    let value = (!value_parts.is_empty()).then(|| value_parts.join(" "));
    Some((name_parts.join(" "), value))
}

fn countdown(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl Launcher for FakeEngine {
    fn launch(&self) -> Result<EngineLink, EngineError> {
        if countdown(&self.failing_launches) {
            return Err(EngineError::EngineUnavailable {
                reason: "fake engine refused to start".to_string(),
            });
        }
        self.launches.fetch_add(1, Ordering::SeqCst);

        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let (line_tx, line_rx) = crossbeam_channel::unbounded();
        let engine = self.clone();
        thread::Builder::new()
            .name("fake-engine".to_string())
            .spawn(move || engine.run(command_rx, line_tx))
            .map_err(|e| EngineError::EngineUnavailable {
                reason: e.to_string(),
            })?;
        Ok(EngineLink::new(
            Box::new(FakeSink {
                tx: Some(command_tx),
            }),
            line_rx,
        ))
    }
}

struct FakeSink {
    tx: Option<Sender<String>>,
}

impl LineSink for FakeSink {
    fn send_line(&mut self, line: &str) -> io::Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "closed"))?;
        tx.send(line.to_string())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "fake engine exited"))
    }

    fn close(&mut self) {
        self.tx.take();
    }
}
