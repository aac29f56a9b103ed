//! Orchestrator: the sparring partner's lifecycle and request handling.
//!
//! Search work runs on a named worker thread. Every transition happens
//! under one mutex, so a request is resolved by exactly one of its worker
//! or a cancellation, never both.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::{debug, info, warn};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::{EngineConfig, EngineConfigPatch, SessionSettings};
use crate::engine::annotate::log_entry;
use crate::engine::skill::select_move;
use crate::engine::time::delay_for;
use crate::error::{EngineError, RulesError};
use crate::rules::RulesOracle;
use crate::sync::CancelToken;
use crate::types::{CandidateMove, Evaluation, Move, ResolvedMove, Side};
use crate::uci::command::PositionSpec;
use crate::uci::report::InfoReport;
use crate::uci::session::{EngineIdentity, ProtocolSession, SearchSummary};
use crate::uci::transport::Launcher;

const WORKER_NAME: &str = "sparring-search";

/// Lifecycle of an [`Orchestrator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrchestratorState {
    Uninitialized,
    Initializing,
    Ready,
    Searching,
    ShuttingDown,
    Terminated,
}

impl OrchestratorState {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            OrchestratorState::Uninitialized => "uninitialized",
            OrchestratorState::Initializing => "initializing",
            OrchestratorState::Ready => "ready",
            OrchestratorState::Searching => "searching",
            OrchestratorState::ShuttingDown => "shutting down",
            OrchestratorState::Terminated => "terminated",
        }
    }
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Deferred result of a request.
///
/// The result is delivered once; after it has been taken, further waits
/// report `Terminated`.
#[derive(Debug)]
pub struct Pending<T> {
    rx: Receiver<Result<T, EngineError>>,
}

pub type PendingMove = Pending<ResolvedMove>;
pub type PendingCandidates = Pending<Vec<CandidateMove>>;

impl<T> Pending<T> {
    fn resolved(result: Result<T, EngineError>) -> Self {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let _ = tx.send(result);
        Pending { rx }
    }

    /// Block until the request resolves.
    pub fn wait(self) -> Result<T, EngineError> {
        self.rx.recv().unwrap_or(Err(EngineError::Terminated))
    }

    /// Block for at most `timeout`; `None` if still unresolved.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T, EngineError>> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(EngineError::Terminated)),
        }
    }

    /// Non-blocking poll.
    pub fn try_result(&self) -> Option<Result<T, EngineError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(EngineError::Terminated)),
        }
    }
}

/// The request currently owned by a worker.
struct Job {
    generation: u64,
    token: CancelToken,
    /// Resolves the caller's handle with an error
    reject: Box<dyn FnOnce(EngineError) + Send>,
    reapplies_config: bool,
}

struct Shared {
    state: OrchestratorState,
    config: EngineConfig,
    /// Config changed while it could not be sent; apply before the next search
    config_dirty: bool,
    generation: u64,
    job: Option<Job>,
    session: Option<Arc<ProtocolSession>>,
    worker: Option<JoinHandle<()>>,
}

impl Shared {
    /// Forget a dead session; the caller shuts it down outside the lock.
    fn lose_session(&mut self) -> Option<Arc<ProtocolSession>> {
        warn!("engine lost; re-initialize to continue");
        self.state = OrchestratorState::Uninitialized;
        self.session.take()
    }
}

/// What a worker needs besides the session.
struct JobContext {
    config: EngineConfig,
    settings: SessionSettings,
    token: CancelToken,
    rng: Arc<Mutex<StdRng>>,
}

/// Turns a UCI engine into a configurable sparring partner.
pub struct Orchestrator {
    launcher: Box<dyn Launcher>,
    settings: SessionSettings,
    shared: Arc<Mutex<Shared>>,
    rng: Arc<Mutex<StdRng>>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(launcher: Box<dyn Launcher>, config: EngineConfig, settings: SessionSettings) -> Self {
        Self::with_rng(launcher, config, settings, StdRng::from_entropy())
    }

    /// Orchestrator whose substitution and timing draws are reproducible.
    #[must_use]
    pub fn with_seed(
        launcher: Box<dyn Launcher>,
        config: EngineConfig,
        settings: SessionSettings,
        seed: u64,
    ) -> Self {
        Self::with_rng(launcher, config, settings, StdRng::seed_from_u64(seed))
    }

    #[must_use]
    pub fn with_rng(
        launcher: Box<dyn Launcher>,
        config: EngineConfig,
        settings: SessionSettings,
        rng: StdRng,
    ) -> Self {
        Orchestrator {
            launcher,
            settings,
            shared: Arc::new(Mutex::new(Shared {
                state: OrchestratorState::Uninitialized,
                config,
                config_dirty: false,
                generation: 0,
                job: None,
                session: None,
                worker: None,
            })),
            rng: Arc::new(Mutex::new(rng)),
        }
    }

    #[must_use]
    pub fn state(&self) -> OrchestratorState {
        self.shared.lock().state
    }

    /// Copy of the current configuration.
    #[must_use]
    pub fn config(&self) -> EngineConfig {
        self.shared.lock().config.clone()
    }

    #[must_use]
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// What the engine reported during the handshake, once initialized.
    #[must_use]
    pub fn identity(&self) -> Option<EngineIdentity> {
        self.shared.lock().session.as_ref().map(|s| s.identity())
    }

    /// Start the engine, handshake and apply the current config.
    ///
    /// On failure the orchestrator returns to `Uninitialized` and may be
    /// initialized again.
    pub fn initialize(&self) -> Result<(), EngineError> {
        {
            let mut shared = self.shared.lock();
            match shared.state {
                OrchestratorState::Uninitialized => shared.state = OrchestratorState::Initializing,
                OrchestratorState::Ready => return Ok(()),
                OrchestratorState::ShuttingDown | OrchestratorState::Terminated => {
                    return Err(EngineError::Terminated)
                }
                state => {
                    return Err(EngineError::InvalidState {
                        operation: "initialize",
                        state: state.name(),
                    })
                }
            }
        }
        debug!("state: uninitialized -> initializing");

        let started = self.start_session();
        let mut shared = self.shared.lock();
        if shared.state != OrchestratorState::Initializing {
            // disposed while the handshake was running
            if let Ok(session) = started {
                drop(shared);
                session.shutdown();
            }
            return Err(EngineError::Terminated);
        }
        match started {
            Ok(session) => {
                shared.session = Some(session);
                shared.state = OrchestratorState::Ready;
                info!("orchestrator ready");
                Ok(())
            }
            Err(e) => {
                shared.state = OrchestratorState::Uninitialized;
                warn!("engine initialization failed: {e}");
                Err(e)
            }
        }
    }

    fn start_session(&self) -> Result<Arc<ProtocolSession>, EngineError> {
        let link = self.launcher.launch()?;
        let session = Arc::new(ProtocolSession::new(link, self.settings.clone()));
        session.initialize()?;

        let config = {
            let mut shared = self.shared.lock();
            shared.config_dirty = false;
            shared.config.clone()
        };
        match session.apply_config(&config) {
            Ok(()) => Ok(session),
            Err(e) => {
                session.shutdown();
                Err(match e {
                    EngineError::EngineTimeout { waited_ms } => EngineError::unavailable(format!(
                        "engine not ready {waited_ms} ms after configuration"
                    )),
                    other => other,
                })
            }
        }
    }

    /// Search `position` and deliver a strength-limited, annotated move
    /// after a human-like delay.
    ///
    /// `position` is `startpos` or a FEN, optionally followed by
    /// `moves ...`. The delivered move is always one of `legal_moves`.
    pub fn request_move(&self, position: &str, legal_moves: &[Move]) -> Result<PendingMove, EngineError> {
        self.check_can_search("request_move")?;
        if legal_moves.is_empty() {
            return Err(EngineError::NoLegalMove);
        }
        let spec = parse_position(position)?;
        let legal = legal_moves.to_vec();
        let position = position.to_string();
        self.launch("request_move", move |session, ctx| {
            resolve_move(session, ctx, &position, &spec, &legal)
        })
    }

    /// [`Orchestrator::request_move`] for a FEN, with the legal moves taken
    /// from the rules oracle.
    pub fn request_move_with<R: RulesOracle + ?Sized>(
        &self,
        rules: &mut R,
        fen: &str,
    ) -> Result<PendingMove, EngineError> {
        self.check_can_search("request_move")?;
        rules.import_position(fen)?;
        let legal = rules.legal_moves();
        self.request_move(&format!("fen {}", fen.trim()), &legal)
    }

    /// Up to `count` of the engine's top lines for `position`, best first.
    ///
    /// Ranks the engine never reported are absent from the result.
    pub fn request_candidates(
        &self,
        position: &str,
        count: usize,
    ) -> Result<PendingCandidates, EngineError> {
        self.check_can_search("request_candidates")?;
        if count == 0 {
            return Ok(Pending::resolved(Ok(Vec::new())));
        }
        parse_position(position)?;
        let position = position.to_string();
        self.launch("request_candidates", move |session, ctx| {
            let width = u32::try_from(count).unwrap_or(u32::MAX);
            let summary = run_search(session, ctx, &position, width)?;
            Ok(summary
                .lines
                .values()
                .filter_map(InfoReport::to_candidate)
                .take(count)
                .collect())
        })
    }

    /// Merge a patch into the config.
    ///
    /// In `Ready` the result is sent to the engine at once; during a
    /// search it is held back and applied before the next request. The
    /// engine exchange runs without holding the orchestrator lock.
    pub fn update_config(&self, patch: &EngineConfigPatch) -> Result<EngineConfig, EngineError> {
        let mut shared = self.shared.lock();
        let next = shared.config.merged(patch);
        let session = match shared.state {
            OrchestratorState::ShuttingDown | OrchestratorState::Terminated => {
                return Err(EngineError::Terminated)
            }
            OrchestratorState::Ready => {
                shared.config = next.clone();
                // stays dirty until the engine confirms it
                shared.config_dirty = true;
                match shared.session.clone() {
                    Some(session) => session,
                    None => return Ok(next),
                }
            }
            OrchestratorState::Searching | OrchestratorState::Initializing => {
                shared.config = next.clone();
                shared.config_dirty = true;
                debug!("config deferred until the next request");
                return Ok(next);
            }
            OrchestratorState::Uninitialized => {
                // sent with the handshake
                shared.config = next.clone();
                return Ok(next);
            }
        };
        drop(shared);

        let applied = session.apply_config(&next);

        let mut shared = self.shared.lock();
        let current = shared
            .session
            .as_ref()
            .is_some_and(|s| Arc::ptr_eq(s, &session));
        match applied {
            Ok(()) => {
                if shared.config == next {
                    shared.config_dirty = false;
                }
                debug!("config applied: {next:?}");
                Ok(next)
            }
            Err(e) => {
                if e.is_fatal() && current && shared.state == OrchestratorState::Ready {
                    shared.lose_session();
                    drop(shared);
                    session.shutdown();
                }
                Err(e)
            }
        }
    }

    /// Abandon the running request; its handle resolves to `Cancelled`.
    pub fn cancel_current(&self) -> Result<(), EngineError> {
        let mut shared = self.shared.lock();
        match shared.state {
            OrchestratorState::Searching => {}
            OrchestratorState::ShuttingDown | OrchestratorState::Terminated => {
                return Err(EngineError::Terminated)
            }
            _ => return Err(EngineError::NotSearching),
        }
        shared.generation += 1;
        shared.state = OrchestratorState::Ready;
        if let Some(job) = shared.job.take() {
            if job.reapplies_config {
                shared.config_dirty = true;
            }
            job.token.cancel();
            (job.reject)(EngineError::Cancelled);
            debug!("request #{} cancelled", job.generation);
        }
        if let Some(session) = shared.session.clone() {
            if let Err(e) = session.cancel() {
                warn!("stop not delivered: {e}");
            }
        }
        debug!("state: searching -> ready");
        Ok(())
    }

    /// Tell the engine a new game starts.
    pub fn new_game(&self) -> Result<(), EngineError> {
        let session = {
            let shared = self.shared.lock();
            match (shared.state, &shared.session) {
                (OrchestratorState::Ready, Some(session)) => Arc::clone(session),
                (OrchestratorState::Searching, _) => return Err(EngineError::RequestInFlight),
                (OrchestratorState::ShuttingDown | OrchestratorState::Terminated, _) => {
                    return Err(EngineError::Terminated)
                }
                (state, _) => {
                    return Err(EngineError::InvalidState {
                        operation: "new_game",
                        state: state.name(),
                    })
                }
            }
        };
        session.new_game()
    }

    /// Cancel anything running, shut the engine down and end in
    /// `Terminated`. Idempotent.
    pub fn dispose(&self) {
        let (session, worker) = {
            let mut shared = self.shared.lock();
            if matches!(
                shared.state,
                OrchestratorState::ShuttingDown | OrchestratorState::Terminated
            ) {
                return;
            }
            debug!("state: {} -> shutting down", shared.state);
            shared.state = OrchestratorState::ShuttingDown;
            shared.generation += 1;
            if let Some(job) = shared.job.take() {
                job.token.cancel();
                (job.reject)(EngineError::Terminated);
            }
            (shared.session.take(), shared.worker.take())
        };

        if let Some(session) = session {
            session.shutdown();
        }
        if let Some(worker) = worker {
            if worker.join().is_err() {
                warn!("search worker panicked");
            }
        }
        self.shared.lock().state = OrchestratorState::Terminated;
        info!("orchestrator terminated");
    }

    fn check_can_search(&self, operation: &'static str) -> Result<(), EngineError> {
        match self.shared.lock().state {
            OrchestratorState::Ready => Ok(()),
            OrchestratorState::Searching => Err(EngineError::RequestInFlight),
            OrchestratorState::ShuttingDown | OrchestratorState::Terminated => {
                Err(EngineError::Terminated)
            }
            state => Err(EngineError::InvalidState {
                operation,
                state: state.name(),
            }),
        }
    }

    /// Hand `work` to a worker thread and move to `Searching`.
    fn launch<T, F>(&self, operation: &'static str, work: F) -> Result<Pending<T>, EngineError>
    where
        T: Send + 'static,
        F: FnOnce(&ProtocolSession, &JobContext) -> Result<T, EngineError> + Send + 'static,
    {
        let mut shared = self.shared.lock();
        match shared.state {
            OrchestratorState::Ready => {}
            OrchestratorState::Searching => return Err(EngineError::RequestInFlight),
            OrchestratorState::ShuttingDown | OrchestratorState::Terminated => {
                return Err(EngineError::Terminated)
            }
            state => {
                return Err(EngineError::InvalidState {
                    operation,
                    state: state.name(),
                })
            }
        }
        let session = shared
            .session
            .clone()
            .ok_or_else(|| EngineError::unavailable("no engine session"))?;

        shared.generation += 1;
        let generation = shared.generation;
        let reapplies_config = std::mem::take(&mut shared.config_dirty);
        let ctx = JobContext {
            config: shared.config.clone(),
            settings: self.settings.clone(),
            token: CancelToken::new(),
            rng: Arc::clone(&self.rng),
        };

        let (tx, rx) = crossbeam_channel::bounded(1);
        let reject_tx: Sender<Result<T, EngineError>> = tx.clone();
        let job = Job {
            generation,
            token: ctx.token.clone(),
            reject: Box::new(move |err: EngineError| {
                let _ = reject_tx.try_send(Err(err));
            }),
            reapplies_config,
        };

        let shared_for_worker = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(WORKER_NAME.to_string())
            .spawn(move || {
                let result = if ctx.token.is_cancelled() {
                    Err(EngineError::Cancelled)
                } else if reapplies_config {
                    session
                        .apply_config(&ctx.config)
                        .and_then(|()| work(session.as_ref(), &ctx))
                } else {
                    work(session.as_ref(), &ctx)
                };
                finish(&shared_for_worker, generation, result, &tx);
            });

        match spawned {
            Ok(handle) => {
                // a cancelled predecessor winds down on its own
                shared.worker = Some(handle);
                shared.job = Some(job);
                shared.state = OrchestratorState::Searching;
                debug!("{operation} #{generation}: state: ready -> searching");
                Ok(Pending { rx })
            }
            Err(e) => {
                shared.config_dirty |= reapplies_config;
                Err(EngineError::unavailable(format!("search worker: {e}")))
            }
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Deliver a worker's result unless the request was cancelled or
/// superseded meanwhile.
fn finish<T>(
    shared: &Mutex<Shared>,
    generation: u64,
    result: Result<T, EngineError>,
    tx: &Sender<Result<T, EngineError>>,
) {
    let mut guard = shared.lock();
    if guard.generation != generation || guard.state != OrchestratorState::Searching {
        match &result {
            Err(e) if e.is_cancellation() => debug!("request #{generation} wound down"),
            _ => debug!("discarded result of abandoned request #{generation}"),
        }
        return;
    }

    let job = guard.job.take();
    guard.state = OrchestratorState::Ready;
    let mut lost = None;
    if let Err(e) = &result {
        if job.as_ref().is_some_and(|j| j.reapplies_config) {
            guard.config_dirty = true;
        }
        if e.is_fatal() {
            warn!("request #{generation} failed: {e}");
            lost = guard.lose_session();
        } else if !e.is_cancellation() {
            warn!("request #{generation} failed: {e}");
        }
    }
    debug!("request #{generation} done; state: searching -> {}", guard.state);
    let _ = tx.try_send(result);
    drop(guard);

    if let Some(session) = lost {
        session.shutdown();
    }
}

/// Run one search to its terminal, honouring the job's cancellation.
fn run_search(
    session: &ProtocolSession,
    ctx: &JobContext,
    position: &str,
    width: u32,
) -> Result<SearchSummary, EngineError> {
    if ctx.token.is_cancelled() {
        return Err(EngineError::Cancelled);
    }
    let stream = session.search(position, ctx.config.budget(), width)?;
    // a cancel that landed before the search was registered
    if ctx.token.is_cancelled() {
        return Err(EngineError::Cancelled);
    }
    stream.summarize()
}

fn resolve_move(
    session: &ProtocolSession,
    ctx: &JobContext,
    position: &str,
    spec: &PositionSpec,
    legal: &[Move],
) -> Result<ResolvedMove, EngineError> {
    let summary = run_search(session, ctx, position, ctx.settings.ranking_width)?;
    let ranked: Vec<Move> = summary.lines.values().filter_map(InfoReport::head).collect();

    let mut best = summary.outcome.best;
    if !legal.contains(&best) {
        let fallback = ranked
            .iter()
            .copied()
            .find(|m| legal.contains(m))
            .or_else(|| legal.first().copied())
            .ok_or(EngineError::NoLegalMove)?;
        warn!("engine move {best} is not legal here; using {fallback}");
        best = fallback;
    }

    let selection = select_move(
        &ctx.config,
        &ctx.settings,
        best,
        legal,
        &ranked,
        &mut *ctx.rng.lock(),
    );
    if selection.substituted {
        debug!("playing {} instead of {best}", selection.mv);
    }

    let evaluation = evaluate_choice(&summary, selection.mv);
    let before = summary
        .best_line()
        .map_or(Evaluation::Centipawns(0), |line| line.score);

    let (move_number, side) = move_context(spec);
    let (before, after) = match side {
        Side::White => (before, evaluation.evaluation),
        Side::Black => (before.flipped(), evaluation.evaluation.flipped()),
    };
    let annotation = log_entry(
        move_number,
        side,
        selection.mv,
        before,
        after,
        side == Side::White,
    );

    let delay = delay_for(ctx.config.strength_rating, &ctx.settings, &mut *ctx.rng.lock());
    if ctx.token.wait_timeout(delay) {
        return Err(EngineError::Cancelled);
    }

    Ok(ResolvedMove {
        mv: selection.mv,
        evaluation,
        was_deliberately_suboptimal: selection.substituted,
        annotation,
        delay_ms: delay.as_millis() as u64,
    })
}

/// The engine's line for `mv`; a move outside the ranking is bounded by
/// the worst ranked line.
fn evaluate_choice(summary: &SearchSummary, mv: Move) -> CandidateMove {
    if let Some(candidate) = summary
        .lines
        .values()
        .find(|line| line.head() == Some(mv))
        .and_then(InfoReport::to_candidate)
    {
        return candidate;
    }
    let unranked = u32::try_from(summary.lines.len()).unwrap_or(u32::MAX - 1) + 1;
    match summary.lines.values().next_back() {
        Some(worst) => CandidateMove {
            mv,
            evaluation: worst.score,
            search_depth: worst.depth,
            variation_rank: unranked,
        },
        None => CandidateMove {
            mv,
            evaluation: Evaluation::Centipawns(0),
            search_depth: 0,
            variation_rank: unranked,
        },
    }
}

/// Reject position text the engine could not make sense of.
fn parse_position(position: &str) -> Result<PositionSpec, EngineError> {
    if position.trim().is_empty() {
        return Err(RulesError::InvalidPosition {
            input: position.to_string(),
            reason: "empty position".to_string(),
        }
        .into());
    }
    let spec = PositionSpec::parse(position);
    let moves = match &spec {
        PositionSpec::StartPos { moves } => moves,
        PositionSpec::Fen { fen, moves } => {
            if fen.split_whitespace().count() < 2 || Side::from_fen(fen).is_none() {
                return Err(RulesError::InvalidPosition {
                    input: fen.clone(),
                    reason: "expected piece placement and side to move".to_string(),
                }
                .into());
            }
            moves
        }
    };
    for text in moves {
        text.parse::<Move>()?;
    }
    Ok(spec)
}

/// Full-move number and side of the move about to be played.
fn move_context(spec: &PositionSpec) -> (u32, Side) {
    let (mut number, mut side, plies) = match spec {
        PositionSpec::StartPos { moves } => (1, Side::White, moves.len()),
        PositionSpec::Fen { fen, moves } => {
            let number = fen
                .split_whitespace()
                .nth(5)
                .and_then(|n| n.parse::<u32>().ok())
                .unwrap_or(1)
                .max(1);
            (number, Side::from_fen(fen).unwrap_or(Side::White), moves.len())
        }
    };
    for _ in 0..plies {
        if side == Side::Black {
            number += 1;
        }
        side = side.opponent();
    }
    (number, side)
}
