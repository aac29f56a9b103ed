//! Protocol session: one long-lived conversation with the search oracle.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{select, Receiver, RecvError, RecvTimeoutError};
use log::{debug, info, trace, warn};
use parking_lot::{Mutex, MutexGuard};

use crate::config::{EngineConfig, SearchBudget, SessionSettings};
use crate::error::EngineError;
use crate::sync::CancelToken;
use crate::types::Move;

use super::command::{EngineCommand, PositionSpec};
use super::options::{config_commands, AdvertisedOptions, MULTI_PV};
use super::report::{parse_engine_line, EngineLine, InfoReport};
use super::transport::{EngineLink, LineSink};

/// What the engine said about itself during the handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineIdentity {
    pub name: Option<String>,
    pub author: Option<String>,
    pub options: AdvertisedOptions,
}

/// Final answer of one search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOutcome {
    pub best: Move,
    pub ponder: Option<Move>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchEvent {
    Progress(InfoReport),
    Terminal(SearchOutcome),
}

/// Everything a finished search reported: the terminal move plus the
/// deepest report seen for each MultiPV rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchSummary {
    pub outcome: SearchOutcome,
    pub lines: BTreeMap<u32, InfoReport>,
}

impl SearchSummary {
    /// Report for the engine's chosen move, falling back to rank 1.
    #[must_use]
    pub fn best_line(&self) -> Option<&InfoReport> {
        self.lines
            .values()
            .find(|r| r.head() == Some(self.outcome.best))
            .or_else(|| self.lines.get(&1))
    }
}

/// Book-keeping that attributes terminal lines to searches.
///
/// `bestmove` carries no identifier, so every accepted search takes the
/// next id and terminals are matched to ids in the order they arrive.
#[derive(Debug, Default)]
struct SearchLedger {
    issued: u64,
    concluded: u64,
    live: Option<(u64, CancelToken)>,
    /// Newest stale id whose terminal outlived a drain; 0 when none
    overdue: u64,
}

impl SearchLedger {
    fn begin(&mut self) -> (u64, CancelToken) {
        self.issued += 1;
        let token = CancelToken::new();
        self.live = Some((self.issued, token.clone()));
        (self.issued, token)
    }

    /// Attribute a terminal line; returns its search id and whether the
    /// search is still waiting for it.
    fn conclude(&mut self) -> (u64, bool) {
        if self.concluded < self.issued {
            self.concluded += 1;
        }
        let id = self.concluded;
        if id >= self.overdue {
            self.overdue = 0;
        }
        let live = matches!(self.live, Some((live_id, _)) if live_id == id);
        if live {
            self.live = None;
        }
        (id, live)
    }

    fn abandon(&mut self, id: u64) -> Option<CancelToken> {
        match &self.live {
            Some((live_id, _)) if *live_id == id => self.live.take().map(|(_, token)| token),
            _ => None,
        }
    }

    fn owed(&self) -> u64 {
        self.issued - self.concluded
    }

    /// Take back an id whose `go` never reached the engine.
    fn retract(&mut self, id: u64) {
        self.abandon(id);
        if self.issued == id {
            self.issued -= 1;
        }
    }
}

/// Owns the connection to a search oracle and speaks its line protocol.
///
/// All methods take `&self`; the session is shared between the
/// orchestrator (configuration, cancellation) and its search worker. Only
/// one thread reads engine output at a time: a [`SearchStream`] holds the
/// reader for its whole lifetime.
pub struct ProtocolSession {
    sink: Mutex<Box<dyn LineSink>>,
    lines: Mutex<Receiver<String>>,
    settings: SessionSettings,
    handshake_done: AtomicBool,
    alive: AtomicBool,
    shut_down: AtomicBool,
    identity: Mutex<EngineIdentity>,
    ledger: Mutex<SearchLedger>,
}

impl ProtocolSession {
    #[must_use]
    pub fn new(link: EngineLink, settings: SessionSettings) -> Self {
        ProtocolSession {
            sink: Mutex::new(link.sink),
            lines: Mutex::new(link.lines),
            settings,
            handshake_done: AtomicBool::new(false),
            alive: AtomicBool::new(true),
            shut_down: AtomicBool::new(false),
            identity: Mutex::new(EngineIdentity::default()),
            ledger: Mutex::new(SearchLedger::default()),
        }
    }

    #[must_use]
    pub fn identity(&self) -> EngineIdentity {
        self.identity.lock().clone()
    }

    /// Handshake complete, connection alive and no search running.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.handshake_done.load(Ordering::Acquire)
            && self.alive.load(Ordering::Acquire)
            && self.ledger.lock().live.is_none()
    }

    /// Send `uci` and wait for `uciok`, recording identity and options.
    pub fn initialize(&self) -> Result<(), EngineError> {
        if self.handshake_done.load(Ordering::Acquire) {
            return Ok(());
        }
        self.write(&EngineCommand::Uci)?;

        let lines = self.lines.lock();
        let timeout = self.settings.handshake_timeout();
        let mut identity = EngineIdentity::default();
        let waited = self.wait_for(&lines, timeout, |line| match line {
            EngineLine::UciOk => true,
            EngineLine::Id { key, value } => {
                match key.as_str() {
                    "name" => identity.name = Some(value.clone()),
                    "author" => identity.author = Some(value.clone()),
                    _ => {}
                }
                false
            }
            EngineLine::OptionDecl { name } => {
                identity.options.record(name);
                false
            }
            _ => false,
        });

        match waited {
            Ok(()) => {
                info!(
                    "engine handshake complete: {} ({} options)",
                    identity.name.as_deref().unwrap_or("unnamed engine"),
                    identity.options.len()
                );
                *self.identity.lock() = identity;
                self.handshake_done.store(true, Ordering::Release);
                Ok(())
            }
            Err(EngineError::EngineTimeout { waited_ms }) => Err(EngineError::unavailable(
                format!("no handshake acknowledgement within {waited_ms} ms"),
            )),
            Err(e) => Err(e),
        }
    }

    /// Send the config's options in fixed order, then block until the
    /// engine reports ready.
    ///
    /// Terminals still owed by stopped searches are drained first so no
    /// option lands while the engine is searching.
    pub fn apply_config(&self, config: &EngineConfig) -> Result<(), EngineError> {
        self.require_handshake()?;
        let lines = self.lines.lock();
        self.drain_stale(&lines)?;
        let advertised = self.identity.lock().options.clone();
        for command in config_commands(config, &advertised) {
            self.send(&command)?;
        }
        self.sync_ready(&lines)
    }

    /// Tell the engine a new game starts and wait until it is ready.
    pub fn new_game(&self) -> Result<(), EngineError> {
        self.require_handshake()?;
        let lines = self.lines.lock();
        self.drain_stale(&lines)?;
        self.send(&EngineCommand::UciNewGame)?;
        self.sync_ready(&lines)
    }

    /// Start a search and return the stream of its events.
    ///
    /// The stream yields progress reports followed by exactly one terminal
    /// item: the engine's move, `NoLegalMove`, `EngineTimeout`,
    /// `Cancelled`, or `EngineUnavailable` if the engine went away.
    pub fn search(
        &self,
        position: &str,
        budget: SearchBudget,
        multipv: u32,
    ) -> Result<SearchStream<'_>, EngineError> {
        self.require_handshake()?;
        let lines = self.lines.lock();
        self.drain_stale(&lines)?;

        if self.identity.lock().options.supports(MULTI_PV) {
            self.send(&EngineCommand::set_option(MULTI_PV, multipv.max(1)))?;
        }
        self.send(&EngineCommand::Position(PositionSpec::parse(position)))?;

        let (id, token) = self.ledger.lock().begin();
        if let Err(e) = self.send(&EngineCommand::Go(budget)) {
            self.ledger.lock().retract(id);
            return Err(e);
        }
        let ceiling = self.settings.search_ceiling(budget);
        debug!("search #{id} started ({budget:?}, multipv {multipv})");

        Ok(SearchStream {
            session: self,
            lines,
            id,
            token,
            started: Instant::now(),
            ceiling,
            depths: BTreeMap::new(),
            finished: false,
        })
    }

    /// Stop the live search; its terminal will be discarded on arrival.
    pub fn cancel(&self) -> Result<(), EngineError> {
        let token = {
            let mut ledger = self.ledger.lock();
            let id = ledger.live.as_ref().map(|(id, _)| *id);
            id.and_then(|id| ledger.abandon(id))
        };
        if let Some(token) = token {
            token.cancel();
            debug!("search cancelled");
            self.send(&EngineCommand::Stop)?;
        }
        Ok(())
    }

    /// Send `quit` and release the connection. Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some((_, token)) = self.ledger.lock().live.take() {
            token.cancel();
        }
        if self.alive.load(Ordering::Acquire) {
            let _ = self.write(&EngineCommand::Quit);
        }
        self.alive.store(false, Ordering::Release);
        self.sink.lock().close();
        info!("engine session shut down");
    }

    fn require_handshake(&self) -> Result<(), EngineError> {
        if !self.alive.load(Ordering::Acquire) {
            return Err(EngineError::unavailable("engine connection closed"));
        }
        if !self.handshake_done.load(Ordering::Acquire) {
            return Err(EngineError::unavailable("handshake not complete"));
        }
        Ok(())
    }

    fn send(&self, command: &EngineCommand) -> Result<(), EngineError> {
        self.require_handshake()?;
        self.write(command)
    }

    fn write(&self, command: &EngineCommand) -> Result<(), EngineError> {
        if !self.alive.load(Ordering::Acquire) {
            return Err(EngineError::unavailable("engine connection closed"));
        }
        let line = command.to_string();
        debug!("> {line}");
        self.sink.lock().send_line(&line).map_err(|e| {
            warn!("engine write failed: {e}");
            self.alive.store(false, Ordering::Release);
            EngineError::unavailable(format!("engine write failed: {e}"))
        })
    }

    fn sync_ready(&self, lines: &Receiver<String>) -> Result<(), EngineError> {
        self.send(&EngineCommand::IsReady)?;
        self.wait_for(lines, self.settings.ready_timeout(), |line| {
            matches!(line, EngineLine::ReadyOk)
        })
    }

    /// Read lines until `done` accepts one. Stale terminals seen on the way
    /// are attributed and discarded.
    fn wait_for(
        &self,
        lines: &Receiver<String>,
        timeout: Duration,
        mut done: impl FnMut(&EngineLine) -> bool,
    ) -> Result<(), EngineError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match lines.recv_timeout(remaining) {
                Ok(raw) => {
                    trace!("< {raw}");
                    let line = parse_engine_line(&raw);
                    if let EngineLine::BestMove(_) = line {
                        self.discard_terminal();
                    }
                    if done(&line) {
                        return Ok(());
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    let waited_ms = timeout.as_millis() as u64;
                    warn!("engine silent for {waited_ms} ms");
                    return Err(EngineError::EngineTimeout { waited_ms });
                }
                Err(RecvTimeoutError::Disconnected) => return Err(self.lost()),
            }
        }
    }

    /// Wait briefly for terminals of stopped searches.
    ///
    /// A terminal that outlives the drain stays owed and is discarded
    /// whenever it arrives. A debt that outlives two drains means the
    /// engine ignores `stop`, and the session is given up.
    fn drain_stale(&self, lines: &Receiver<String>) -> Result<(), EngineError> {
        if self.ledger.lock().owed() == 0 {
            return Ok(());
        }
        let timeout = self.settings.stale_drain_timeout();
        let result = self.wait_for(lines, timeout, |_| self.ledger.lock().owed() == 0);
        match result {
            Err(EngineError::EngineTimeout { .. }) => {
                let mut ledger = self.ledger.lock();
                if ledger.overdue != 0 {
                    drop(ledger);
                    self.alive.store(false, Ordering::Release);
                    warn!("engine never answered stop");
                    return Err(EngineError::unavailable("engine never answered stop"));
                }
                ledger.overdue = ledger.issued;
                warn!("{} stale terminal(s) still owed; continuing", ledger.owed());
                Ok(())
            }
            other => other,
        }
    }

    fn discard_terminal(&self) {
        let (id, live) = self.ledger.lock().conclude();
        debug_assert!(!live, "terminal for a live search outside its stream");
        debug!("discarded terminal of stale search #{id}");
    }

    fn lost(&self) -> EngineError {
        self.alive.store(false, Ordering::Release);
        warn!("engine output closed unexpectedly");
        EngineError::unavailable("engine output closed")
    }
}

impl Drop for ProtocolSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Lazy, finite stream of one search's events.
///
/// Dropping the stream before its terminal item stops the search.
pub struct SearchStream<'a> {
    session: &'a ProtocolSession,
    lines: MutexGuard<'a, Receiver<String>>,
    id: u64,
    token: CancelToken,
    started: Instant,
    ceiling: Duration,
    depths: BTreeMap<u32, u32>,
    finished: bool,
}

impl SearchStream<'_> {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Consume the stream, keeping the deepest report per MultiPV rank.
    pub fn summarize(mut self) -> Result<SearchSummary, EngineError> {
        let mut lines = BTreeMap::new();
        for event in self.by_ref() {
            match event? {
                SearchEvent::Progress(report) => {
                    lines.insert(report.multipv, report);
                }
                SearchEvent::Terminal(outcome) => return Ok(SearchSummary { outcome, lines }),
            }
        }
        Err(EngineError::Cancelled)
    }

    fn finish(
        &mut self,
        item: Result<SearchEvent, EngineError>,
    ) -> Option<Result<SearchEvent, EngineError>> {
        self.finished = true;
        Some(item)
    }

    fn on_line(&mut self, raw: &str) -> Option<Result<SearchEvent, EngineError>> {
        match parse_engine_line(raw) {
            EngineLine::Info(report) => {
                let last = self.depths.entry(report.multipv).or_insert(0);
                if report.depth < *last {
                    trace!("dropping out-of-order report at depth {}", report.depth);
                    return None;
                }
                *last = report.depth;
                Some(Ok(SearchEvent::Progress(report)))
            }
            EngineLine::BestMove(best) => {
                let (id, live) = self.session.ledger.lock().conclude();
                if id != self.id || !live {
                    debug!("discarded terminal of stale search #{id}");
                    return None;
                }
                debug!("search #{id} concluded after {:?}", self.started.elapsed());
                let item = match best.mv {
                    Some(mv) => Ok(SearchEvent::Terminal(SearchOutcome {
                        best: mv,
                        ponder: best.ponder,
                    })),
                    None => Err(EngineError::NoLegalMove),
                };
                self.finish(item)
            }
            _ => {
                trace!("ignored: {raw}");
                None
            }
        }
    }

    fn time_out(&mut self) -> Option<Result<SearchEvent, EngineError>> {
        let waited_ms = self.ceiling.as_millis() as u64;
        warn!("search #{} produced no terminal within {waited_ms} ms", self.id);
        self.session.ledger.lock().abandon(self.id);
        let _ = self.session.send(&EngineCommand::Stop);
        self.finish(Err(EngineError::EngineTimeout { waited_ms }))
    }
}

impl Iterator for SearchStream<'_> {
    type Item = Result<SearchEvent, EngineError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            if self.token.is_cancelled() {
                return self.finish(Err(EngineError::Cancelled));
            }
            let remaining = self.ceiling.saturating_sub(self.started.elapsed());
            let wake = {
                let lines: &Receiver<String> = &self.lines;
                let cancel = self.token.receiver();
                select! {
                    recv(lines) -> msg => Wake::Line(msg),
                    recv(cancel) -> _ => Wake::Cancelled,
                    default(remaining) => Wake::Deadline,
                }
            };
            match wake {
                Wake::Line(Ok(raw)) => {
                    if let Some(item) = self.on_line(&raw) {
                        return Some(item);
                    }
                }
                Wake::Line(Err(_)) => {
                    let err = self.session.lost();
                    return self.finish(Err(err));
                }
                // re-checked at the top of the loop
                Wake::Cancelled => {}
                Wake::Deadline => return self.time_out(),
            }
        }
        None
    }
}

enum Wake {
    Line(Result<String, RecvError>),
    Cancelled,
    Deadline,
}

impl Drop for SearchStream<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if self.session.ledger.lock().abandon(self.id).is_some() {
            debug!("search #{} dropped before its terminal; stopping", self.id);
            let _ = self.session.send(&EngineCommand::Stop);
        }
    }
}
