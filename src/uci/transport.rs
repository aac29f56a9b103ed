//! Line-oriented connection to the search oracle.
//!
//! The session only ever sees an [`EngineLink`]: a sink for command lines
//! and a channel of output lines. [`ProcessLauncher`] provides one backed
//! by a child process; tests provide in-process engines.

use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use log::{debug, warn};

use crate::error::EngineError;

/// Grace period for the engine to exit after `quit` before it is killed
const EXIT_GRACE_POLLS: u32 = 10;
const EXIT_POLL_INTERVAL_MS: u64 = 20;

/// Write side of the connection.
pub trait LineSink: Send {
    /// Write one command line (newline appended by the sink).
    fn send_line(&mut self, line: &str) -> io::Result<()>;

    /// Release the underlying resource. Must be idempotent.
    fn close(&mut self);
}

/// An established connection to a search oracle.
pub struct EngineLink {
    pub sink: Box<dyn LineSink>,
    pub lines: Receiver<String>,
}

impl EngineLink {
    #[must_use]
    pub fn new(sink: Box<dyn LineSink>, lines: Receiver<String>) -> Self {
        EngineLink { sink, lines }
    }
}

/// Starts a search oracle. Called once per `initialize`.
pub trait Launcher: Send + Sync {
    fn launch(&self) -> Result<EngineLink, EngineError>;
}

/// Launches a UCI engine executable with piped stdio.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessLauncher {
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        ProcessLauncher {
            program: program.into(),
            args: Vec::new(),
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

impl Launcher for ProcessLauncher {
    fn launch(&self) -> Result<EngineLink, EngineError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                EngineError::unavailable(format!(
                    "failed to start {}: {e}",
                    self.program.display()
                ))
            })?;

        let stdin = child.stdin.take();
        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            return Err(EngineError::unavailable("engine stdout not captured"));
        };

        let (tx, rx) = crossbeam_channel::unbounded();
        let spawned = thread::Builder::new()
            .name("engine-stdout".to_string())
            .spawn(move || forward_lines(BufReader::new(stdout), &tx));
        if let Err(e) = spawned {
            let _ = child.kill();
            return Err(EngineError::unavailable(format!("reader thread: {e}")));
        }

        debug!("started engine {} (pid {})", self.program.display(), child.id());
        Ok(EngineLink::new(Box::new(ChildSink { stdin, child }), rx))
    }
}

fn forward_lines(reader: impl BufRead, tx: &Sender<String>) {
    for line in reader.lines() {
        match line {
            Ok(line) => {
                if tx.send(line).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("engine output unreadable: {e}");
                break;
            }
        }
    }
    debug!("engine output closed");
}

struct ChildSink {
    stdin: Option<ChildStdin>,
    child: Child,
}

impl LineSink for ChildSink {
    fn send_line(&mut self, line: &str) -> io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "engine stdin closed"))?;
        stdin.write_all(line.as_bytes())?;
        stdin.write_all(b"\n")?;
        stdin.flush()
    }

    fn close(&mut self) {
        if self.stdin.take().is_none() {
            return;
        }
        for _ in 0..EXIT_GRACE_POLLS {
            if let Ok(Some(status)) = self.child.try_wait() {
                debug!("engine exited with {status}");
                return;
            }
            thread::sleep(Duration::from_millis(EXIT_POLL_INTERVAL_MS));
        }
        warn!("engine did not exit after quit; killing pid {}", self.child.id());
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for ChildSink {
    fn drop(&mut self) {
        self.close();
    }
}
