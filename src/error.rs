//! Error types for the sparring engine.

use std::fmt;
use std::io;

/// Error type for rules-oracle input failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RulesError {
    /// The position encoding could not be imported
    InvalidPosition { input: String, reason: String },
    /// A move or move list could not be parsed or is illegal
    InvalidMoveText { input: String, reason: String },
}

impl fmt::Display for RulesError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RulesError::InvalidPosition { input, reason } => {
                write!(f, "Invalid position '{input}': {reason}")
            }
            RulesError::InvalidMoveText { input, reason } => {
                write!(f, "Invalid move text '{input}': {reason}")
            }
        }
    }
}

impl std::error::Error for RulesError {}

/// Every failure surfaced by the protocol session and the orchestrator.
///
/// Callers offer a retry on
/// [`EngineError::EngineTimeout`], disable input on
/// [`EngineError::EngineUnavailable`], and treat
/// [`EngineError::Cancelled`] as an ordinary outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The oracle failed to start, died, or never acknowledged the handshake
    EngineUnavailable { reason: String },
    /// No acknowledgement or terminal event arrived in time
    EngineTimeout { waited_ms: u64 },
    /// A search is already outstanding
    RequestInFlight,
    /// Cancellation requested while no search is outstanding
    NotSearching,
    /// The oracle (or the caller's legal-move list) reports no legal move
    NoLegalMove,
    /// Bad position encoding from the caller or a collaborator
    InvalidPosition { input: String, reason: String },
    /// Bad move text from the caller or a collaborator
    InvalidMoveText { input: String, reason: String },
    /// The request was abandoned by an explicit cancellation
    Cancelled,
    /// The orchestrator has been disposed
    Terminated,
    /// The operation is not valid in the current lifecycle state
    InvalidState { operation: &'static str, state: &'static str },
}

impl EngineError {
    /// Timeouts are recovered locally and may simply be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::EngineTimeout { .. })
    }

    /// The session cannot be used again without re-initializing.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::EngineUnavailable { .. } | EngineError::Terminated
        )
    }

    /// Cancellation is an expected outcome, not a failure.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, EngineError::Cancelled)
    }

    pub(crate) fn unavailable(reason: impl Into<String>) -> Self {
        EngineError::EngineUnavailable {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::EngineUnavailable { reason } => {
                write!(f, "Engine unavailable: {reason}")
            }
            EngineError::EngineTimeout { waited_ms } => {
                write!(f, "Engine did not respond within {waited_ms} ms")
            }
            EngineError::RequestInFlight => write!(f, "A move request is already in flight"),
            EngineError::NotSearching => write!(f, "No search is in progress"),
            EngineError::NoLegalMove => write!(f, "No legal move available"),
            EngineError::InvalidPosition { input, reason } => {
                write!(f, "Invalid position '{input}': {reason}")
            }
            EngineError::InvalidMoveText { input, reason } => {
                write!(f, "Invalid move text '{input}': {reason}")
            }
            EngineError::Cancelled => write!(f, "Request cancelled"),
            EngineError::Terminated => write!(f, "Engine session terminated"),
            EngineError::InvalidState { operation, state } => {
                write!(f, "Cannot {operation} while {state}")
            }
        }
    }
}

impl std::error::Error for EngineError {}

impl From<RulesError> for EngineError {
    fn from(e: RulesError) -> Self {
        match e {
            RulesError::InvalidPosition { input, reason } => {
                EngineError::InvalidPosition { input, reason }
            }
            RulesError::InvalidMoveText { input, reason } => {
                EngineError::InvalidMoveText { input, reason }
            }
        }
    }
}

impl From<io::Error> for EngineError {
    fn from(e: io::Error) -> Self {
        EngineError::unavailable(e.to_string())
    }
}
