pub mod config;
pub mod engine;
pub mod error;
pub mod rules;
pub mod sync;
pub mod types;
pub mod uci;

pub use config::{EngineConfig, EngineConfigPatch, SearchBudget, SessionSettings};
pub use engine::{Orchestrator, OrchestratorState, PendingCandidates, PendingMove};
pub use error::{EngineError, RulesError};
pub use rules::{GameStatus, RulesOracle};
pub use types::{CandidateMove, Evaluation, Move, ResolvedMove, Side};
