//! The sparring partner built on top of the protocol session.
//!
//! [`Orchestrator`] drives a search per request and passes the result
//! through the skill model, the annotator and the timing simulator.

pub mod annotate;
mod controller;
pub mod skill;
pub mod time;

pub use annotate::{
    classify, classify_absolute, Classification, HintAnnotation, HintQuality, LogEntry,
};
pub use controller::{Orchestrator, OrchestratorState, Pending, PendingCandidates, PendingMove};
pub use skill::{rating_to_skill_level, select_move, should_substitute, MistakeTier, Selection};
pub use time::compute_delay;
