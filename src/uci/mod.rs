//! Client side of the Universal Chess Interface (UCI).
//!
//! Commands are rendered by [`command`], engine output is parsed by
//! [`report`], and [`session::ProtocolSession`] ties both to a
//! [`transport::EngineLink`].

pub mod command;
pub mod options;
pub mod report;
pub mod session;
pub mod transport;

pub use command::{EngineCommand, PositionSpec};
pub use report::{parse_engine_line, BestMove, EngineLine, InfoReport, ScoreBound};
pub use session::{
    EngineIdentity, ProtocolSession, SearchEvent, SearchOutcome, SearchStream, SearchSummary,
};
pub use transport::{EngineLink, Launcher, LineSink, ProcessLauncher};
