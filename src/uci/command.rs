use std::fmt;

use crate::config::SearchBudget;

/// Position to search, as sent with `position`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PositionSpec {
    StartPos { moves: Vec<String> },
    Fen { fen: String, moves: Vec<String> },
}

impl PositionSpec {
    /// `startpos` or a FEN string, optionally followed by `moves ...`.
    #[must_use]
    pub fn parse(encoding: &str) -> Self {
        let trimmed = encoding.trim();
        let (base, moves) = match trimmed.split_once(" moves ") {
            Some((base, moves)) => (base.trim(), split_moves(moves)),
            None => (trimmed, Vec::new()),
        };
        if base == "startpos" {
            PositionSpec::StartPos { moves }
        } else {
            let fen = base.strip_prefix("fen ").unwrap_or(base).trim().to_string();
            PositionSpec::Fen { fen, moves }
        }
    }
}

fn split_moves(text: &str) -> Vec<String> {
    text.split_whitespace().map(str::to_string).collect()
}

/// Commands the orchestrator sends to the search oracle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    Uci,
    IsReady,
    UciNewGame,
    SetOption { name: String, value: String },
    Position(PositionSpec),
    Go(SearchBudget),
    Stop,
    Quit,
}

impl EngineCommand {
    #[must_use]
    pub fn set_option(name: &str, value: impl fmt::Display) -> Self {
        EngineCommand::SetOption {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

impl fmt::Display for EngineCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineCommand::Uci => write!(f, "uci"),
            EngineCommand::IsReady => write!(f, "isready"),
            EngineCommand::UciNewGame => write!(f, "ucinewgame"),
            EngineCommand::SetOption { name, value } => {
                write!(f, "setoption name {name} value {value}")
            }
            EngineCommand::Position(spec) => {
                let moves = match spec {
                    PositionSpec::StartPos { moves } => {
                        write!(f, "position startpos")?;
                        moves
                    }
                    PositionSpec::Fen { fen, moves } => {
                        write!(f, "position fen {fen}")?;
                        moves
                    }
                };
                if !moves.is_empty() {
                    write!(f, " moves {}", moves.join(" "))?;
                }
                Ok(())
            }
            EngineCommand::Go(SearchBudget::MoveTime(ms)) => write!(f, "go movetime {ms}"),
            EngineCommand::Go(SearchBudget::Nodes(nodes)) => write!(f, "go nodes {nodes}"),
            EngineCommand::Stop => write!(f, "stop"),
            EngineCommand::Quit => write!(f, "quit"),
        }
    }
}
