//! Contract for the external rules authority.
//!
//! The orchestrator never implements chess rules. It consults a
//! [`RulesOracle`] once per request, before the search is issued, to learn
//! which moves are legal in the position being searched.

use crate::error::RulesError;
use crate::types::Move;

/// Game state reported by the rules oracle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameStatus {
    Ongoing,
    Checkmate,
    Stalemate,
    ThreefoldRepetition,
    InsufficientMaterial,
}

impl GameStatus {
    #[must_use]
    pub fn is_over(self) -> bool {
        self != GameStatus::Ongoing
    }
}

/// Synchronous, single-threaded authority on legality and game state.
///
/// Import operations must report malformed input through [`RulesError`]
/// rather than panicking.
pub trait RulesOracle {
    /// Replace the current game with the position encoded as FEN.
    fn import_position(&mut self, fen: &str) -> Result<(), RulesError>;

    /// FEN of the current position.
    fn export_position(&self) -> String;

    /// Replay a move list (PGN movetext or space-separated coordinates)
    /// from the starting position.
    fn import_moves(&mut self, text: &str) -> Result<(), RulesError>;

    /// Move list of the current game.
    fn export_moves(&self) -> String;

    /// Every legal move in the current position.
    fn legal_moves(&self) -> Vec<Move>;

    /// Play a move; illegal moves fail with `InvalidMoveText`.
    fn make_move(&mut self, mv: Move) -> Result<(), RulesError>;

    /// Take back the last move, returning it.
    fn undo_move(&mut self) -> Option<Move>;

    fn is_check(&self) -> bool;

    fn status(&self) -> GameStatus;

    fn is_game_over(&self) -> bool {
        self.status().is_over()
    }

    fn is_checkmate(&self) -> bool {
        self.status() == GameStatus::Checkmate
    }

    fn is_stalemate(&self) -> bool {
        self.status() == GameStatus::Stalemate
    }

    fn is_threefold_repetition(&self) -> bool {
        self.status() == GameStatus::ThreefoldRepetition
    }

    fn is_insufficient_material(&self) -> bool {
        self.status() == GameStatus::InsufficientMaterial
    }
}
