//! Core value types shared by the protocol session and the orchestrator.

use std::fmt;
use std::str::FromStr;

use crate::engine::annotate::LogEntry;
use crate::error::RulesError;

/// Score assigned to a forced mate before the distance is subtracted.
///
/// Larger than any centipawn value a real engine reports, so mates always
/// land in the extreme classification tiers.
pub const MATE_VALUE: i32 = 100_000;

/// Side to move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Side {
    White,
    Black,
}

impl Side {
    #[must_use]
    pub fn opponent(self) -> Side {
        match self {
            Side::White => Side::Black,
            Side::Black => Side::White,
        }
    }

    /// Side to move field of a FEN string, if present and valid.
    #[must_use]
    pub fn from_fen(fen: &str) -> Option<Side> {
        match fen.split_whitespace().nth(1)? {
            "w" => Some(Side::White),
            "b" => Some(Side::Black),
            _ => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::White => write!(f, "white"),
            Side::Black => write!(f, "black"),
        }
    }
}

/// A board square, `a1` = (0, 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Square {
    file: u8,
    rank: u8,
}

impl Square {
    #[must_use]
    pub fn file(self) -> u8 {
        self.file
    }

    #[must_use]
    pub fn rank(self) -> u8 {
        self.rank
    }

    fn parse(text: &str) -> Option<Square> {
        let bytes = text.as_bytes();
        if bytes.len() != 2 {
            return None;
        }
        let file = bytes[0].checked_sub(b'a').filter(|f| *f < 8)?;
        let rank = bytes[1].checked_sub(b'1').filter(|r| *r < 8)?;
        Some(Square { file, rank })
    }
}

impl fmt::Display for Square {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", (b'a' + self.file) as char, (b'1' + self.rank) as char)
    }
}

/// A move in coordinate notation (`e2e4`, `e7e8q`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Move {
    pub from: Square,
    pub to: Square,
    pub promotion: Option<char>,
}

impl FromStr for Move {
    type Err = RulesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        let invalid = |reason: &str| RulesError::InvalidMoveText {
            input: text.to_string(),
            reason: reason.to_string(),
        };

        if !text.is_ascii() || !(4..=5).contains(&text.len()) {
            return Err(invalid("must be 4-5 ASCII characters"));
        }
        let from = Square::parse(&text[0..2]).ok_or_else(|| invalid("bad origin square"))?;
        let to = Square::parse(&text[2..4]).ok_or_else(|| invalid("bad target square"))?;
        let promotion = match text[4..].chars().next() {
            None => None,
            Some(c @ ('q' | 'r' | 'b' | 'n')) => Some(c),
            Some(_) => return Err(invalid("bad promotion piece")),
        };
        if from == to {
            return Err(invalid("origin equals target"));
        }
        Ok(Move {
            from,
            to,
            promotion,
        })
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.from, self.to)?;
        if let Some(p) = self.promotion {
            write!(f, "{p}")?;
        }
        Ok(())
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Move {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Move {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Engine evaluation, always from the side-to-move's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Evaluation {
    Centipawns(i32),
    /// Signed distance to mate in moves; `Mate(0)` means the side to move is mated
    Mate(i32),
}

impl Evaluation {
    /// Single comparable scale: mates map to `±(MATE_VALUE - distance)`.
    #[must_use]
    pub fn normalized(self) -> i32 {
        match self {
            Evaluation::Centipawns(cp) => cp.clamp(-(MATE_VALUE - 1_000), MATE_VALUE - 1_000),
            Evaluation::Mate(n) if n > 0 => MATE_VALUE - n.min(999),
            Evaluation::Mate(n) => -(MATE_VALUE - n.saturating_neg().min(999)),
        }
    }

    /// The same evaluation seen from the other side.
    #[must_use]
    pub fn flipped(self) -> Evaluation {
        match self {
            Evaluation::Centipawns(cp) => Evaluation::Centipawns(cp.saturating_neg()),
            Evaluation::Mate(n) => Evaluation::Mate(n.saturating_neg()),
        }
    }

    #[must_use]
    pub fn is_mate(self) -> bool {
        matches!(self, Evaluation::Mate(_))
    }
}

impl fmt::Display for Evaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Evaluation::Centipawns(cp) => write!(f, "{:+.2}", f64::from(*cp) / 100.0),
            Evaluation::Mate(n) if *n >= 0 => write!(f, "#{n}"),
            Evaluation::Mate(n) => write!(f, "#-{}", n.unsigned_abs()),
        }
    }
}

/// One ranked line reported by the search oracle.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CandidateMove {
    pub mv: Move,
    pub evaluation: Evaluation,
    pub search_depth: u32,
    /// 1 = the oracle's top line
    pub variation_rank: u32,
}

/// The move finally delivered for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMove {
    pub mv: Move,
    /// Oracle evaluation of the delivered move's line (or the closest bound)
    pub evaluation: CandidateMove,
    pub was_deliberately_suboptimal: bool,
    pub annotation: LogEntry,
    /// Simulated thinking time that preceded delivery
    pub delay_ms: u64,
}
