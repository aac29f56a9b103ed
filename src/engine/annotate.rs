//! Move-quality classification from evaluation changes.

use std::fmt;

use crate::types::{Evaluation, Move, Side};

/// Below this depth an absolute hint is marked provisional
pub const PROVISIONAL_DEPTH: u32 = 10;

/// Quality of a played move, best tier first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Classification {
    Brilliant,
    Excellent,
    Good,
    Move,
    Inaccuracy,
    Mistake,
    Blunder,
}

impl Classification {
    /// Tier for a mover-relative change in evaluation (centipawns).
    #[must_use]
    pub fn from_delta(delta: i32) -> Self {
        match delta {
            d if d > 200 => Classification::Brilliant,
            d if d > 100 => Classification::Excellent,
            d if d > 0 => Classification::Good,
            d if d > -50 => Classification::Move,
            d if d > -100 => Classification::Inaccuracy,
            d if d > -200 => Classification::Mistake,
            _ => Classification::Blunder,
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Classification::Brilliant => "brilliant",
            Classification::Excellent => "excellent",
            Classification::Good => "good",
            Classification::Move => "move",
            Classification::Inaccuracy => "inaccuracy",
            Classification::Mistake => "mistake",
            Classification::Blunder => "blunder",
        }
    }

    #[must_use]
    pub fn explanation(self) -> &'static str {
        match self {
            Classification::Brilliant => "A brilliant move that transforms the position.",
            Classification::Excellent => "An excellent move that clearly improves the position.",
            Classification::Good => "A good move that improves the position.",
            Classification::Move => "A reasonable move that keeps the balance.",
            Classification::Inaccuracy => "An inaccuracy; a better move was available.",
            Classification::Mistake => "A mistake that gives away a noticeable advantage.",
            Classification::Blunder => "A blunder that seriously damages the position.",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Change in evaluation across a move, from the mover's side.
///
/// Evaluations are on a shared scale (e.g. White's point of view);
/// `mover_is_maximizing` says whether the mover wants that scale to rise.
#[must_use]
pub fn evaluation_delta(before: Evaluation, after: Evaluation, mover_is_maximizing: bool) -> i32 {
    let (before, after) = (before.normalized(), after.normalized());
    if mover_is_maximizing {
        after - before
    } else {
        before - after
    }
}

#[must_use]
pub fn classify(before: Evaluation, after: Evaluation, mover_is_maximizing: bool) -> Classification {
    Classification::from_delta(evaluation_delta(before, after, mover_is_maximizing))
}

/// Coarse quality of a hinted move, judged only by its own evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum HintQuality {
    Best,
    Good,
    Questionable,
    Blunder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HintAnnotation {
    pub quality: HintQuality,
    pub depth: u32,
    /// The search was too shallow to trust the bucket
    pub provisional: bool,
}

/// Bucket a mover-relative evaluation without a baseline.
#[must_use]
pub fn classify_absolute(evaluation: Evaluation, depth: u32) -> HintAnnotation {
    let quality = match evaluation.normalized() {
        e if e > 100 => HintQuality::Best,
        e if e >= 0 => HintQuality::Good,
        e if e > -100 => HintQuality::Questionable,
        _ => HintQuality::Blunder,
    };
    HintAnnotation {
        quality,
        depth,
        provisional: depth < PROVISIONAL_DEPTH,
    }
}

/// One line of the move log shown next to the board.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct LogEntry {
    pub move_number: u32,
    pub side: Side,
    pub mv: Move,
    pub classification: Classification,
    /// Evaluation after the move, on the caller's scale
    pub evaluation: Evaluation,
    pub explanation: &'static str,
}

#[must_use]
pub fn log_entry(
    move_number: u32,
    side: Side,
    mv: Move,
    before: Evaluation,
    after: Evaluation,
    mover_is_maximizing: bool,
) -> LogEntry {
    let classification = classify(before, after, mover_is_maximizing);
    LogEntry {
        move_number,
        side,
        mv,
        classification,
        evaluation: after,
        explanation: classification.explanation(),
    }
}
