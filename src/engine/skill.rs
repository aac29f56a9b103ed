//! Strength limiting: rating to skill level, and deliberate substitution
//! of the oracle's best move.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::config::{EngineConfig, SessionSettings};
use crate::types::Move;

/// Lowest rating of each skill-level band, ascending.
const SKILL_BANDS: [(u32, u8); 20] = [
    (800, 1),
    (900, 2),
    (1000, 3),
    (1100, 4),
    (1200, 5),
    (1300, 6),
    (1400, 7),
    (1500, 8),
    (1600, 9),
    (1700, 10),
    (1800, 11),
    (1900, 12),
    (2000, 13),
    (2100, 14),
    (2200, 15),
    (2300, 16),
    (2400, 17),
    (2500, 18),
    (2600, 19),
    (2700, 20),
];

const SMALL_MISTAKE_POOL: usize = 3;
const MEDIUM_MISTAKE_POOL: usize = 5;

/// Map a rating to the oracle's 0..=20 skill level.
#[must_use]
pub fn rating_to_skill_level(rating: u32) -> u8 {
    SKILL_BANDS
        .iter()
        .rev()
        .find(|(floor, _)| rating >= *floor)
        .map_or(0, |(_, level)| *level)
}

/// Probability of playing the oracle's literal best move.
#[must_use]
pub fn play_best_probability(config: &EngineConfig, rating_ceiling: u32) -> f64 {
    if config.accuracy >= 100.0 {
        return 1.0;
    }
    let accuracy = (config.accuracy / 100.0).clamp(0.0, 1.0);
    let strength = if rating_ceiling == 0 {
        1.0
    } else {
        (f64::from(config.strength_rating) / f64::from(rating_ceiling)).min(1.0)
    };
    accuracy * strength
}

/// Draw once; `true` means play something other than the best move.
pub fn should_substitute<R: Rng + ?Sized>(
    config: &EngineConfig,
    rating_ceiling: u32,
    rng: &mut R,
) -> bool {
    if config.accuracy >= 100.0 {
        return false;
    }
    let draw: f64 = rng.gen();
    draw > play_best_probability(config, rating_ceiling)
}

/// How far from the top of the ranking a substitute may come.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MistakeTier {
    /// One of the moves nearest the top of the ranking
    Near(usize),
    /// Any remaining legal move
    Unconstrained,
}

impl MistakeTier {
    #[must_use]
    pub fn for_rating(rating: u32, settings: &SessionSettings) -> Self {
        if rating >= settings.small_mistake_rating {
            MistakeTier::Near(SMALL_MISTAKE_POOL)
        } else if rating >= settings.medium_mistake_rating {
            MistakeTier::Near(MEDIUM_MISTAKE_POOL)
        } else {
            MistakeTier::Unconstrained
        }
    }
}

/// Pick a legal move other than `best`.
///
/// `ranked` is the oracle's ranking, best first. A `Near(n)` tier draws
/// from the first `n` ranked alternatives, topped up from `legal` in order
/// when the ranking is shorter than `n`. Returns `best` when it is the only
/// legal move.
pub fn choose_substitute<R: Rng + ?Sized>(
    best: Move,
    legal: &[Move],
    ranked: &[Move],
    tier: MistakeTier,
    rng: &mut R,
) -> Move {
    let remaining: Vec<Move> = legal.iter().copied().filter(|m| *m != best).collect();
    if remaining.is_empty() {
        return best;
    }

    let pool = match tier {
        MistakeTier::Unconstrained => remaining,
        MistakeTier::Near(width) => {
            let mut pool: Vec<Move> = Vec::with_capacity(width);
            let nearest = ranked
                .iter()
                .chain(remaining.iter())
                .filter(|m| **m != best && remaining.contains(m));
            for mv in nearest {
                if pool.len() == width {
                    break;
                }
                if !pool.contains(mv) {
                    pool.push(*mv);
                }
            }
            pool
        }
    };

    pool.choose(rng).copied().unwrap_or(best)
}

/// Outcome of one move selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub mv: Move,
    pub substituted: bool,
}

/// Decide which move to deliver for one search.
pub fn select_move<R: Rng + ?Sized>(
    config: &EngineConfig,
    settings: &SessionSettings,
    best: Move,
    legal: &[Move],
    ranked: &[Move],
    rng: &mut R,
) -> Selection {
    if !should_substitute(config, settings.rating_ceiling, rng) {
        return Selection {
            mv: best,
            substituted: false,
        };
    }
    let tier = MistakeTier::for_rating(config.strength_rating, settings);
    let mv = choose_substitute(best, legal, ranked, tier, rng);
    Selection {
        mv,
        substituted: mv != best,
    }
}
