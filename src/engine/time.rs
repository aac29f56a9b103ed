//! Human-like thinking delay.

use std::time::Duration;

use rand::Rng;

use crate::config::SessionSettings;

/// Lower bound of the random factor; the upper bound is 1.0
const MIN_RANDOM_FACTOR: f64 = 0.5;

/// Delay to wait before delivering a move.
///
/// Weaker ratings think longer: the span above `base_ms` shrinks linearly
/// to nothing at `rating_ceiling`, and is scaled by a random factor in
/// `[0.5, 1.0]`. The result always lies in `[base_ms, max_ms]`; a `max_ms`
/// below `base_ms` is treated as equal to it.
pub fn compute_delay<R: Rng + ?Sized>(
    rating: u32,
    rating_ceiling: u32,
    base_ms: u64,
    max_ms: u64,
    rng: &mut R,
) -> Duration {
    let max_ms = max_ms.max(base_ms);
    let elo_factor = if rating_ceiling == 0 {
        0.0
    } else {
        1.0 - (f64::from(rating) / f64::from(rating_ceiling)).min(1.0)
    };
    let random_factor = rng.gen_range(MIN_RANDOM_FACTOR..=1.0);
    let span = (max_ms - base_ms) as f64;
    let extra = (span * elo_factor * random_factor).round() as u64;
    Duration::from_millis(base_ms.saturating_add(extra).clamp(base_ms, max_ms))
}

/// [`compute_delay`] with the bounds taken from session settings.
pub fn delay_for<R: Rng + ?Sized>(rating: u32, settings: &SessionSettings, rng: &mut R) -> Duration {
    compute_delay(
        rating,
        settings.rating_ceiling,
        settings.min_delay_ms,
        settings.max_delay_ms,
        rng,
    )
}
