//! Engine strength configuration and session settings.

use std::time::Duration;

use crate::engine::skill::rating_to_skill_level;

/// Time budget used when neither a time nor a node budget is configured
pub const DEFAULT_TIME_BUDGET_MS: u64 = 1_000;

/// Highest UCI `Skill Level`
pub const MAX_SKILL_LEVEL: u8 = 20;

/// Per-request strength knobs, owned by the caller and copied in.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EngineConfig {
    pub strength_rating: u32,
    /// UCI `Skill Level`, 0..=20
    pub search_skill_level: u8,
    pub contempt: i32,
    pub move_overhead_ms: u32,
    pub node_budget: u64,
    /// Takes precedence over `node_budget` when non-zero
    pub time_budget_ms: u64,
    /// Percentage 0..=100; 100 always plays the oracle's best move
    pub accuracy: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let strength_rating = 1500;
        EngineConfig {
            strength_rating,
            search_skill_level: rating_to_skill_level(strength_rating),
            contempt: 0,
            move_overhead_ms: 30,
            node_budget: 0,
            time_budget_ms: DEFAULT_TIME_BUDGET_MS,
            accuracy: 85.0,
        }
    }
}

impl EngineConfig {
    /// Config for a rating with the matching skill level.
    #[must_use]
    pub fn for_rating(rating: u32) -> Self {
        EngineConfig {
            strength_rating: rating,
            search_skill_level: rating_to_skill_level(rating),
            ..EngineConfig::default()
        }
    }

    /// The single authoritative search budget for the next request.
    #[must_use]
    pub fn budget(&self) -> SearchBudget {
        if self.time_budget_ms > 0 {
            SearchBudget::MoveTime(self.time_budget_ms)
        } else if self.node_budget > 0 {
            SearchBudget::Nodes(self.node_budget)
        } else {
            SearchBudget::MoveTime(DEFAULT_TIME_BUDGET_MS)
        }
    }

    /// Snapshot-merge a patch into a copy of this config.
    #[must_use]
    pub fn merged(&self, patch: &EngineConfigPatch) -> EngineConfig {
        let mut next = self.clone();
        if let Some(rating) = patch.strength_rating {
            next.strength_rating = rating;
            if patch.search_skill_level.is_none() {
                next.search_skill_level = rating_to_skill_level(rating);
            }
        }
        if let Some(level) = patch.search_skill_level {
            next.search_skill_level = level.min(MAX_SKILL_LEVEL);
        }
        if let Some(contempt) = patch.contempt {
            next.contempt = contempt;
        }
        if let Some(overhead) = patch.move_overhead_ms {
            next.move_overhead_ms = overhead;
        }
        if let Some(nodes) = patch.node_budget {
            next.node_budget = nodes;
        }
        if let Some(time) = patch.time_budget_ms {
            next.time_budget_ms = time;
        }
        if let Some(accuracy) = patch.accuracy {
            next.accuracy = if accuracy.is_nan() {
                next.accuracy
            } else {
                accuracy.clamp(0.0, 100.0)
            };
        }
        next
    }
}

/// Partial update for [`EngineConfig`]; `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct EngineConfigPatch {
    pub strength_rating: Option<u32>,
    pub search_skill_level: Option<u8>,
    pub contempt: Option<i32>,
    pub move_overhead_ms: Option<u32>,
    pub node_budget: Option<u64>,
    pub time_budget_ms: Option<u64>,
    pub accuracy: Option<f64>,
}

impl EngineConfigPatch {
    #[must_use]
    pub fn rating(rating: u32) -> Self {
        EngineConfigPatch {
            strength_rating: Some(rating),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn accuracy(accuracy: f64) -> Self {
        EngineConfigPatch {
            accuracy: Some(accuracy),
            ..Self::default()
        }
    }
}

/// How long the oracle may search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchBudget {
    /// `go movetime <ms>`
    MoveTime(u64),
    /// `go nodes <n>`
    Nodes(u64),
}

/// Session-wide tuning that does not change per request.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SessionSettings {
    /// Wait for `uciok`
    pub handshake_timeout_ms: u64,
    /// Wait for `readyok`
    pub ready_timeout_ms: u64,
    /// Extra time granted beyond a move-time budget before a search times out
    pub search_timeout_margin_ms: u64,
    /// Ceiling for node-budget searches, which have no natural duration
    pub node_search_timeout_ms: u64,
    /// Wait for a stale terminal left by a cancelled or timed-out search
    pub stale_drain_timeout_ms: u64,
    /// MultiPV width used by `request_move` to rank substitutes
    pub ranking_width: u32,
    /// Rating at which play-the-best probability and thinking time saturate
    pub rating_ceiling: u32,
    /// From this rating on, substitutes come from the top 3 lines
    pub small_mistake_rating: u32,
    /// From this rating on, substitutes come from the top 5 lines
    pub medium_mistake_rating: u32,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionSettings {
            handshake_timeout_ms: 5_000,
            ready_timeout_ms: 5_000,
            search_timeout_margin_ms: 5_000,
            node_search_timeout_ms: 30_000,
            stale_drain_timeout_ms: 2_000,
            ranking_width: 6,
            rating_ceiling: 2500,
            small_mistake_rating: 2000,
            medium_mistake_rating: 1400,
            min_delay_ms: 300,
            max_delay_ms: 2_500,
        }
    }
}

impl SessionSettings {
    /// Settings with every wait collapsed, for tests and analysis tools.
    #[must_use]
    pub fn instant() -> Self {
        SessionSettings {
            min_delay_ms: 0,
            max_delay_ms: 0,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    #[must_use]
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    #[must_use]
    pub fn stale_drain_timeout(&self) -> Duration {
        Duration::from_millis(self.stale_drain_timeout_ms)
    }

    /// Deadline for a terminal event after `go` was sent.
    #[must_use]
    pub fn search_ceiling(&self, budget: SearchBudget) -> Duration {
        match budget {
            SearchBudget::MoveTime(ms) => {
                Duration::from_millis(ms.saturating_add(self.search_timeout_margin_ms))
            }
            SearchBudget::Nodes(_) => Duration::from_millis(self.node_search_timeout_ms),
        }
    }
}
