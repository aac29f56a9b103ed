//! Parsing of the search oracle's output lines.
//!
//! Anything that does not match the expected grammar becomes
//! [`EngineLine::Ignored`]; engines are free to be chattier than we are.

use crate::types::{CandidateMove, Evaluation, Move};

/// Whether a reported score is exact or only a search-window bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScoreBound {
    #[default]
    Exact,
    Lower,
    Upper,
}

/// A parsed `info` line carrying depth, score and principal variation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoReport {
    pub depth: u32,
    pub seldepth: Option<u32>,
    /// 1-based MultiPV rank; 1 when the engine omits it
    pub multipv: u32,
    pub score: Evaluation,
    pub bound: ScoreBound,
    pub nodes: Option<u64>,
    pub nps: Option<u64>,
    pub time_ms: Option<u64>,
    pub pv: Vec<Move>,
}

impl InfoReport {
    /// First move of the principal variation.
    #[must_use]
    pub fn head(&self) -> Option<Move> {
        self.pv.first().copied()
    }

    #[must_use]
    pub fn to_candidate(&self) -> Option<CandidateMove> {
        Some(CandidateMove {
            mv: self.head()?,
            evaluation: self.score,
            search_depth: self.depth,
            variation_rank: self.multipv,
        })
    }
}

/// A parsed `bestmove` line; `mv` is `None` for `(none)` / `0000`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BestMove {
    pub mv: Option<Move>,
    pub ponder: Option<Move>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineLine {
    UciOk,
    ReadyOk,
    Id { key: String, value: String },
    OptionDecl { name: String },
    Info(InfoReport),
    BestMove(BestMove),
    Ignored,
}

#[must_use]
pub fn parse_engine_line(line: &str) -> EngineLine {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let Some(&keyword) = parts.first() else {
        return EngineLine::Ignored;
    };

    match keyword {
        "uciok" => EngineLine::UciOk,
        "readyok" => EngineLine::ReadyOk,
        "id" if parts.len() >= 3 => EngineLine::Id {
            key: parts[1].to_string(),
            value: parts[2..].join(" "),
        },
        "option" => parse_option(&parts).map_or(EngineLine::Ignored, |name| {
            EngineLine::OptionDecl { name }
        }),
        "info" => parse_info(&parts).map_or(EngineLine::Ignored, EngineLine::Info),
        "bestmove" => parse_bestmove(&parts).map_or(EngineLine::Ignored, EngineLine::BestMove),
        _ => EngineLine::Ignored,
    }
}

fn parse_option(parts: &[&str]) -> Option<String> {
    if parts.get(1) != Some(&"name") {
        return None;
    }
    let name: Vec<&str> = parts[2..].iter().take_while(|p| **p != "type").copied().collect();
    if name.is_empty() {
        None
    } else {
        Some(name.join(" "))
    }
}

fn parse_bestmove(parts: &[&str]) -> Option<BestMove> {
    let text = *parts.get(1)?;
    let mv = match text {
        "(none)" | "0000" | "none" => None,
        _ => Some(text.parse::<Move>().ok()?),
    };
    let ponder = match parts.get(2) {
        Some(&"ponder") => parts.get(3).and_then(|p| p.parse::<Move>().ok()),
        _ => None,
    };
    Some(BestMove { mv, ponder })
}

fn parse_info(parts: &[&str]) -> Option<InfoReport> {
    let mut depth = None;
    let mut seldepth = None;
    let mut multipv = 1;
    let mut score = None;
    let mut bound = ScoreBound::Exact;
    let mut nodes = None;
    let mut nps = None;
    let mut time_ms = None;
    let mut pv = Vec::new();

    let mut i = 1;
    while i < parts.len() {
        let next = parts.get(i + 1).copied();
        match parts[i] {
            "depth" => {
                depth = next.and_then(|v| v.parse().ok());
                i += 2;
            }
            "seldepth" => {
                seldepth = next.and_then(|v| v.parse().ok());
                i += 2;
            }
            "multipv" => {
                multipv = next.and_then(|v| v.parse().ok()).unwrap_or(1).max(1);
                i += 2;
            }
            "nodes" => {
                nodes = next.and_then(|v| v.parse().ok());
                i += 2;
            }
            "nps" => {
                nps = next.and_then(|v| v.parse().ok());
                i += 2;
            }
            "time" => {
                time_ms = next.and_then(|v| v.parse().ok());
                i += 2;
            }
            "score" => {
                let value = parts.get(i + 2).and_then(|v| v.parse::<i32>().ok());
                score = match (next, value) {
                    (Some("cp"), Some(cp)) => Some(Evaluation::Centipawns(cp)),
                    (Some("mate"), Some(n)) => Some(Evaluation::Mate(n)),
                    _ => None,
                };
                i += 3;
                match parts.get(i) {
                    Some(&"lowerbound") => {
                        bound = ScoreBound::Lower;
                        i += 1;
                    }
                    Some(&"upperbound") => {
                        bound = ScoreBound::Upper;
                        i += 1;
                    }
                    _ => {}
                }
            }
            "pv" => {
                pv = parts[i + 1..]
                    .iter()
                    .map_while(|m| m.parse::<Move>().ok())
                    .collect();
                break;
            }
            // free text runs to end of line
            "string" => return None,
            _ => i += 1,
        }
    }

    if pv.is_empty() {
        return None;
    }
    Some(InfoReport {
        depth: depth?,
        seldepth,
        multipv,
        score: score?,
        bound,
        nodes,
        nps,
        time_ms,
        pv,
    })
}
