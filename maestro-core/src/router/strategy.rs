//! Provider selection strategies

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::MaestroError;
use crate::llm::retry::jitter_unit;

/// Provider selection strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    /// Sample healthy providers proportionally to their weights
    #[default]
    Weighted,
    /// Rotate through healthy providers in configured order
    RoundRobin,
    /// Try providers in configured priority, falling through on error
    Failover,
}

impl FromStr for RoutingStrategy {
    type Err = MaestroError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "weighted" => Ok(RoutingStrategy::Weighted),
            "round_robin" => Ok(RoutingStrategy::RoundRobin),
            "failover" => Ok(RoutingStrategy::Failover),
            other => Err(MaestroError::Configuration(format!(
                "unknown routing strategy '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RoutingStrategy::Weighted => "weighted",
            RoutingStrategy::RoundRobin => "round_robin",
            RoutingStrategy::Failover => "failover",
        };
        write!(f, "{}", name)
    }
}

/// Pick an entry from `(index, weight)` candidates proportionally to weight.
///
/// All-zero weights degrade to a uniform pick. Returns `None` when the
/// candidate list is empty.
pub(crate) fn pick_weighted(candidates: &[(usize, f64)]) -> Option<usize> {
    if candidates.is_empty() {
        return None;
    }

    let total: f64 = candidates.iter().map(|(_, w)| w.max(0.0)).sum();
    if total <= 0.0 {
        let uniform = (jitter_unit() * candidates.len() as f64) as usize;
        return candidates.get(uniform.min(candidates.len() - 1)).map(|(i, _)| *i);
    }

    let mut target = jitter_unit() * total;
    for (index, weight) in candidates {
        target -= weight.max(0.0);
        if target <= 0.0 {
            return Some(*index);
        }
    }

    candidates.last().map(|(i, _)| *i)
}

/// Pick the next entry from `candidates` in rotation.
pub(crate) fn pick_round_robin(candidates: &[usize], cursor: &AtomicUsize) -> Option<usize> {
    if candidates.is_empty() {
        return None;
    }
    let position = cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();
    Some(candidates[position])
}
