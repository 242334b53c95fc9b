//! Pluggable frontier policies.
//!
//! A strategy sees the graph read-only after every evaluation round and
//! decides which nodes stay live. Selection happens strictly after scores
//! are written; strategies never mutate nodes. Extension = a new variant in
//! [`crate::types::StrategyKind`] plus an arm in [`for_config`].

mod beam;
mod best_first;

pub use beam::BeamSearch;
pub use best_first::BestFirstSearch;

use crate::graph::{ThoughtGraph, ThoughtNode};
use crate::types::{RunConfig, StrategyKind};

/// Frontier update outcome for one selection round.
#[derive(Debug, Clone, Default)]
pub struct FrontierDecision {
    /// Ids eligible for the next expansion, best first.
    pub frontier: Vec<String>,
    /// Argmax over every node evaluated so far, tie-broken like the
    /// frontier ordering.
    pub best_id: Option<String>,
}

/// A frontier policy.
pub trait SearchStrategy: Send {
    fn name(&self) -> &'static str;

    /// Fold this round's evaluated nodes into the policy state and produce
    /// the next frontier.
    fn update_frontier(&mut self, graph: &ThoughtGraph, evaluated_ids: &[String])
        -> FrontierDecision;
}

/// Build the strategy selected by the config.
pub fn for_config(config: &RunConfig) -> Box<dyn SearchStrategy> {
    match config.strategy {
        StrategyKind::BeamSearch => Box::new(BeamSearch::new(config.beam_width)),
        StrategyKind::BestFirstSearch => Box::new(BestFirstSearch::new()),
    }
}

/// Best-first ordering: score desc, then confidence desc, then depth asc,
/// then id asc. Total, so sorts are deterministic.
pub(crate) fn rank_best_first(a: &ThoughtNode, b: &ThoughtNode) -> std::cmp::Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.confidence().total_cmp(&a.confidence()))
        .then_with(|| a.depth.cmp(&b.depth))
        .then_with(|| a.id.cmp(&b.id))
}

/// Track the argmax across rounds under the shared ordering.
pub(crate) fn fold_best(
    graph: &ThoughtGraph,
    current: Option<String>,
    candidates: &[String],
) -> Option<String> {
    let mut best = current;
    for id in candidates {
        let Some(node) = graph.get(id) else { continue };
        best = match best {
            None => Some(id.clone()),
            Some(prev) => {
                let prev_node = graph.get(&prev);
                match prev_node {
                    Some(p) if rank_best_first(p, node) != std::cmp::Ordering::Greater => {
                        Some(prev)
                    }
                    _ => Some(id.clone()),
                }
            }
        };
    }
    best
}
