use std::collections::HashSet;

use crate::graph::ThoughtGraph;

use super::{fold_best, rank_best_first, FrontierDecision, SearchStrategy};

/// Expand the single highest-scoring unexpanded node across the whole tree.
///
/// The open set is global: nodes that lost one round stay eligible and are
/// re-admitted when the better branches dry up. Terminal nodes never enter
/// the open set; they are finished solution candidates, not expansion
/// targets.
pub struct BestFirstSearch {
    open: Vec<String>,
    expanded: HashSet<String>,
    best_id: Option<String>,
}

impl BestFirstSearch {
    pub fn new() -> Self {
        Self {
            open: Vec::new(),
            expanded: HashSet::new(),
            best_id: None,
        }
    }
}

impl Default for BestFirstSearch {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchStrategy for BestFirstSearch {
    fn name(&self) -> &'static str {
        "best_first_search"
    }

    fn update_frontier(
        &mut self,
        graph: &ThoughtGraph,
        evaluated_ids: &[String],
    ) -> FrontierDecision {
        self.best_id = fold_best(graph, self.best_id.take(), evaluated_ids);

        for id in evaluated_ids {
            let Some(node) = graph.get(id) else { continue };
            if !node.is_terminal && !self.expanded.contains(id) && !self.open.contains(id) {
                self.open.push(id.clone());
            }
        }

        let next = self
            .open
            .iter()
            .filter(|id| graph.get(id).is_some())
            .min_by(|a, b| {
                rank_best_first(graph.get(a).expect("filtered"), graph.get(b).expect("filtered"))
            })
            .cloned();

        let frontier = match next {
            Some(id) => {
                self.open.retain(|x| x != &id);
                self.expanded.insert(id.clone());
                vec![id]
            }
            None => Vec::new(),
        };

        FrontierDecision {
            frontier,
            best_id: self.best_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ValueScore;

    fn add_scored(graph: &mut ThoughtGraph, parent: &str, score: f64, terminal: bool) -> String {
        let id = graph
            .add_child(parent, format!("s={score}"), terminal)
            .unwrap();
        graph
            .write_scores(&id, ValueScore::new(score, score, 5.0), score)
            .unwrap();
        id
    }

    #[test]
    fn frontier_is_single_best_node() {
        let mut graph = ThoughtGraph::new();
        let root = graph.create_root("task");
        let a = add_scored(&mut graph, &root, 4.0, false);
        let b = add_scored(&mut graph, &root, 8.0, false);

        let mut strategy = BestFirstSearch::new();
        let decision = strategy.update_frontier(&graph, &[a.clone(), b.clone()]);
        assert_eq!(decision.frontier, vec![b.clone()]);
        assert_eq!(decision.best_id, Some(b));
    }

    #[test]
    fn pruned_nodes_are_readmitted_later() {
        let mut graph = ThoughtGraph::new();
        let root = graph.create_root("task");
        let weak = add_scored(&mut graph, &root, 4.0, false);
        let strong = add_scored(&mut graph, &root, 8.0, false);

        let mut strategy = BestFirstSearch::new();
        let first = strategy.update_frontier(&graph, &[weak.clone(), strong.clone()]);
        assert_eq!(first.frontier, vec![strong.clone()]);

        // The strong branch produced only a poor child; the previously
        // pruned sibling wins the next round.
        let poor_child = add_scored(&mut graph, &strong, 1.0, false);
        let second = strategy.update_frontier(&graph, std::slice::from_ref(&poor_child));
        assert_eq!(second.frontier, vec![weak]);
    }

    #[test]
    fn expanded_nodes_are_not_reselected() {
        let mut graph = ThoughtGraph::new();
        let root = graph.create_root("task");
        let only = add_scored(&mut graph, &root, 6.0, false);

        let mut strategy = BestFirstSearch::new();
        let first = strategy.update_frontier(&graph, std::slice::from_ref(&only));
        assert_eq!(first.frontier, vec![only]);

        let second = strategy.update_frontier(&graph, &[]);
        assert!(second.frontier.is_empty());
    }

    #[test]
    fn terminal_nodes_never_enter_the_open_set() {
        let mut graph = ThoughtGraph::new();
        let root = graph.create_root("task");
        let solution = add_scored(&mut graph, &root, 9.9, true);
        let ordinary = add_scored(&mut graph, &root, 2.0, false);

        let mut strategy = BestFirstSearch::new();
        let decision = strategy.update_frontier(&graph, &[solution.clone(), ordinary.clone()]);
        // The solution is still the best node, but never expanded.
        assert_eq!(decision.best_id, Some(solution));
        assert_eq!(decision.frontier, vec![ordinary]);
    }

    #[test]
    fn global_best_survives_weak_rounds() {
        let mut graph = ThoughtGraph::new();
        let root = graph.create_root("task");
        let strong = add_scored(&mut graph, &root, 9.0, false);

        let mut strategy = BestFirstSearch::new();
        strategy.update_frontier(&graph, std::slice::from_ref(&strong));

        let weak = add_scored(&mut graph, &strong, 2.0, false);
        let decision = strategy.update_frontier(&graph, std::slice::from_ref(&weak));
        assert_eq!(decision.best_id, Some(strong));
    }
}
