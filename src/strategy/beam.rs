use crate::graph::ThoughtGraph;

use super::{fold_best, rank_best_first, FrontierDecision, SearchStrategy};

/// Keep the top `beam_width` nodes of each evaluation round.
pub struct BeamSearch {
    beam_width: usize,
    best_id: Option<String>,
}

impl BeamSearch {
    pub fn new(beam_width: usize) -> Self {
        Self {
            beam_width,
            best_id: None,
        }
    }
}

impl SearchStrategy for BeamSearch {
    fn name(&self) -> &'static str {
        "beam_search"
    }

    fn update_frontier(
        &mut self,
        graph: &ThoughtGraph,
        evaluated_ids: &[String],
    ) -> FrontierDecision {
        self.best_id = fold_best(graph, self.best_id.take(), evaluated_ids);

        let mut ranked: Vec<&str> = evaluated_ids
            .iter()
            .filter(|id| graph.get(id).is_some())
            .map(String::as_str)
            .collect();
        ranked.sort_by(|a, b| {
            rank_best_first(graph.get(a).expect("filtered"), graph.get(b).expect("filtered"))
        });
        ranked.truncate(self.beam_width);

        FrontierDecision {
            frontier: ranked.into_iter().map(str::to_string).collect(),
            best_id: self.best_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ValueScore;

    fn scored_children(scores: &[f64]) -> (ThoughtGraph, Vec<String>) {
        let mut graph = ThoughtGraph::new();
        let root = graph.create_root("task");
        let ids: Vec<String> = scores
            .iter()
            .map(|&score| {
                let id = graph.add_child(&root, format!("s={score}"), false).unwrap();
                graph
                    .write_scores(&id, ValueScore::new(score, score, 5.0), score)
                    .unwrap();
                id
            })
            .collect();
        (graph, ids)
    }

    #[test]
    fn keeps_top_width_by_score() {
        let (graph, ids) = scored_children(&[2.0, 9.0, 5.0, 7.0]);
        let mut beam = BeamSearch::new(2);
        let decision = beam.update_frontier(&graph, &ids);

        assert_eq!(decision.frontier.len(), 2);
        assert_eq!(decision.frontier[0], ids[1]);
        assert_eq!(decision.frontier[1], ids[3]);
        assert_eq!(decision.best_id.as_ref(), Some(&ids[1]));
    }

    #[test]
    fn width_larger_than_round_keeps_all() {
        let (graph, ids) = scored_children(&[1.0, 2.0]);
        let mut beam = BeamSearch::new(10);
        let decision = beam.update_frontier(&graph, &ids);
        assert_eq!(decision.frontier.len(), 2);
    }

    #[test]
    fn empty_round_yields_empty_frontier() {
        let (graph, _) = scored_children(&[]);
        let mut beam = BeamSearch::new(3);
        let decision = beam.update_frontier(&graph, &[]);
        assert!(decision.frontier.is_empty());
        assert!(decision.best_id.is_none());
    }

    #[test]
    fn best_persists_across_rounds() {
        let (mut graph, ids) = scored_children(&[9.0]);
        let mut beam = BeamSearch::new(2);
        let first = beam.update_frontier(&graph, &ids);
        assert_eq!(first.best_id.as_ref(), Some(&ids[0]));

        // A later, weaker round must not displace the recorded best.
        let child = graph.add_child(&ids[0], "weaker", false).unwrap();
        graph
            .write_scores(&child, ValueScore::new(3.0, 3.0, 3.0), 3.0)
            .unwrap();
        let second = beam.update_frontier(&graph, std::slice::from_ref(&child));
        assert_eq!(second.best_id.as_ref(), Some(&ids[0]));
        assert_eq!(second.frontier, vec![child]);
    }
}
