//! Run engine — the state machine at the heart of a run.
//!
//! Drives `INITIALIZE → (PROPOSE → EVALUATE → SELECT_PRUNE → CHECK_STOP)* →
//! FINALIZE` over one [`RunState`]. Fan-out inside PROPOSE and EVALUATE is
//! bounded by `config.parallelism`; workers only compute and return values,
//! every mutation of the shared state happens under a short write lock
//! between suspension points. The cancel token is tested at each phase
//! boundary and before every LLM call, so cancellation takes effect no
//! later than the next CHECK_STOP.

mod evaluator;
mod finalizer;
mod proposer;

pub use evaluator::{Evaluation, HybridEvaluator};
pub use finalizer::Finalizer;
pub use proposer::{Candidate, Proposer};

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::cache::SemanticCache;
use crate::error::{TotError, TotResult};
use crate::gateway::LlmGateway;
use crate::graph::ThoughtGraph;
use crate::metrics::MetricsSink;
use crate::prompts::PromptSet;
use crate::strategy::{self, SearchStrategy};
use crate::types::{RunConfig, RunMetrics, RunStatus, StopReason, Task};

/// Engine-visible state of one run. Snapshots handed out by the registry
/// are clones of this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,
    pub task: Task,
    pub config: RunConfig,
    pub graph: ThoughtGraph,
    /// Live node ids, best first.
    pub frontier: Vec<String>,
    pub best_node_id: Option<String>,
    /// Count of non-root nodes created so far.
    pub nodes_expanded: usize,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_answer: Option<String>,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    pub metrics: RunMetrics,
}

impl RunState {
    pub fn new(run_id: impl Into<String>, task: Task, config: RunConfig) -> Self {
        Self {
            run_id: run_id.into(),
            task,
            config,
            graph: ThoughtGraph::new(),
            frontier: Vec::new(),
            best_node_id: None,
            nodes_expanded: 0,
            started_at: Utc::now(),
            final_answer: None,
            status: RunStatus::Pending,
            stop_reason: None,
            metrics: RunMetrics::default(),
        }
    }

    /// Score of the current best node; 0 before any evaluation.
    pub fn best_score(&self) -> f64 {
        self.best_node_id
            .as_ref()
            .and_then(|id| self.graph.get(id))
            .map_or(0.0, |n| n.score)
    }
}

/// Shared handle to a run's state.
pub type SharedRunState = Arc<RwLock<RunState>>;

/// The expand/evaluate/select/stop loop.
pub struct RunEngine {
    metrics: Arc<dyn MetricsSink>,
    proposer: Proposer,
    evaluator: HybridEvaluator,
    finalizer: Finalizer,
}

impl RunEngine {
    pub fn new(
        gateway: Arc<LlmGateway>,
        cache: Arc<SemanticCache>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self::with_prompts(gateway, cache, metrics, Arc::new(PromptSet::default()))
    }

    /// Engine with injected prompt templates.
    pub fn with_prompts(
        gateway: Arc<LlmGateway>,
        cache: Arc<SemanticCache>,
        metrics: Arc<dyn MetricsSink>,
        prompts: Arc<PromptSet>,
    ) -> Self {
        Self {
            metrics: metrics.clone(),
            proposer: Proposer::new(
                gateway.clone(),
                cache.clone(),
                prompts.clone(),
                metrics.clone(),
            ),
            evaluator: HybridEvaluator::new(gateway.clone(), cache, prompts.clone(), metrics),
            finalizer: Finalizer::new(gateway, prompts),
        }
    }

    /// Execute one run to a terminal status. Every outcome, including
    /// internal errors, lands in the state; this never panics the caller.
    pub async fn run(&self, state: SharedRunState, cancel: CancellationToken) {
        let start = Instant::now();

        self.transition("initialize");
        let (run_id, task, config) = {
            let mut s = state.write().await;
            let instruction = s.task.instruction.clone();
            let root = s.graph.create_root(instruction);
            s.frontier = vec![root.clone()];
            s.best_node_id = Some(root);
            s.status = RunStatus::Running;
            (s.run_id.clone(), s.task.clone(), s.config.clone())
        };
        tracing::info!(run_id = %run_id, strategy = %config.strategy, "run started");

        let mut strategy = strategy::for_config(&config);
        let outcome = self
            .drive(&state, strategy.as_mut(), &task, &config, &cancel, start)
            .await;

        match outcome {
            Ok(StopReason::Cancelled) => {
                self.finish(&state, RunStatus::Cancelled, StopReason::Cancelled, None, start)
                    .await;
            }
            Ok(reason) => {
                self.transition("finalize");
                let chain = {
                    let s = state.read().await;
                    s.best_node_id
                        .as_ref()
                        .map(|id| s.graph.path_string(id))
                        .unwrap_or_default()
                };
                match self.finalizer.synthesize(&task, &chain, &config, &cancel).await {
                    Ok(answer) => {
                        self.finish(&state, RunStatus::Completed, reason, Some(answer), start)
                            .await;
                    }
                    Err(TotError::Cancelled) => {
                        self.finish(
                            &state,
                            RunStatus::Cancelled,
                            StopReason::Cancelled,
                            None,
                            start,
                        )
                        .await;
                    }
                    Err(e) => {
                        tracing::error!(run_id = %run_id, error = %e, "finalize failed");
                        self.finish(&state, RunStatus::Failed, StopReason::FinalizeError, None, start)
                            .await;
                    }
                }
            }
            Err(e) => {
                let status = if e.is_cancelled() {
                    RunStatus::Cancelled
                } else {
                    tracing::error!(run_id = %run_id, error = %e, "run failed");
                    RunStatus::Failed
                };
                self.finish(&state, status, e.stop_reason(), None, start).await;
            }
        }
    }

    /// The propose → evaluate → select → stop loop; returns the stop
    /// reason that fired.
    async fn drive(
        &self,
        state: &SharedRunState,
        strategy: &mut dyn SearchStrategy,
        task: &Task,
        config: &RunConfig,
        cancel: &CancellationToken,
        start: Instant,
    ) -> TotResult<StopReason> {
        loop {
            self.transition("propose");
            if !cancel.is_cancelled() {
                self.propose_phase(state, task, config, cancel).await?;
            }

            self.transition("evaluate");
            if !cancel.is_cancelled() {
                self.evaluate_phase(state, task, config, cancel).await?;
            }

            self.transition("select_prune");
            if !cancel.is_cancelled() {
                let mut s = state.write().await;
                let evaluated = s.frontier.clone();
                let decision = strategy.update_frontier(&s.graph, &evaluated);
                s.frontier = decision.frontier;
                if let Some(candidate) = decision.best_id {
                    let candidate_score = s.graph.get(&candidate).map_or(0.0, |n| n.score);
                    if candidate_score > s.best_score() {
                        s.best_node_id = Some(candidate);
                    }
                }
            }

            self.transition("check_stop");
            let mut s = state.write().await;
            s.metrics.nodes_expanded = s.nodes_expanded;
            s.metrics.final_score = s.best_score();
            s.metrics.time_taken_secs = start.elapsed().as_secs_f64();
            if let Some(reason) = check_stop(&s, cancel, start.elapsed().as_secs_f64()) {
                tracing::debug!(run_id = %s.run_id, stop_reason = %reason, "stop predicate fired");
                return Ok(reason);
            }
        }
    }

    /// Expand every frontier node below `max_depth`; the frontier becomes
    /// the newly created children.
    async fn propose_phase(
        &self,
        state: &SharedRunState,
        task: &Task,
        config: &RunConfig,
        cancel: &CancellationToken,
    ) -> TotResult<()> {
        let jobs: Vec<(String, String)> = {
            let s = state.read().await;
            s.frontier
                .iter()
                .filter_map(|id| s.graph.get(id))
                .filter(|n| n.depth < config.max_depth)
                .map(|n| (n.id.clone(), s.graph.path_string(&n.id)))
                .collect()
        };

        let width = jobs.len().min(config.parallelism).max(1);
        let results: Vec<(String, TotResult<Vec<Candidate>>)> =
            futures::stream::iter(jobs.into_iter().map(|(parent_id, path)| async move {
                let result = self.proposer.propose(task, &path, config, cancel).await;
                (parent_id, result)
            }))
            .buffered(width)
            .collect()
            .await;

        let mut s = state.write().await;
        let mut new_frontier = Vec::new();
        let mut created = 0usize;
        for (parent_id, result) in results {
            match result {
                Ok(candidates) => {
                    for candidate in candidates {
                        let child =
                            s.graph
                                .add_child(&parent_id, candidate.text, candidate.is_terminal)?;
                        new_frontier.push(child);
                        created += 1;
                    }
                }
                // Cancellation drops partial work; CHECK_STOP handles it.
                Err(TotError::Cancelled) => {}
                Err(
                    e @ (TotError::Internal(_)
                    | TotError::Serialization(_)
                    | TotError::Io(_)
                    | TotError::Other(_)),
                ) => return Err(e),
                Err(e) => {
                    // The node contributes no children; the run survives.
                    self.metrics.increment("propose_failures", &[], 1);
                    tracing::warn!(parent = %parent_id, error = %e, "expansion dropped");
                }
            }
        }
        s.nodes_expanded += created;
        s.frontier = new_frontier;
        Ok(())
    }

    /// Score every frontier node; scores are final before selection.
    async fn evaluate_phase(
        &self,
        state: &SharedRunState,
        task: &Task,
        config: &RunConfig,
        cancel: &CancellationToken,
    ) -> TotResult<()> {
        let jobs: Vec<(String, String, String)> = {
            let s = state.read().await;
            s.frontier
                .iter()
                .filter_map(|id| s.graph.get(id))
                .map(|n| (n.id.clone(), n.thought.clone(), s.graph.path_string(&n.id)))
                .collect()
        };

        let width = jobs.len().min(config.parallelism).max(1);
        let results: Vec<(String, TotResult<Evaluation>)> =
            futures::stream::iter(jobs.into_iter().map(|(id, thought, path)| async move {
                let result = self
                    .evaluator
                    .evaluate(task, &thought, &path, config, cancel)
                    .await;
                (id, result)
            }))
            .buffered(width)
            .collect()
            .await;

        let mut s = state.write().await;
        for (id, result) in results {
            match result {
                Ok(eval) => s.graph.write_scores(&id, eval.raw, eval.composite)?,
                Err(TotError::Cancelled) => {}
                // The evaluator absorbs LLM failures; anything else is fatal.
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn finish(
        &self,
        state: &SharedRunState,
        status: RunStatus,
        reason: StopReason,
        answer: Option<String>,
        start: Instant,
    ) {
        let mut s = state.write().await;
        s.status = status;
        s.stop_reason = Some(reason);
        s.final_answer = answer;
        s.metrics = RunMetrics {
            nodes_expanded: s.nodes_expanded,
            final_score: s.best_score(),
            time_taken_secs: start.elapsed().as_secs_f64(),
            stop_reason: Some(reason),
        };
        tracing::info!(run_id = %s.run_id, status = %status, stop_reason = %reason, "run finished");
    }

    fn transition(&self, phase: &str) {
        self.metrics
            .increment("engine_transitions", &[("phase", phase)], 1);
    }
}

/// Stop predicate in priority order.
fn check_stop(s: &RunState, cancel: &CancellationToken, elapsed_secs: f64) -> Option<StopReason> {
    if cancel.is_cancelled() {
        return Some(StopReason::Cancelled);
    }
    let stop = &s.config.stop_conditions;
    if s.nodes_expanded >= stop.max_nodes {
        return Some(StopReason::MaxNodes);
    }
    if elapsed_secs >= stop.max_time_seconds {
        return Some(StopReason::MaxTime);
    }
    if let Some(best) = s.best_node_id.as_ref().and_then(|id| s.graph.get(id)) {
        // The root never satisfies the threshold.
        if best.score >= stop.score_threshold && best.depth >= 1 {
            return Some(StopReason::ScoreThreshold);
        }
    }
    if s.frontier.is_empty() {
        return Some(StopReason::EmptyFrontier);
    }
    if s.frontier
        .iter()
        .filter_map(|id| s.graph.get(id))
        .all(|n| n.depth >= s.config.max_depth)
    {
        return Some(StopReason::DepthExhausted);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{StopConditions, ValueScore};

    fn state_with(config: RunConfig) -> RunState {
        let mut state = RunState::new("r1", Task::new("task"), config);
        let root = state.graph.create_root("task");
        state.frontier = vec![root.clone()];
        state.best_node_id = Some(root);
        state.status = RunStatus::Running;
        state
    }

    fn scored_child(state: &mut RunState, score: f64) -> String {
        let root = state.graph.root_id().unwrap().to_string();
        let id = state.graph.add_child(&root, "thought", false).unwrap();
        state
            .graph
            .write_scores(&id, ValueScore::new(score, score, 5.0), score)
            .unwrap();
        state.nodes_expanded += 1;
        id
    }

    #[test]
    fn cancel_has_top_priority() {
        let mut state = state_with(RunConfig {
            stop_conditions: StopConditions {
                max_nodes: 0,
                ..Default::default()
            },
            ..Default::default()
        });
        state.frontier.clear();
        let cancel = CancellationToken::new();
        cancel.cancel();
        // max_nodes and empty_frontier also hold, but cancel wins.
        assert_eq!(
            check_stop(&state, &cancel, 100.0),
            Some(StopReason::Cancelled)
        );
    }

    #[test]
    fn max_nodes_beats_time_and_rest() {
        let mut state = state_with(RunConfig {
            stop_conditions: StopConditions {
                max_nodes: 1,
                max_time_seconds: 0.0,
                ..Default::default()
            },
            ..Default::default()
        });
        scored_child(&mut state, 1.0);
        assert_eq!(
            check_stop(&state, &CancellationToken::new(), 5.0),
            Some(StopReason::MaxNodes)
        );
    }

    #[test]
    fn max_time_fires_before_any_cycle_completes() {
        let state = state_with(RunConfig {
            stop_conditions: StopConditions {
                max_time_seconds: 0.0,
                ..Default::default()
            },
            ..Default::default()
        });
        assert_eq!(
            check_stop(&state, &CancellationToken::new(), 0.0),
            Some(StopReason::MaxTime)
        );
    }

    #[test]
    fn score_threshold_requires_depth() {
        let mut state = state_with(RunConfig::default());
        // Root scored above threshold must not stop the run.
        let root = state.graph.root_id().unwrap().to_string();
        state
            .graph
            .write_scores(&root, ValueScore::new(10.0, 10.0, 10.0), 10.0)
            .unwrap();
        assert_eq!(check_stop(&state, &CancellationToken::new(), 0.1), None);

        let best = scored_child(&mut state, 9.8);
        state.best_node_id = Some(best);
        assert_eq!(
            check_stop(&state, &CancellationToken::new(), 0.1),
            Some(StopReason::ScoreThreshold)
        );
    }

    #[test]
    fn empty_frontier_stops() {
        let mut state = state_with(RunConfig::default());
        state.frontier.clear();
        assert_eq!(
            check_stop(&state, &CancellationToken::new(), 0.1),
            Some(StopReason::EmptyFrontier)
        );
    }

    #[test]
    fn depth_exhausted_when_all_frontier_at_max_depth() {
        let mut state = state_with(RunConfig {
            max_depth: 1,
            ..Default::default()
        });
        let child = scored_child(&mut state, 2.0);
        state.frontier = vec![child];
        assert_eq!(
            check_stop(&state, &CancellationToken::new(), 0.1),
            Some(StopReason::DepthExhausted)
        );
    }

    #[test]
    fn healthy_mid_run_state_continues() {
        let mut state = state_with(RunConfig::default());
        let child = scored_child(&mut state, 4.0);
        state.frontier = vec![child];
        assert_eq!(check_stop(&state, &CancellationToken::new(), 0.1), None);
    }

    #[test]
    fn run_state_serde_round_trip() {
        let mut state = state_with(RunConfig::default());
        let child = scored_child(&mut state, 7.0);
        state.best_node_id = Some(child.clone());

        let json = serde_json::to_string(&state).unwrap();
        let restored: RunState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.run_id, state.run_id);
        assert_eq!(restored.graph.len(), state.graph.len());
        assert_eq!(restored.best_score(), 7.0);
        assert_eq!(restored.frontier, state.frontier);
    }

    #[test]
    fn best_score_defaults_to_zero() {
        let state = RunState::new("r", Task::new("t"), RunConfig::default());
        assert_eq!(state.best_score(), 0.0);
    }
}
