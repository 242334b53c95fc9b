use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{TotError, TotResult};

// ─── Task ────────────────────────────────────────────────────────────────────

/// A reasoning task submitted by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// What to solve.
    pub instruction: String,
    /// Optional constraints the solution must respect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<String>,
}

impl Task {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            constraints: None,
        }
    }

    pub fn with_constraints(mut self, constraints: impl Into<String>) -> Self {
        self.constraints = Some(constraints.into());
        self
    }
}

// ─── Run Configuration ───────────────────────────────────────────────────────

/// Frontier policy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    BeamSearch,
    BestFirstSearch,
}

impl Default for StrategyKind {
    fn default() -> Self {
        StrategyKind::BeamSearch
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyKind::BeamSearch => write!(f, "beam_search"),
            StrategyKind::BestFirstSearch => write!(f, "best_first_search"),
        }
    }
}

/// Weights for the composite evaluation score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluationWeights {
    pub progress: f64,
    pub promise: f64,
    pub confidence: f64,
}

impl Default for EvaluationWeights {
    fn default() -> Self {
        Self {
            progress: 0.4,
            promise: 0.3,
            confidence: 0.3,
        }
    }
}

impl EvaluationWeights {
    pub fn sum(&self) -> f64 {
        self.progress + self.promise + self.confidence
    }
}

/// Termination conditions checked after each selection round.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StopConditions {
    #[serde(default = "default_max_nodes")]
    pub max_nodes: usize,
    #[serde(default = "default_max_time_seconds")]
    pub max_time_seconds: f64,
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f64,
}

fn default_max_nodes() -> usize {
    200
}

fn default_max_time_seconds() -> f64 {
    30.0
}

fn default_score_threshold() -> f64 {
    9.5
}

impl Default for StopConditions {
    fn default() -> Self {
        Self {
            max_nodes: default_max_nodes(),
            max_time_seconds: default_max_time_seconds(),
            score_threshold: default_score_threshold(),
        }
    }
}

/// Semantic cache tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Minimum cosine similarity for a lookup to count as a hit.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    /// Per-namespace capacity; the oldest entry is evicted on overflow.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

fn default_similarity_threshold() -> f32 {
    0.95
}

fn default_max_entries() -> usize {
    1024
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            max_entries: default_max_entries(),
        }
    }
}

/// Configuration for a single run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub strategy: StrategyKind,
    /// Maximum tree depth; nodes at this depth are never expanded.
    pub max_depth: usize,
    /// Candidate thoughts requested per expanded node (K).
    pub branching_factor: usize,
    /// Frontier width kept by beam search.
    pub beam_width: usize,
    pub propose_temp: f32,
    pub value_temp: f32,
    pub finalize_temp: f32,
    pub evaluation_weights: EvaluationWeights,
    pub stop_conditions: StopConditions,
    /// Must match the embedding model's output width.
    pub embedding_dim: usize,
    pub cache: CacheConfig,
    /// Upper bound on concurrent LLM calls within one phase.
    pub parallelism: usize,
    pub chat_model: String,
    pub embedding_model: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::default(),
            max_depth: 3,
            branching_factor: 3,
            beam_width: 5,
            propose_temp: 0.7,
            value_temp: 0.2,
            finalize_temp: 0.0,
            evaluation_weights: EvaluationWeights::default(),
            stop_conditions: StopConditions::default(),
            embedding_dim: 3072,
            cache: CacheConfig::default(),
            parallelism: 8,
            chat_model: "gemini-2.5-flash".into(),
            embedding_model: "gemini-embedding-001".into(),
        }
    }
}

impl RunConfig {
    /// Reject configurations a run could not execute. `max_depth = 0` and
    /// `branching_factor = 0` are legal degenerate runs (finalize on root,
    /// empty-frontier stop respectively).
    pub fn validate(&self) -> TotResult<()> {
        if self.beam_width == 0 {
            return Err(TotError::InvalidConfig("beam_width must be >= 1".into()));
        }
        if self.embedding_dim == 0 {
            return Err(TotError::InvalidConfig("embedding_dim must be >= 1".into()));
        }
        if self.cache.max_entries == 0 {
            return Err(TotError::InvalidConfig(
                "cache.max_entries must be >= 1".into(),
            ));
        }
        let t = self.cache.similarity_threshold;
        if !(t > 0.0 && t <= 1.0) {
            return Err(TotError::InvalidConfig(format!(
                "cache.similarity_threshold must be in (0, 1], got {t}"
            )));
        }
        for (name, temp) in [
            ("propose_temp", self.propose_temp),
            ("value_temp", self.value_temp),
            ("finalize_temp", self.finalize_temp),
        ] {
            if !(0.0..=2.0).contains(&temp) {
                return Err(TotError::InvalidConfig(format!(
                    "{name} must be in [0, 2], got {temp}"
                )));
            }
        }
        let w = &self.evaluation_weights;
        if w.progress < 0.0 || w.promise < 0.0 || w.confidence < 0.0 {
            return Err(TotError::InvalidConfig(
                "evaluation_weights must be non-negative".into(),
            ));
        }
        if w.sum() <= 0.0 {
            return Err(TotError::InvalidConfig(
                "evaluation_weights must sum to a positive value".into(),
            ));
        }
        if self.stop_conditions.max_time_seconds < 0.0 {
            return Err(TotError::InvalidConfig(
                "stop_conditions.max_time_seconds must be >= 0".into(),
            ));
        }
        Ok(())
    }
}

// ─── Evaluation ──────────────────────────────────────────────────────────────

/// Raw multi-dimensional evaluation of a thought, each axis in [0, 10].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueScore {
    pub progress: f64,
    pub promise: f64,
    pub confidence: f64,
    #[serde(default)]
    pub justification: String,
    /// Set when the evaluator fell back to defaults after a parse failure.
    #[serde(default)]
    pub low_confidence: bool,
}

impl ValueScore {
    pub fn new(progress: f64, promise: f64, confidence: f64) -> Self {
        Self {
            progress,
            promise,
            confidence,
            justification: String::new(),
            low_confidence: false,
        }
    }

    pub fn with_justification(mut self, justification: impl Into<String>) -> Self {
        self.justification = justification.into();
        self
    }

    /// Clamp every axis into [0, 10].
    pub fn clamped(mut self) -> Self {
        self.progress = self.progress.clamp(0.0, 10.0);
        self.promise = self.promise.clamp(0.0, 10.0);
        self.confidence = self.confidence.clamp(0.0, 10.0);
        self
    }

    /// Weighted composite in [0, 10].
    pub fn composite(&self, weights: &EvaluationWeights) -> f64 {
        let total = weights.sum();
        if total <= 0.0 {
            return 0.0;
        }
        let raw = (self.progress * weights.progress
            + self.promise * weights.promise
            + self.confidence * weights.confidence)
            / total;
        raw.clamp(0.0, 10.0)
    }
}

// ─── Run Lifecycle ───────────────────────────────────────────────────────────

/// Lifecycle of a run: `pending → running → {completed, failed, cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Pending => write!(f, "pending"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Why a run stopped, in predicate priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Cancelled,
    MaxNodes,
    MaxTime,
    ScoreThreshold,
    EmptyFrontier,
    DepthExhausted,
    FinalizeError,
    InternalError,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StopReason::Cancelled => "cancelled",
            StopReason::MaxNodes => "max_nodes",
            StopReason::MaxTime => "max_time",
            StopReason::ScoreThreshold => "score_threshold",
            StopReason::EmptyFrontier => "empty_frontier",
            StopReason::DepthExhausted => "depth_exhausted",
            StopReason::FinalizeError => "finalize_error",
            StopReason::InternalError => "internal_error",
        };
        write!(f, "{s}")
    }
}

/// Metrics snapshot for a run; partial while the run is live.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub nodes_expanded: usize,
    pub final_score: f64,
    pub time_taken_secs: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
}

/// One row of `list_runs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
}

/// Result of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    CancellationRequested,
    AlreadyTerminal,
}
