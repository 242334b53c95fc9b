//! Hybrid thought evaluation — cheap heuristics first, LLM value prompt
//! otherwise.

use std::sync::Arc;
use std::sync::OnceLock;

use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::cache::{Namespace, SemanticCache};
use crate::error::{TotError, TotResult};
use crate::gateway::LlmGateway;
use crate::metrics::MetricsSink;
use crate::prompts::{PromptSet, FAILURE_MARKER};
use crate::types::{RunConfig, Task, ValueScore};

/// Shorter thoughts are graded without an LLM call.
const MIN_THOUGHT_CHARS: usize = 8;
/// Longer thoughts are graded without an LLM call.
const MAX_THOUGHT_CHARS: usize = 1000;

/// Outcome of evaluating one candidate node.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub raw: ValueScore,
    pub composite: f64,
}

/// Scores a candidate thought in [0, 10].
pub struct HybridEvaluator {
    gateway: Arc<LlmGateway>,
    cache: Arc<SemanticCache>,
    prompts: Arc<PromptSet>,
    metrics: Arc<dyn MetricsSink>,
}

impl HybridEvaluator {
    pub fn new(
        gateway: Arc<LlmGateway>,
        cache: Arc<SemanticCache>,
        prompts: Arc<PromptSet>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            gateway,
            cache,
            prompts,
            metrics,
        }
    }

    /// Evaluate one thought. Gateway failures (other than cancellation)
    /// degrade to the low-confidence fallback; they never fail the run.
    pub async fn evaluate(
        &self,
        task: &Task,
        thought: &str,
        path: &str,
        config: &RunConfig,
        cancel: &CancellationToken,
    ) -> TotResult<Evaluation> {
        if cancel.is_cancelled() {
            return Err(TotError::Cancelled);
        }

        if let Some(raw) = heuristic_score(thought) {
            self.metrics.increment("evaluate_heuristic_hits", &[], 1);
            return Ok(self.finish(raw, config));
        }

        let cache_key = format!("evaluate | {} | {path}", task.instruction);
        if let Some(hit) = self.cache.lookup(Namespace::Evaluate, &cache_key, cancel).await {
            if let Ok(raw) = serde_json::from_value::<ValueScore>(hit.payload) {
                return Ok(self.finish(raw.clamped(), config));
            }
            // Unusable payload shape; fall through to a fresh call.
        }

        let prompt = self.prompts.render_value(task, thought, path);
        let raw = match self
            .gateway
            .chat(&prompt, config.value_temp, &config.chat_model, cancel)
            .await
        {
            Ok(output) => parse_value_score(&output).unwrap_or_else(|| {
                self.metrics.increment("evaluate_parse_fallbacks", &[], 1);
                tracing::debug!(output = %output, "unparseable value output, using fallback");
                fallback_score()
            }),
            Err(TotError::Cancelled) => return Err(TotError::Cancelled),
            Err(e) => {
                self.metrics.increment("evaluate_llm_fallbacks", &[], 1);
                tracing::warn!(error = %e, "value call failed, using fallback");
                fallback_score()
            }
        };

        let _ = self
            .cache
            .insert(
                Namespace::Evaluate,
                &cache_key,
                serde_json::to_value(&raw)?,
                cancel,
            )
            .await;

        Ok(self.finish(raw, config))
    }

    fn finish(&self, raw: ValueScore, config: &RunConfig) -> Evaluation {
        let composite = raw.composite(&config.evaluation_weights);
        Evaluation { raw, composite }
    }
}

/// Deterministic short-circuit rules; `None` means ask the model.
fn heuristic_score(thought: &str) -> Option<ValueScore> {
    let trimmed = thought.trim();
    if trimmed.len() < MIN_THOUGHT_CHARS {
        return Some(
            ValueScore::new(1.0, 1.0, 9.0).with_justification("thought too short to be a step"),
        );
    }
    if trimmed.len() > MAX_THOUGHT_CHARS {
        return Some(
            ValueScore::new(3.0, 3.0, 7.0).with_justification("thought excessively long"),
        );
    }
    if trimmed.contains(FAILURE_MARKER) {
        return Some(
            ValueScore::new(0.0, 0.0, 10.0).with_justification("explicit dead end"),
        );
    }
    None
}

/// Defaults for an evaluation the model failed to produce.
fn fallback_score() -> ValueScore {
    let mut score = ValueScore::new(5.0, 5.0, 3.0)
        .with_justification("evaluator output unusable, defaults applied");
    score.low_confidence = true;
    score
}

/// Robust value parsing: fenced JSON object first, then per-field regex
/// extraction from free text. All axes clamped to [0, 10].
pub(crate) fn parse_value_score(raw: &str) -> Option<ValueScore> {
    let cleaned = strip_code_fence(raw);

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(cleaned) {
        let progress = value.get("progress").and_then(|v| v.as_f64());
        let promise = value.get("promise").and_then(|v| v.as_f64());
        let confidence = value.get("confidence").and_then(|v| v.as_f64());
        if let (Some(progress), Some(promise), Some(confidence)) = (progress, promise, confidence)
        {
            let justification = value
                .get("justification")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            return Some(
                ValueScore::new(progress, promise, confidence)
                    .with_justification(justification)
                    .clamped(),
            );
        }
    }

    let progress = extract_field(cleaned, "progress")?;
    let promise = extract_field(cleaned, "promise")?;
    let confidence = extract_field(cleaned, "confidence")?;
    Some(ValueScore::new(progress, promise, confidence).clamped())
}

fn extract_field(text: &str, field: &str) -> Option<f64> {
    static FIELD_RES: OnceLock<[(&str, Regex); 3]> = OnceLock::new();
    let patterns = FIELD_RES.get_or_init(|| {
        ["progress", "promise", "confidence"].map(|name| {
            let pattern = format!(r#"(?i)"?{name}"?\s*[:=]\s*(-?\d+(?:\.\d+)?)"#);
            (name, Regex::new(&pattern).expect("static pattern"))
        })
    });
    let re = &patterns.iter().find(|(name, _)| *name == field)?.1;
    re.captures(text)?.get(1)?.as_str().parse().ok()
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}
