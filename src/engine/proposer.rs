//! Thought proposal — K candidate next steps per frontier node.

use std::sync::Arc;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::cache::{Namespace, SemanticCache};
use crate::error::{TotError, TotResult};
use crate::gateway::LlmGateway;
use crate::metrics::MetricsSink;
use crate::prompts::{PromptSet, SOLUTION_MARKER};
use crate::types::{RunConfig, Task};

/// One proposed child thought.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub text: String,
    /// The thought self-declares a completed solution.
    pub is_terminal: bool,
}

impl Candidate {
    fn from_text(text: String) -> Self {
        let is_terminal = text.contains(SOLUTION_MARKER);
        Self { text, is_terminal }
    }
}

/// Generates candidate thoughts for one frontier node, consulting the
/// semantic cache before spending a chat call.
pub struct Proposer {
    gateway: Arc<LlmGateway>,
    cache: Arc<SemanticCache>,
    prompts: Arc<PromptSet>,
    metrics: Arc<dyn MetricsSink>,
}

impl Proposer {
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

    /// Propose up to `branching_factor` children for the node whose
    /// root→node chain is `path`. Partial work is dropped on cancellation.
    pub async fn propose(
        &self,
        task: &Task,
        path: &str,
        config: &RunConfig,
        cancel: &CancellationToken,
    ) -> TotResult<Vec<Candidate>> {
        let k = config.branching_factor;
        if k == 0 {
            return Ok(Vec::new());
        }
        if cancel.is_cancelled() {
            return Err(TotError::Cancelled);
        }

        let cache_key = format!("propose | {} | {path}", task.instruction);
        if let Some(hit) = self.cache.lookup(Namespace::Propose, &cache_key, cancel).await {
            if let Ok(texts) = serde_json::from_value::<Vec<String>>(hit.payload) {
                return Ok(texts.into_iter().map(Candidate::from_text).collect());
            }
            // Unusable payload shape; fall through to a fresh call.
        }

        let prompt = self.prompts.render_propose(task, path, k);
        let raw = self
            .gateway
            .chat(&prompt, config.propose_temp, &config.chat_model, cancel)
            .await?;

        let texts = parse_candidates(&raw, k);
        if texts.is_empty() {
            self.metrics.increment("propose_empty_parses", &[], 1);
            tracing::debug!(raw = %raw, "propose output yielded no usable candidates");
        }

        let _ = self
            .cache
            .insert(Namespace::Propose, &cache_key, json!(texts), cancel)
            .await;

        Ok(texts.into_iter().map(Candidate::from_text).collect())
    }
}

/// Robust candidate extraction: fenced JSON array first, then line
/// splitting with ordinal/bullet prefixes stripped. Empty strings are
/// discarded and the result truncated to `k`.
pub(crate) fn parse_candidates(raw: &str, k: usize) -> Vec<String> {
    let cleaned = strip_code_fence(raw);

    if let Ok(list) = serde_json::from_str::<Vec<String>>(cleaned) {
        return list
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .take(k)
            .collect();
    }

    static ORDINAL: OnceLock<Regex> = OnceLock::new();
    let ordinal = ORDINAL.get_or_init(|| {
        Regex::new(r"^\s*(?:[-*•]|\d+[.):])\s*").expect("static pattern")
    });

    cleaned
        .lines()
        .map(|line| ordinal.replace(line, "").trim().to_string())
        .filter(|line| !line.is_empty())
        .take(k)
        .collect()
}

/// Unwrap a ```json fenced block if present.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}
