//! Prompt templates for the propose / value / finalize calls.
//!
//! Templates are plain strings with `{placeholder}` slots and are injectable
//! configuration: callers may swap any template as long as the output format
//! contract holds (JSON string array for propose, three numeric fields plus a
//! justification for value, free text for finalize).

use crate::types::Task;

/// Marker a proposed thought carries when it claims to complete the task.
pub const SOLUTION_MARKER: &str = "SOLUTION:";

/// Marker for a thought the model judged to be an unrecoverable path.
pub const FAILURE_MARKER: &str = "DEAD_END";

const PROPOSE_TEMPLATE: &str = r#"System: You are a committee of reasoning experts proposing next steps for a task. Generate {k} distinct, actionable candidate thoughts. To guarantee diversity, each expert takes a different perspective (analytical, creative, critical). If a candidate fully solves the task, prefix it with "SOLUTION:". If the current chain cannot lead anywhere, a candidate may be exactly "DEAD_END". Return a JSON array of {k} strings and nothing else. Example format: ["analytical thought", "creative thought", "critical thought"]

Task:
{task}

Current thought chain:
{history}

Constraints:
{constraints}

Return: JSON array ["thought1", "thought2", ...]
"#;

const VALUE_TEMPLATE: &str = r#"System: You are a critical, analytical judge. Score a candidate thought against a task. Return a multi-dimensional assessment as JSON and nothing else.

Task:
{task}

Candidate thought:
{candidate}

History:
{history}

Score the candidate on these axes:
1. progress (0-10): how much this thought directly advances the task.
2. promise (0-10): its potential to unlock valuable paths later, even without immediate progress.
3. confidence (0-10): your confidence that this path leads to a successful solution.
4. justification (string): a concise rationale for the scores.

Return: JSON strictly of the form {"progress": float, "promise": float, "confidence": float, "justification": "..."}
"#;

const FINALIZE_TEMPLATE: &str = r#"System: Given the best chain of thoughts below, produce a concise final answer that solves the task. Return only the final answer.

Task:
{task}

Chain:
{chain}

Return a single textual answer.
"#;

/// The three templates a run is driven by.
#[derive(Debug, Clone)]
pub struct PromptSet {
    pub propose: String,
    pub value: String,
    pub finalize: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            propose: PROPOSE_TEMPLATE.into(),
            value: VALUE_TEMPLATE.into(),
            finalize: FINALIZE_TEMPLATE.into(),
        }
    }
}

impl PromptSet {
    pub fn render_propose(&self, task: &Task, history: &str, k: usize) -> String {
        self.propose
            .replace("{k}", &k.to_string())
            .replace("{task}", &task.instruction)
            .replace("{history}", history)
            .replace("{constraints}", task.constraints.as_deref().unwrap_or(""))
    }

    pub fn render_value(&self, task: &Task, candidate: &str, history: &str) -> String {
        self.value
            .replace("{task}", &task.instruction)
            .replace("{candidate}", candidate)
            .replace("{history}", history)
    }

    pub fn render_finalize(&self, task: &Task, chain: &str) -> String {
        self.finalize
            .replace("{task}", &task.instruction)
            .replace("{chain}", chain)
    }
}
