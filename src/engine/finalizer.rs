//! Final-answer synthesis from the winning path.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::TotResult;
use crate::gateway::LlmGateway;
use crate::prompts::PromptSet;
use crate::types::{RunConfig, Task};

/// Turns the best root→leaf chain into a concise final answer. No caching:
/// every run synthesizes its own answer. Errors here fail the run.
pub struct Finalizer {
    gateway: Arc<LlmGateway>,
    prompts: Arc<PromptSet>,
}

impl Finalizer {
    pub fn new(gateway: Arc<LlmGateway>, prompts: Arc<PromptSet>) -> Self {
        Self { gateway, prompts }
    }

    pub async fn synthesize(
        &self,
        task: &Task,
        chain: &str,
        config: &RunConfig,
        cancel: &CancellationToken,
    ) -> TotResult<String> {
        let prompt = self.prompts.render_finalize(task, chain);
        let answer = self
            .gateway
            .chat(&prompt, config.finalize_temp, &config.chat_model, cancel)
            .await?;
        Ok(answer.trim().to_string())
    }
}
