use async_trait::async_trait;

use crate::error::TotResult;

/// Raw LLM transport — one chat call, one embedding call.
///
/// Backends classify their own failures: retryable conditions surface as
/// `TotError::TransientLlm`, rate limiting as `TotError::Quota`, malformed
/// requests as `TotError::InvalidRequest`. Retries, timeouts and
/// cancellation live in [`super::LlmGateway`], not here.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Single-turn completion; returns the model's text.
    async fn chat(&self, prompt: &str, temperature: f32, model_tag: &str) -> TotResult<String>;

    /// Embed a batch of texts; one vector per input, in input order.
    async fn embed(&self, texts: &[String], model_tag: &str) -> TotResult<Vec<Vec<f32>>>;
}
