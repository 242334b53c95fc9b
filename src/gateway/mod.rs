//! LLM gateway — the single choke point for model calls.
//!
//! Wraps a raw [`LlmBackend`] with bounded retries (exponential backoff, at
//! most [`GatewayConfig::max_attempts`] attempts), a hard per-call timeout,
//! and prompt cooperative cancellation: an in-flight call is abandoned the
//! moment the run's token fires. The gateway keeps no state between calls.

mod gemini;
mod traits;

pub use gemini::GeminiBackend;
pub use traits::LlmBackend;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{TotError, TotResult};
use crate::metrics::MetricsSink;

/// Retry and timeout policy for the gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Total attempts per call, first try included.
    pub max_attempts: u32,
    /// Backoff before the second attempt; doubles per retry.
    pub initial_backoff: Duration,
    /// Hard deadline per attempt; a timeout counts as transient.
    pub call_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(250),
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// Uniform, cancellable call interface over a chat + embedding backend.
pub struct LlmGateway {
    backend: Arc<dyn LlmBackend>,
    config: GatewayConfig,
    metrics: Arc<dyn MetricsSink>,
}

impl LlmGateway {
    pub fn new(backend: Arc<dyn LlmBackend>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            backend,
            config: GatewayConfig::default(),
            metrics,
        }
    }

    pub fn with_config(mut self, config: GatewayConfig) -> Self {
        self.config = config;
        self
    }

    /// One chat completion. Retries transient failures, aborts on
    /// cancellation, and reports the attempt count to the metrics sink.
    pub async fn chat(
        &self,
        prompt: &str,
        temperature: f32,
        model_tag: &str,
        cancel: &CancellationToken,
    ) -> TotResult<String> {
        self.metrics.increment("llm_chat_calls", &[], 1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = self
                .attempt(cancel, self.backend.chat(prompt, temperature, model_tag))
                .await;

            match result {
                Ok(text) => {
                    self.metrics.observe("llm_chat_attempts", &[], f64::from(attempt));
                    return Ok(text);
                }
                Err(e) => {
                    if let Some(err) = self.handle_failure("chat", attempt, e, cancel).await? {
                        self.metrics.observe("llm_chat_attempts", &[], f64::from(attempt));
                        return Err(err);
                    }
                }
            }
        }
    }

    /// One embedding batch; same retry and cancellation discipline as
    /// [`Self::chat`].
    pub async fn embed(
        &self,
        texts: &[String],
        model_tag: &str,
        cancel: &CancellationToken,
    ) -> TotResult<Vec<Vec<f32>>> {
        self.metrics.increment("llm_embed_calls", &[], 1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = self
                .attempt(cancel, self.backend.embed(texts, model_tag))
                .await;

            match result {
                Ok(vectors) => return Ok(vectors),
                Err(e) => {
                    if let Some(err) = self.handle_failure("embed", attempt, e, cancel).await? {
                        return Err(err);
                    }
                }
            }
        }
    }

    /// Race one backend call against the cancel token and the per-call
    /// timeout.
    async fn attempt<T>(
        &self,
        cancel: &CancellationToken,
        call: impl std::future::Future<Output = TotResult<T>>,
    ) -> TotResult<T> {
        if cancel.is_cancelled() {
            return Err(TotError::Cancelled);
        }
        tokio::select! {
            _ = cancel.cancelled() => Err(TotError::Cancelled),
            outcome = tokio::time::timeout(self.config.call_timeout, call) => match outcome {
                Err(_) => Err(TotError::TransientLlm(format!(
                    "call timed out after {:?}",
                    self.config.call_timeout
                ))),
                Ok(result) => result,
            },
        }
    }

    /// Decide whether to retry. `Ok(None)` means the backoff was slept and
    /// the caller should try again; `Ok(Some(err))` is the final error.
    async fn handle_failure(
        &self,
        kind: &str,
        attempt: u32,
        error: TotError,
        cancel: &CancellationToken,
    ) -> TotResult<Option<TotError>> {
        if error.is_cancelled() {
            return Err(TotError::Cancelled);
        }
        if !error.is_transient() {
            return Ok(Some(error));
        }
        if attempt >= self.config.max_attempts {
            return Ok(Some(TotError::ExhaustedLlm {
                attempts: attempt,
                message: error.to_string(),
            }));
        }

        self.metrics.increment("llm_retries", &[("kind", kind)], 1);
        let delay = self.config.initial_backoff * 2u32.pow(attempt - 1);
        tracing::warn!(kind, attempt, delay_ms = delay.as_millis() as u64, error = %error,
            "transient LLM failure, backing off");
        tokio::select! {
            _ = cancel.cancelled() => Err(TotError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use crate::metrics::MemoryMetrics;

    /// Backend that fails transiently `failures` times, then succeeds.
    struct FlakyBackend {
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakyBackend {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmBackend for FlakyBackend {
        async fn chat(&self, _: &str, _: f32, _: &str) -> TotResult<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(TotError::TransientLlm("connection reset".into()))
            } else {
                Ok("ok".into())
            }
        }

        async fn embed(&self, texts: &[String], _: &str) -> TotResult<Vec<Vec<f32>>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(TotError::TransientLlm("connection reset".into()))
            } else {
                Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
            }
        }
    }

    struct QuotaBackend;

    #[async_trait]
    impl LlmBackend for QuotaBackend {
        async fn chat(&self, _: &str, _: f32, _: &str) -> TotResult<String> {
            Err(TotError::Quota("daily limit".into()))
        }

        async fn embed(&self, _: &[String], _: &str) -> TotResult<Vec<Vec<f32>>> {
            Err(TotError::Quota("daily limit".into()))
        }
    }

    struct HangingBackend;

    #[async_trait]
    impl LlmBackend for HangingBackend {
        async fn chat(&self, _: &str, _: f32, _: &str) -> TotResult<String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("never".into())
        }

        async fn embed(&self, _: &[String], _: &str) -> TotResult<Vec<Vec<f32>>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }
    }

    fn fast_config() -> GatewayConfig {
        GatewayConfig {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            call_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn transient_then_success_retries() {
        let metrics = Arc::new(MemoryMetrics::new());
        let gateway = LlmGateway::new(Arc::new(FlakyBackend::new(2)), metrics.clone())
            .with_config(fast_config());

        let text = gateway
            .chat("p", 0.0, "m", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(text, "ok");
        assert_eq!(metrics.counter("llm_chat_calls"), 1);
        assert_eq!(metrics.counter("llm_retries"), 2);
        assert_eq!(metrics.observations("llm_chat_attempts"), vec![3.0]);
    }

    #[tokio::test]
    async fn exhausted_retries_surface() {
        let gateway = LlmGateway::new(
            Arc::new(FlakyBackend::new(10)),
            Arc::new(MemoryMetrics::new()),
        )
        .with_config(fast_config());

        let err = gateway
            .chat("p", 0.0, "m", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TotError::ExhaustedLlm { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn quota_errors_are_not_retried() {
        let metrics = Arc::new(MemoryMetrics::new());
        let gateway =
            LlmGateway::new(Arc::new(QuotaBackend), metrics.clone()).with_config(fast_config());

        let err = gateway
            .chat("p", 0.0, "m", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TotError::Quota(_)));
        assert_eq!(metrics.counter("llm_retries"), 0);
    }

    #[tokio::test]
    async fn pre_cancelled_token_short_circuits() {
        let gateway = LlmGateway::new(
            Arc::new(FlakyBackend::new(0)),
            Arc::new(MemoryMetrics::new()),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = gateway.chat("p", 0.0, "m", &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn cancellation_aborts_in_flight_call() {
        let gateway = LlmGateway::new(Arc::new(HangingBackend), Arc::new(MemoryMetrics::new()));
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel_clone.cancel();
        });

        let err = gateway.chat("p", 0.0, "m", &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn timeout_counts_as_transient_and_exhausts() {
        let gateway = LlmGateway::new(Arc::new(HangingBackend), Arc::new(MemoryMetrics::new()))
            .with_config(GatewayConfig {
                max_attempts: 2,
                initial_backoff: Duration::from_millis(1),
                call_timeout: Duration::from_millis(10),
            });

        let err = gateway
            .chat("p", 0.0, "m", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TotError::ExhaustedLlm { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn embed_returns_one_vector_per_text() {
        let gateway = LlmGateway::new(
            Arc::new(FlakyBackend::new(0)),
            Arc::new(MemoryMetrics::new()),
        );
        let texts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let vectors = gateway
            .embed(&texts, "m", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(vectors.len(), 3);
    }
}
