use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use crate::error::{TotError, TotResult};

use super::traits::LlmBackend;

/// Google Generative Language API backend.
pub struct GeminiBackend {
    client: Client,
    base_url: String,
    api_key: String,
}

impl GeminiBackend {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: "https://generativelanguage.googleapis.com".into(),
            api_key: api_key.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn chat_body(prompt: &str, temperature: f32) -> serde_json::Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [{"text": prompt}],
            }],
            "generationConfig": {"temperature": temperature},
        })
    }

    fn embed_body(texts: &[String], model_tag: &str) -> serde_json::Value {
        let requests: Vec<serde_json::Value> = texts
            .iter()
            .map(|text| {
                json!({
                    "model": format!("models/{model_tag}"),
                    "content": {"parts": [{"text": text}]},
                })
            })
            .collect();
        json!({ "requests": requests })
    }

    fn parse_chat_response(body: &serde_json::Value) -> TotResult<String> {
        let parts = body
            .get("candidates")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("content"))
            .and_then(|c| c.get("parts"))
            .and_then(|p| p.as_array())
            .ok_or_else(|| TotError::Parse("no candidates in chat response".into()))?;

        let text: String = parts
            .iter()
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("");

        if text.is_empty() {
            return Err(TotError::Parse("empty chat response".into()));
        }
        Ok(text)
    }

    fn parse_embed_response(body: &serde_json::Value) -> TotResult<Vec<Vec<f32>>> {
        let embeddings = body
            .get("embeddings")
            .and_then(|e| e.as_array())
            .ok_or_else(|| TotError::Parse("no embeddings in response".into()))?;

        embeddings
            .iter()
            .map(|entry| {
                entry
                    .get("values")
                    .and_then(|v| v.as_array())
                    .map(|values| {
                        values
                            .iter()
                            .filter_map(|x| x.as_f64())
                            .map(|x| x as f32)
                            .collect()
                    })
                    .ok_or_else(|| TotError::Parse("embedding entry without values".into()))
            })
            .collect()
    }

    fn classify_status(status: reqwest::StatusCode, body: String) -> TotError {
        if status.as_u16() == 429 {
            TotError::Quota(format!("Gemini API rate limited: {body}"))
        } else if status.is_client_error() {
            TotError::InvalidRequest(format!("Gemini API error {status}: {body}"))
        } else {
            TotError::TransientLlm(format!("Gemini API error {status}: {body}"))
        }
    }
}

#[async_trait]
impl LlmBackend for GeminiBackend {
    async fn chat(&self, prompt: &str, temperature: f32, model_tag: &str) -> TotResult<String> {
        let url = format!(
            "{}/v1beta/models/{model_tag}:generateContent",
            self.base_url
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::chat_body(prompt, temperature))
            .send()
            .await
            .map_err(|e| TotError::TransientLlm(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, body));
        }

        let body: serde_json::Value = response.json().await?;
        Self::parse_chat_response(&body)
    }

    async fn embed(&self, texts: &[String], model_tag: &str) -> TotResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!(
            "{}/v1beta/models/{model_tag}:batchEmbedContents",
            self.base_url
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::embed_body(texts, model_tag))
            .send()
            .await
            .map_err(|e| TotError::TransientLlm(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, body));
        }

        let body: serde_json::Value = response.json().await?;
        Self::parse_embed_response(&body)
    }
}
