use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;

use crate::core::config::ModelConfig;
use crate::core::error::ProviderError;
use crate::core::message::{ContentPart, Message, MessageRole};
use crate::core::provider::{ByteStream, ChatBackend, ChatRequest};

const MAX_RETRIES: u32 = 4;
const INITIAL_BACKOFF_MS: u64 = 1000;
const MAX_BACKOFF_MS: u64 = 30_000;

/// Wire shape of a streaming completion request.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "is_zero")]
    pub frequency_penalty: f32,
    #[serde(skip_serializing_if = "is_zero")]
    pub presence_penalty: f32,
    #[serde(skip_serializing_if = "is_zero")]
    pub temperature: f32,
    #[serde(skip_serializing_if = "is_zero")]
    pub top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub modalities: Vec<String>,
}

fn is_zero(value: &f32) -> bool {
    *value == 0.0
}

#[derive(Debug, Deserialize)]
struct GenerationResponse {
    data: GenerationData,
}

#[derive(Debug, Deserialize)]
struct GenerationData {
    #[serde(default)]
    total_cost: f64,
}

pub struct OpenRouterClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: ModelConfig,
}

impl OpenRouterClient {
    pub fn new(api_key: String, base_url: String, model: ModelConfig) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        }
    }

    pub fn build_request(&self, request: &ChatRequest) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.model.name.clone(),
            messages: convert_messages(&request.messages, &request.system_prompt),
            frequency_penalty: self.model.frequency_penalty,
            presence_penalty: self.model.presence_penalty,
            temperature: self.model.temperature,
            top_p: self.model.top_p,
            max_tokens: (self.model.max_tokens > 0).then_some(self.model.max_tokens),
            stream: true,
            modalities: self.model.modalities.clone(),
        }
    }
}

/// System prompt first, then the history. Text-only messages use the plain
/// string form; messages with images use the content-part array.
pub fn convert_messages(messages: &[Message], system_prompt: &str) -> Vec<serde_json::Value> {
    let mut result = Vec::with_capacity(messages.len() + 1);
    if !system_prompt.is_empty() {
        result.push(serde_json::json!({
            "role": "system",
            "content": system_prompt,
        }));
    }

    for msg in messages {
        if msg.role == MessageRole::System && !system_prompt.is_empty() {
            continue;
        }
        if !msg.has_images() {
            result.push(serde_json::json!({
                "role": msg.role.as_str(),
                "content": msg.text_content(),
            }));
            continue;
        }

        let parts: Vec<serde_json::Value> = msg
            .parts
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => serde_json::json!({
                    "type": "text",
                    "text": text,
                }),
                ContentPart::Image { .. } => serde_json::json!({
                    "type": "image_url",
                    "image_url": { "url": part.data_uri().unwrap_or_default() },
                }),
            })
            .collect();
        result.push(serde_json::json!({
            "role": msg.role.as_str(),
            "content": parts,
        }));
    }

    result
}

#[async_trait]
impl ChatBackend for OpenRouterClient {
    async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream, ProviderError> {
        let body = self.build_request(request);
        let mut last_err = ProviderError::Http("no attempts made".into());
        let mut server_retry_ms: Option<u64> = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let backoff = compute_backoff(attempt, server_retry_ms.take());
                tracing::warn!(
                    attempt,
                    max = MAX_RETRIES - 1,
                    backoff_ms = backoff,
                    "Retrying completion request"
                );
                tokio::time::sleep(std::time::Duration::from_millis(backoff)).await;
            }

            let resp = match self
                .client
                .post(format!("{}/chat/completions", self.base_url))
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    last_err = ProviderError::Http(e.to_string());
                    continue;
                }
            };

            let status = resp.status().as_u16();
            if resp.status().is_success() {
                let stream = resp
                    .bytes_stream()
                    .map(|chunk| chunk.map_err(|e| ProviderError::Stream(e.to_string())));
                return Ok(Box::pin(stream));
            }

            // Parse Retry-After header if present
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs.saturating_mul(1000));

            let text = resp.text().await.unwrap_or_default();
            if status == 429 || status == 502 || status == 503 {
                server_retry_ms = retry_after;
                last_err = ProviderError::RateLimited {
                    retry_after_ms: compute_backoff(attempt + 1, retry_after),
                };
                continue;
            }
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }

        Err(last_err)
    }

    async fn generation_cost(&self, generation_id: &str) -> Result<f64, ProviderError> {
        let resp = self
            .client
            .get(format!("{}/generation", self.base_url))
            .query(&[("id", generation_id)])
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status, message });
        }

        let generation: GenerationResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;
        Ok(generation.data.total_cost)
    }
}

/// Exponential backoff, capped. A server-provided delay takes precedence
/// but is held to the same cap.
fn compute_backoff(attempt: u32, server_retry_ms: Option<u64>) -> u64 {
    if let Some(ms) = server_retry_ms {
        return ms.min(MAX_BACKOFF_MS);
    }
    let base = INITIAL_BACKOFF_MS.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
    base.min(MAX_BACKOFF_MS)
}
