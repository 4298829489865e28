//! Chat completion clients and provider selection.
//!
//! Every provider is normalized to the same envelope: a [`ChatRequest`]
//! (model, messages, temperature, max output tokens) in, a
//! [`ChatResponse`] (text, raw JSON, token usage) out.

use std::sync::Arc;

use async_trait::async_trait;

use teamkb_core::prompt::{ChatMessage, Role};

use crate::config::{AiConfig, CHAT_PROVIDERS};
use crate::error::{KbError, KbResult};
use crate::provider::{http_client, send_json, usage_i64};

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_output_tokens: u32,
    /// Caller context echoed into the audit record, never sent upstream.
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub text: String,
    pub raw: serde_json::Value,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    fn provider_name(&self) -> &str;
    async fn complete(&self, request: &ChatRequest) -> KbResult<ChatResponse>;
}

// ============ Mock ============

/// Offline chat client returning a fixed placeholder answer.
pub struct MockChatClient;

pub const MOCK_ANSWER: &str = "Mock answer: this response comes from the offline mock provider. \
Configure openai, anthropic, or gemini to get real answers.";

#[async_trait]
impl ChatClient for MockChatClient {
    fn provider_name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: &ChatRequest) -> KbResult<ChatResponse> {
        Ok(ChatResponse {
            text: MOCK_ANSWER.to_string(),
            raw: serde_json::json!({
                "mock": true,
                "model": request.model,
                "content": MOCK_ANSWER,
            }),
            input_tokens: Some(0),
            output_tokens: Some(50),
            total_tokens: Some(50),
        })
    }
}

// ============ OpenAI ============

pub struct OpenAiChatClient {
    http: reqwest::Client,
    key: String,
    base_url: String,
}

#[async_trait]
impl ChatClient for OpenAiChatClient {
    fn provider_name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: &ChatRequest) -> KbResult<ChatResponse> {
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|m| serde_json::json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();
        let body = serde_json::json!({
            "model": request.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_output_tokens,
        });
        let http_request = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.key)
            .json(&body);
        let raw = send_json("openai", http_request).await?;

        let text = raw
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .to_string();

        Ok(ChatResponse {
            text,
            input_tokens: usage_i64(&raw, "/usage/prompt_tokens"),
            output_tokens: usage_i64(&raw, "/usage/completion_tokens"),
            total_tokens: usage_i64(&raw, "/usage/total_tokens"),
            raw,
        })
    }
}

// ============ Anthropic ============

pub struct AnthropicChatClient {
    http: reqwest::Client,
    key: String,
    base_url: String,
}

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[async_trait]
impl ChatClient for AnthropicChatClient {
    fn provider_name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, request: &ChatRequest) -> KbResult<ChatResponse> {
        // Only a leading system message is lifted into `system`.
        let system = request
            .messages
            .first()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.clone());
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                let role = if m.role == Role::Assistant {
                    "assistant"
                } else {
                    "user"
                };
                serde_json::json!({ "role": role, "content": m.content })
            })
            .collect();

        let mut body = serde_json::json!({
            "model": request.model,
            "max_tokens": request.max_output_tokens,
            "temperature": request.temperature,
            "messages": messages,
        });
        if let Some(system) = system {
            body["system"] = serde_json::Value::String(system);
        }

        let http_request = self
            .http
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body);
        let raw = send_json("anthropic", http_request).await?;

        let text: String = raw
            .get("content")
            .and_then(|c| c.as_array())
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
                    .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                    .collect()
            })
            .unwrap_or_default();

        let input_tokens = usage_i64(&raw, "/usage/input_tokens");
        let output_tokens = usage_i64(&raw, "/usage/output_tokens");
        let total_tokens = match (input_tokens, output_tokens) {
            (Some(i), Some(o)) => Some(i + o),
            _ => None,
        };

        Ok(ChatResponse {
            text,
            raw,
            input_tokens,
            output_tokens,
            total_tokens,
        })
    }
}

// ============ Gemini ============

pub struct GeminiChatClient {
    http: reqwest::Client,
    key: String,
    base_url: String,
}

#[async_trait]
impl ChatClient for GeminiChatClient {
    fn provider_name(&self) -> &str {
        "gemini"
    }

    async fn complete(&self, request: &ChatRequest) -> KbResult<ChatResponse> {
        let contents: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|m| {
                let role = if m.role == Role::Assistant {
                    "model"
                } else {
                    "user"
                };
                serde_json::json!({ "role": role, "parts": [{ "text": m.content }] })
            })
            .collect();
        let body = serde_json::json!({
            "contents": contents,
            "generationConfig": {
                "temperature": request.temperature,
                "maxOutputTokens": request.max_output_tokens,
            },
        });

        let http_request = self
            .http
            .post(format!(
                "{}/models/{}:generateContent",
                self.base_url, request.model
            ))
            .header("x-goog-api-key", &self.key)
            .json(&body);
        let raw = send_json("gemini", http_request).await?;

        let text: String = raw
            .pointer("/candidates/0/content/parts")
            .and_then(|p| p.as_array())
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                    .collect()
            })
            .unwrap_or_default();

        Ok(ChatResponse {
            text,
            input_tokens: usage_i64(&raw, "/usageMetadata/promptTokenCount"),
            output_tokens: usage_i64(&raw, "/usageMetadata/candidatesTokenCount"),
            total_tokens: usage_i64(&raw, "/usageMetadata/totalTokenCount"),
            raw,
        })
    }
}

// ============ Selection ============

/// Check that chat completions can be served with the current configuration.
pub fn check_chat_config(ai: &AiConfig) -> KbResult<()> {
    if !ai.enabled {
        return Err(KbError::ai_disabled());
    }
    let provider = ai.provider.as_str();
    if !CHAT_PROVIDERS.contains(&provider) {
        return Err(KbError::NotConfigured(format!(
            "Unknown AI provider: {}. Use mock, openai, anthropic, or gemini.",
            provider
        )));
    }
    if provider != "mock" && ai.api_key(provider).is_none() {
        return Err(KbError::missing_api_key(provider));
    }
    Ok(())
}

/// Build the chat client named by `ai.provider`.
pub fn create_chat_client(ai: &AiConfig) -> KbResult<Arc<dyn ChatClient>> {
    check_chat_config(ai)?;
    let provider = ai.provider.as_str();
    let key = ai.api_key(provider).unwrap_or_default().to_string();
    let base_url = ai.base_url(provider);

    match provider {
        "mock" => Ok(Arc::new(MockChatClient)),
        "openai" => Ok(Arc::new(OpenAiChatClient {
            http: http_client(provider, ai.timeout_secs)?,
            key,
            base_url,
        })),
        "anthropic" => Ok(Arc::new(AnthropicChatClient {
            http: http_client(provider, ai.timeout_secs)?,
            key,
            base_url,
        })),
        "gemini" => Ok(Arc::new(GeminiChatClient {
            http: http_client(provider, ai.timeout_secs)?,
            key,
            base_url,
        })),
        other => Err(KbError::NotConfigured(format!(
            "Unknown AI provider: {}.",
            other
        ))),
    }
}
